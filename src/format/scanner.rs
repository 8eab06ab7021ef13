//! Lexing of single `%` conversion directives.
//!
//! The scanner never reports errors itself: a directive it cannot make sense
//! of comes back as a [`ScanError`] and the unit compiler turns that into a
//! positioned [`CompileError`](crate::bytecode::compile_error::CompileError).

/// Largest value `scan_int` keeps accumulating into.
const INT_LIMIT: usize = ((i32::MAX - (i32::MAX % 10) - 1) / 10) as usize;

/// Byte cursor over a format string.
#[derive(Debug, Clone)]
pub struct FormatCursor<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> FormatCursor<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        FormatCursor { text, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn current(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    pub fn advance(&mut self) -> Option<u8> {
        let ch = self.current();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    /// Skips blanks; newlines are only skipped when `newlines` is set.
    pub fn skip_whitespace(&mut self, newlines: bool) -> Option<u8> {
        while let Some(ch) = self.current() {
            match ch {
                b' ' | b'\t' | b'\x0b' | b'\r' | b'\x0c' => self.pos += 1,
                b'\n' if newlines => self.pos += 1,
                _ => break,
            }
        }
        self.current()
    }
}

/// Reads a run of decimal digits.
///
/// Returns `None` when the cursor is not on a digit, which keeps "absent"
/// apart from an explicit `0`. Accumulation stops before it could leave the
/// `i32` range; any digits left over stay under the cursor.
pub fn scan_int(cursor: &mut FormatCursor<'_>) -> Option<usize> {
    let mut value = match cursor.current() {
        Some(ch) if ch.is_ascii_digit() => 0usize,
        _ => return None,
    };

    while let Some(ch) = cursor.current() {
        if !ch.is_ascii_digit() || value > INT_LIMIT {
            break;
        }
        value = value * 10 + usize::from(ch - b'0');
        cursor.advance();
    }

    Some(value)
}

/// Additive set of printf-style flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const ALTERNATE: Flags = Flags(1);
    pub const ZERO_PAD: Flags = Flags(2);
    pub const LEFT_JUSTIFY: Flags = Flags(4);
    pub const SPACE_SIGN: Flags = Flags(8);
    pub const FORCE_SIGN: Flags = Flags(16);

    const ALL: u8 = 0x1f;

    pub fn empty() -> Self {
        Flags(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Unknown bits are dropped.
    pub fn from_bits(bits: i64) -> Self {
        Flags((bits & i64::from(Self::ALL)) as u8)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    fn from_char(ch: u8) -> Option<Flags> {
        match ch {
            b'#' => Some(Flags::ALTERNATE),
            b'0' => Some(Flags::ZERO_PAD),
            b'-' => Some(Flags::LEFT_JUSTIFY),
            b' ' => Some(Flags::SPACE_SIGN),
            b'+' => Some(Flags::FORCE_SIGN),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConversionKind {
    Percent = 0,
    Char,
    SignedDecimal,
    UnsignedDecimal,
    Octal,
    HexLower,
    HexUpper,
    String,
    AddrDecLower,
    AddrOctLower,
    AddrHexLower,
    AddrDecUpper,
    AddrOctUpper,
    AddrHexUpper,
    CanonicalChar,
    PrintableChar,
    UnitChar,
}

impl ConversionKind {
    const ALL: [ConversionKind; 17] = [
        ConversionKind::Percent,
        ConversionKind::Char,
        ConversionKind::SignedDecimal,
        ConversionKind::UnsignedDecimal,
        ConversionKind::Octal,
        ConversionKind::HexLower,
        ConversionKind::HexUpper,
        ConversionKind::String,
        ConversionKind::AddrDecLower,
        ConversionKind::AddrOctLower,
        ConversionKind::AddrHexLower,
        ConversionKind::AddrDecUpper,
        ConversionKind::AddrOctUpper,
        ConversionKind::AddrHexUpper,
        ConversionKind::CanonicalChar,
        ConversionKind::PrintableChar,
        ConversionKind::UnitChar,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub fn is_address(self) -> bool {
        matches!(
            self,
            ConversionKind::AddrDecLower
                | ConversionKind::AddrOctLower
                | ConversionKind::AddrHexLower
                | ConversionKind::AddrDecUpper
                | ConversionKind::AddrOctUpper
                | ConversionKind::AddrHexUpper
        )
    }

    /// The directive as written in a format string, without flags.
    pub fn token(self) -> &'static str {
        match self {
            ConversionKind::Percent => "%",
            ConversionKind::Char => "c",
            ConversionKind::SignedDecimal => "d",
            ConversionKind::UnsignedDecimal => "u",
            ConversionKind::Octal => "o",
            ConversionKind::HexLower => "x",
            ConversionKind::HexUpper => "X",
            ConversionKind::String => "s",
            ConversionKind::AddrDecLower => "_ad",
            ConversionKind::AddrOctLower => "_ao",
            ConversionKind::AddrHexLower => "_ax",
            ConversionKind::AddrDecUpper => "_Ad",
            ConversionKind::AddrOctUpper => "_Ao",
            ConversionKind::AddrHexUpper => "_Ax",
            ConversionKind::CanonicalChar => "_c",
            ConversionKind::PrintableChar => "_p",
            ConversionKind::UnitChar => "_u",
        }
    }
}

/// One parsed `%` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSpec {
    pub flags: Flags,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    /// Input bytes the directive asks for before any per-unit clamp.
    pub bytes: usize,
    pub kind: ConversionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    /// The conversion token is missing or not one we know.
    UnknownConversion,
    /// `%s` needs an explicit precision to know how much to consume.
    StringWithoutPrecision,
}

impl ScanError {
    pub fn reason(self) -> &'static str {
        match self {
            ScanError::UnknownConversion => "unknown conversion",
            ScanError::StringWithoutPrecision => "%s requires an explicit precision",
        }
    }
}

/// Scans one directive; `cursor` must sit just past the `%`.
///
/// On success the cursor is left on the first byte after the conversion
/// token.
pub fn scan_directive(cursor: &mut FormatCursor<'_>) -> Result<ConversionSpec, ScanError> {
    let mut flags = Flags::empty();

    while let Some(flag) = cursor.current().and_then(Flags::from_char) {
        flags.insert(flag);
        cursor.advance();
    }

    let width = scan_int(cursor);
    let precision = if cursor.current() == Some(b'.') {
        cursor.advance();
        // "%.d" is an explicit zero precision, as in printf
        Some(scan_int(cursor).unwrap_or(0))
    } else {
        None
    };

    let (kind, bytes) = match cursor.advance() {
        Some(b'%') => (ConversionKind::Percent, 0),
        Some(b'c') => (ConversionKind::Char, 1),
        Some(b'd') | Some(b'i') => (ConversionKind::SignedDecimal, 4),
        Some(b'u') => (ConversionKind::UnsignedDecimal, 4),
        Some(b'o') => (ConversionKind::Octal, 4),
        Some(b'x') => (ConversionKind::HexLower, 4),
        Some(b'X') => (ConversionKind::HexUpper, 4),
        Some(b's') => match precision {
            Some(precision) => (ConversionKind::String, precision),
            None => return Err(ScanError::StringWithoutPrecision),
        },
        Some(b'_') => scan_extended(cursor)?,
        _ => return Err(ScanError::UnknownConversion),
    };

    Ok(ConversionSpec {
        flags,
        width,
        precision,
        bytes,
        kind,
    })
}

fn scan_extended(cursor: &mut FormatCursor<'_>) -> Result<(ConversionKind, usize), ScanError> {
    match cursor.advance() {
        Some(b'a') => {
            let kind = match cursor.advance() {
                Some(b'd') => ConversionKind::AddrDecLower,
                Some(b'o') => ConversionKind::AddrOctLower,
                Some(b'x') => ConversionKind::AddrHexLower,
                _ => return Err(ScanError::UnknownConversion),
            };
            Ok((kind, 0))
        }
        Some(b'A') => {
            let kind = match cursor.advance() {
                Some(b'd') => ConversionKind::AddrDecUpper,
                Some(b'o') => ConversionKind::AddrOctUpper,
                Some(b'x') => ConversionKind::AddrHexUpper,
                _ => return Err(ScanError::UnknownConversion),
            };
            Ok((kind, 0))
        }
        Some(b'c') => Ok((ConversionKind::CanonicalChar, 1)),
        Some(b'p') => Ok((ConversionKind::PrintableChar, 1)),
        Some(b'u') => Ok((ConversionKind::UnitChar, 1)),
        _ => Err(ScanError::UnknownConversion),
    }
}
