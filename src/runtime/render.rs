//! Text produced by the `CONV` instruction.
//!
//! Numerals follow printf rules: precision is a minimum digit count, `0`
//! pads after the sign and prefix unless a precision is given or the field
//! is left-justified. Byte renderings (`_c`, `_p`, `_u`) pad like `%s`;
//! `%c` and `%s` escape non-printable bytes the way `_c` does.

use crate::format::scanner::{ConversionKind, Flags};

const UNIT_NAMES: [&str; 32] = [
    "nul", "soh", "stx", "etx", "eot", "enq", "ack", "bel", "bs", "ht", "lf", "vt", "ff", "cr",
    "so", "si", "dle", "dc1", "dc2", "dc3", "dc4", "nak", "syn", "etb", "can", "em", "sub", "esc",
    "fs", "gs", "rs", "us",
];

/// Everything `CONV` pops besides the consumed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub kind: ConversionKind,
    /// Bytes the directive was compiled to consume.
    pub bytes: usize,
    pub flags: Flags,
    pub width: Option<usize>,
    pub precision: Option<usize>,
}

/// What the machine knows about the input at the time of the conversion.
#[derive(Debug, Clone, Copy)]
pub struct Consumed<'a> {
    /// Big-endian packing of the bytes the preceding `READ` returned.
    pub word: i64,
    /// The bytes that `READ` consumed.
    pub span: &'a [u8],
    /// Stream offset of the next unread byte.
    pub offset: u64,
}

/// Renders one conversion. At most `room` bytes are produced; padding past
/// that is never materialised.
pub fn render(conv: &Conversion, input: Consumed<'_>, room: usize) -> Vec<u8> {
    let mut field = Field::new(conv, room);

    match conv.kind {
        ConversionKind::Percent => field.text(b"%"),
        ConversionKind::SignedDecimal => {
            let value = sign_extend(input.word, conv.bytes);
            numeral(&mut field, conv, value < 0, value.unsigned_abs(), 10, false)
        }
        ConversionKind::UnsignedDecimal => unsigned(&mut field, conv, input.word, 10, false),
        ConversionKind::Octal => unsigned(&mut field, conv, input.word, 8, false),
        ConversionKind::HexLower => unsigned(&mut field, conv, input.word, 16, false),
        ConversionKind::HexUpper => unsigned(&mut field, conv, input.word, 16, true),
        ConversionKind::AddrDecLower | ConversionKind::AddrDecUpper => {
            numeral(&mut field, conv, false, input.offset, 10, false)
        }
        ConversionKind::AddrOctLower | ConversionKind::AddrOctUpper => {
            numeral(&mut field, conv, false, input.offset, 8, false)
        }
        ConversionKind::AddrHexLower => numeral(&mut field, conv, false, input.offset, 16, false),
        ConversionKind::AddrHexUpper => numeral(&mut field, conv, false, input.offset, 16, true),
        ConversionKind::Char | ConversionKind::CanonicalChar => {
            field.text(&canonical_char(input.word as u8))
        }
        ConversionKind::String => {
            let text = input.span.split(|b| *b == 0).next().unwrap_or_default();
            let limit = conv.precision.unwrap_or(text.len()).min(text.len());
            let escaped: Vec<u8> = text[..limit]
                .iter()
                .flat_map(|b| canonical_char(*b))
                .collect();
            field.text(&escaped)
        }
        ConversionKind::PrintableChar => field.text(&[printable_char(input.word as u8)]),
        ConversionKind::UnitChar => field.text(&unit_char(input.word as u8)),
    }

    field.out
}

/// Output of one conversion, capped at the room left in the sink.
struct Field {
    out: Vec<u8>,
    room: usize,
    width: usize,
    left: bool,
}

impl Field {
    fn new(conv: &Conversion, room: usize) -> Self {
        Field {
            out: Vec::new(),
            room,
            width: conv.width.unwrap_or(0),
            left: conv.flags.contains(Flags::LEFT_JUSTIFY),
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.room - self.out.len());
        self.out.extend_from_slice(&bytes[..n]);
    }

    fn fill(&mut self, byte: u8, count: usize) {
        let n = count.min(self.room - self.out.len());
        self.out.resize(self.out.len() + n, byte);
    }

    /// `prefix`, `zeros` zero digits and `body`, space-padded to the width.
    fn emit(&mut self, prefix: &[u8], zeros: usize, body: &[u8]) {
        let len = prefix.len().saturating_add(zeros).saturating_add(body.len());
        let pad = self.width.saturating_sub(len);

        if !self.left {
            self.fill(b' ', pad);
        }
        self.put(prefix);
        self.fill(b'0', zeros);
        self.put(body);
        if self.left {
            self.fill(b' ', pad);
        }
    }

    fn text(&mut self, body: &[u8]) {
        self.emit(&[], 0, body)
    }
}

fn sign_extend(word: i64, bytes: usize) -> i64 {
    match bytes {
        1..=7 => {
            let shift = 64 - 8 * bytes as u32;
            (word << shift) >> shift
        }
        _ => word,
    }
}

fn unsigned(field: &mut Field, conv: &Conversion, word: i64, base: u32, upper: bool) {
    let value = match conv.bytes {
        1..=7 => (word as u64) & ((1u64 << (8 * conv.bytes)) - 1),
        _ => word as u64,
    };
    numeral(field, conv, false, value, base, upper)
}

fn digits(mut value: u64, base: u32, upper: bool) -> Vec<u8> {
    let table: &[u8; 16] = if upper {
        b"0123456789ABCDEF"
    } else {
        b"0123456789abcdef"
    };

    let mut out = Vec::new();
    loop {
        out.push(table[(value % u64::from(base)) as usize]);
        value /= u64::from(base);
        if value == 0 {
            break;
        }
    }
    out.reverse();
    out
}

fn numeral(
    field: &mut Field,
    conv: &Conversion,
    negative: bool,
    magnitude: u64,
    base: u32,
    upper: bool,
) {
    let flags = conv.flags;

    let body = if conv.precision == Some(0) && magnitude == 0 {
        Vec::new()
    } else {
        digits(magnitude, base, upper)
    };
    let mut zeros = conv.precision.unwrap_or(0).saturating_sub(body.len());

    let mut prefix: Vec<u8> = Vec::new();
    if conv.kind == ConversionKind::SignedDecimal {
        if negative {
            prefix.push(b'-');
        } else if flags.contains(Flags::FORCE_SIGN) {
            prefix.push(b'+');
        } else if flags.contains(Flags::SPACE_SIGN) {
            prefix.push(b' ');
        }
    }
    if flags.contains(Flags::ALTERNATE) {
        match base {
            8 if zeros == 0 && body.first() != Some(&b'0') => zeros = 1,
            16 if magnitude != 0 => prefix.extend_from_slice(if upper { b"0X" } else { b"0x" }),
            _ => {}
        }
    }

    let zero_fill = flags.contains(Flags::ZERO_PAD)
        && !flags.contains(Flags::LEFT_JUSTIFY)
        && conv.precision.is_none();
    if zero_fill {
        let used = prefix.len().saturating_add(zeros).saturating_add(body.len());
        zeros += field.width.saturating_sub(used);
    }

    field.emit(&prefix, zeros, &body)
}

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

fn canonical_char(byte: u8) -> Vec<u8> {
    let escape = match byte {
        0x00 => b'0',
        0x07 => b'a',
        0x08 => b'b',
        0x0c => b'f',
        b'\n' => b'n',
        b'\r' => b'r',
        b'\t' => b't',
        0x0b => b'v',
        b if is_printable(b) => return vec![b],
        b => return format!("{:03o}", b).into_bytes(),
    };
    vec![b'\\', escape]
}

fn printable_char(byte: u8) -> u8 {
    if is_printable(byte) { byte } else { b'.' }
}

fn unit_char(byte: u8) -> Vec<u8> {
    match byte {
        0x00..=0x1f => UNIT_NAMES[usize::from(byte)].as_bytes().to_vec(),
        0x7f => b"del".to_vec(),
        b if is_printable(b) => vec![b],
        b => format!("{:02x}", b).into_bytes(),
    }
}
