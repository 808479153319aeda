//! A CIGAR, the compact alignment descriptor carried by a BAM record.

pub mod op;

use std::{error, fmt, mem};

use byteorder::{ByteOrder, LittleEndian};

pub use self::op::{Kind, Op};
use self::op::{decode_op, parse_char, InvalidOpChar, LenOutOfRangeError, MAX_LEN};

/// A sized array of packed `(op, len)` words.
///
/// Storage is the raw `u32` words, matching the wire representation
/// directly; [`Cigar::iter`] decodes them into [`Op`] pairs on demand.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cigar(Vec<u32>);

impl Cigar {
    /// An empty CIGAR.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a CIGAR from its textual representation, e.g. `"3M1I2M"`.
    ///
    /// The buffer is pre-sized to `ceil(text.len() / 2)` words (the minimum
    /// possible encoding, one digit and one opchar per op) and shrunk to fit
    /// once parsing completes.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let bytes = text.as_bytes();
        let mut ops = Vec::with_capacity((bytes.len() + 1) / 2);

        let mut i = 0;

        while i < bytes.len() {
            let start = i;

            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }

            if i == start {
                return Err(ParseError::InvalidOp(InvalidOpChar(bytes[i] as char)));
            }

            let mut len: u32 = 0;

            for &digit in &bytes[start..i] {
                len = len
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(u32::from(digit - b'0')))
                    .filter(|&n| n <= MAX_LEN)
                    .ok_or(ParseError::LenOutOfRange(LenOutOfRangeError(MAX_LEN + 1)))?;
            }

            if i == bytes.len() {
                return Err(ParseError::UnexpectedEof);
            }

            let kind = parse_char(bytes[i]).map_err(ParseError::InvalidOp)?;
            i += 1;

            ops.push(u32::from(Op::new(kind, len).map_err(ParseError::LenOutOfRange)?));
        }

        ops.shrink_to_fit();

        Ok(Self(ops))
    }

    /// Builds a CIGAR from an iterable of raw `(op_code, len)` pairs, each
    /// within its declared range (`op_code in 0..=9`, `len <= 2^28 - 1`).
    pub fn try_from_pairs<I>(pairs: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = (u8, u32)>,
    {
        let mut ops = Vec::new();

        for (code, len) in pairs {
            let kind = Kind::try_from(code).map_err(ParseError::InvalidOp)?;
            let op = Op::new(kind, len).map_err(ParseError::LenOutOfRange)?;
            ops.push(u32::from(op));
        }

        Ok(Self(ops))
    }

    /// Builds a CIGAR directly from [`Op`] values.
    pub fn from_ops<I>(ops: I) -> Self
    where
        I: IntoIterator<Item = Op>,
    {
        Self(ops.into_iter().map(u32::from).collect())
    }

    /// Reinterprets a buffer whose length is a multiple of 4 as little-endian
    /// `u32` CIGAR words.
    pub fn try_from_buffer(buf: &[u8]) -> Result<Self, ParseError> {
        let width = mem::size_of::<u32>();

        if buf.len() % width != 0 {
            return Err(ParseError::LengthNotMultiple {
                len: buf.len(),
                width,
            });
        }

        let words: Vec<u32> = buf.chunks_exact(width).map(LittleEndian::read_u32).collect();

        for &word in &words {
            decode_op(word).map_err(ParseError::InvalidOp)?;
        }

        Ok(Self(words))
    }

    /// The number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this CIGAR has no operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the decoded `(kind, len)` pairs, in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Op> + '_ {
        self.0.iter().map(|&word| decode_op(word).expect("cigar word validated on construction"))
    }

    /// Appends an operation.
    pub fn push(&mut self, op: Op) {
        self.0.push(u32::from(op));
    }

    /// Removes all operations.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The byte length this CIGAR occupies on the wire (`4 * len()`).
    pub fn encoded_len(&self) -> usize {
        self.0.len() * mem::size_of::<u32>()
    }
}

impl AsRef<[u32]> for Cigar {
    fn as_ref(&self) -> &[u32] {
        &self.0
    }
}

impl FromIterator<Op> for Cigar {
    fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Self {
        Self::from_ops(iter)
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "*");
        }

        for op in self.iter() {
            write!(f, "{}{}", op.len(), op.kind().as_char())?;
        }

        Ok(())
    }
}

/// Returns `true` when `cigar` is the 2-op soft-clip placeholder used to
/// smuggle a CIGAR longer than 65535 ops through a `CG` data field.
///
/// `[S(l_seq), N(_)]` signals that the real CIGAR lives in the `CG:B:I`
/// tag. This crate does not expand it (see
/// [`crate::record::Record::cigar`]).
pub fn is_overflow_placeholder(cigar: &Cigar, l_seq: usize) -> bool {
    let words = cigar.as_ref();

    if words.len() != 2 {
        return false;
    }

    let first = decode_op(words[0]).ok();
    let second = decode_op(words[1]).ok();

    matches!(
        (first, second),
        (Some(op0), Some(op1))
            if op0.kind() == Kind::SoftClip
                && op0.len() as usize == l_seq
                && op1.kind() == Kind::Skip
    )
}

/// An error parsing or constructing a [`Cigar`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// Input ended mid-operation (a digit run with no trailing opchar).
    UnexpectedEof,
    /// An operation code or opchar is invalid.
    InvalidOp(InvalidOpChar),
    /// An operation length does not fit in 28 bits.
    LenOutOfRange(LenOutOfRangeError),
    /// A raw buffer's length is not a multiple of the CIGAR word width.
    LengthNotMultiple { len: usize, width: usize },
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::InvalidOp(e) => Some(e),
            Self::LenOutOfRange(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of CIGAR text"),
            Self::InvalidOp(e) => write!(f, "{e}"),
            Self::LenOutOfRange(e) => write!(f, "{e}"),
            Self::LengthNotMultiple { len, width } => {
                write!(f, "buffer length {len} is not a multiple of {width}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_and_display() -> Result<(), ParseError> {
        let cigar = Cigar::from_text("3M1I2M")?;
        assert_eq!(cigar.as_ref(), [0x30, 0x11, 0x20]);
        assert_eq!(cigar.to_string(), "3M1I2M");

        assert_eq!(Cigar::from_text("")?, Cigar::new());
        assert_eq!(Cigar::new().to_string(), "*");

        assert!(matches!(Cigar::from_text("3"), Err(ParseError::UnexpectedEof)));
        assert!(matches!(Cigar::from_text("3Q"), Err(ParseError::InvalidOp(_))));

        Ok(())
    }

    #[test]
    fn test_try_from_pairs() -> Result<(), ParseError> {
        let cigar = Cigar::try_from_pairs([(0, 3), (1, 1), (0, 2)])?;
        assert_eq!(cigar.to_string(), "3M1I2M");

        assert!(matches!(
            Cigar::try_from_pairs([(10, 1)]),
            Err(ParseError::InvalidOp(_))
        ));

        Ok(())
    }

    #[test]
    fn test_try_from_buffer() -> Result<(), ParseError> {
        let buf = [0x30, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00];
        let cigar = Cigar::try_from_buffer(&buf)?;
        assert_eq!(cigar.to_string(), "3M1I");

        assert!(matches!(
            Cigar::try_from_buffer(&buf[..6]),
            Err(ParseError::LengthNotMultiple { len: 6, width: 4 })
        ));

        Ok(())
    }

    #[test]
    fn test_roundtrips() -> Result<(), Box<dyn std::error::Error>> {
        let cigar = Cigar::from_text("3M1I2M")?;

        let text = cigar.to_string();
        assert_eq!(Cigar::from_text(&text)?, cigar);

        let pairs: Vec<(u8, u32)> = cigar.iter().map(|op| (op.kind() as u8, op.len())).collect();
        assert_eq!(Cigar::try_from_pairs(pairs)?, cigar);

        let mut buf = Vec::new();
        for &word in cigar.as_ref() {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(Cigar::try_from_buffer(&buf)?, cigar);

        Ok(())
    }

    #[test]
    fn test_is_overflow_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let cigar = Cigar::from_ops([Op::new(Kind::SoftClip, 4)?, Op::new(Kind::Skip, 8)?]);
        assert!(is_overflow_placeholder(&cigar, 4));
        assert!(!is_overflow_placeholder(&cigar, 5));

        let cigar = Cigar::from_text("4M")?;
        assert!(!is_overflow_placeholder(&cigar, 4));

        Ok(())
    }
}
