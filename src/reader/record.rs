//! Decodes a single [`Record`] from the front of a byte buffer.

use std::{error, fmt};

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    ascii,
    record::{cigar::Cigar, data::Data, sequence::Sequence, Record},
    Flags,
};

/// Byte length of the fixed header, `ref_id` through `tlen` inclusive.
const FIXED_FIELDS_LEN: usize = 32;

/// Decodes one record from the front of `buf`.
///
/// Returns `Ok(None)` at a clean end of input (`buf` is empty). Returns
/// `Ok(Some((record, consumed)))` on success, where `consumed` is the
/// number of bytes the record occupied (`4 + block_size`). Any other
/// condition — a partial record, an out-of-range `block_size`, a malformed
/// field — is a [`ReadError`].
pub fn read_record(buf: &[u8]) -> Result<Option<(Record, usize)>, ReadError> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf.len() < 4 {
        return Err(ReadError::Truncated);
    }

    let block_size = LittleEndian::read_u32(&buf[0..4]);
    let total_len = 4 + block_size as usize;

    if (block_size as usize) < FIXED_FIELDS_LEN {
        return Err(ReadError::InvalidBlockSize(block_size));
    }

    if buf.len() < total_len {
        return Err(ReadError::Truncated);
    }

    let fixed = &buf[4..36];

    let ref_id = LittleEndian::read_i32(&fixed[0..4]);
    let pos = LittleEndian::read_i32(&fixed[4..8]);
    let l_read_name = fixed[8];
    let mapq = fixed[9];
    let bin = LittleEndian::read_u16(&fixed[10..12]);
    let n_cigar_op = LittleEndian::read_u16(&fixed[12..14]);
    let flag = Flags::from_bits_retain(LittleEndian::read_u16(&fixed[14..16]));
    let l_seq = LittleEndian::read_u32(&fixed[16..20]);
    let next_ref_id = LittleEndian::read_i32(&fixed[20..24]);
    let next_pos = LittleEndian::read_i32(&fixed[24..28]);
    let tlen = LittleEndian::read_i32(&fixed[28..32]);

    let mut cursor = 36;

    if l_read_name == 0 {
        return Err(ReadError::InvalidReadNameLength);
    }

    let name_field_len = usize::from(l_read_name);
    let name_end = take(buf, total_len, cursor, name_field_len)?;

    if buf[name_end - 1] != 0 {
        return Err(ReadError::MissingNulTerminator);
    }

    let read_name = &buf[cursor..name_end - 1];

    if !ascii::is_ascii(read_name) {
        return Err(ReadError::NonAsciiReadName);
    }

    let read_name = read_name.to_vec();
    cursor = name_end;

    let cigar_len = 4 * usize::from(n_cigar_op);
    let cigar_end = take(buf, total_len, cursor, cigar_len)?;
    let cigar = Cigar::try_from_buffer(&buf[cursor..cigar_end]).map_err(ReadError::Cigar)?;
    cursor = cigar_end;

    let seq_len = (l_seq as usize + 1) / 2;
    let seq_end = take(buf, total_len, cursor, seq_len)?;
    let sequence = Sequence::from_packed(l_seq as usize, buf[cursor..seq_end].to_vec());
    cursor = seq_end;

    let qual_len = l_seq as usize;
    let qual_end = take(buf, total_len, cursor, qual_len)?;
    let quality_scores = buf[cursor..qual_end].to_vec();
    cursor = qual_end;

    let tags = Data::from_bytes(buf[cursor..total_len].to_vec());

    let record = Record::from_raw_parts(
        ref_id,
        pos,
        mapq,
        bin,
        flag,
        next_ref_id,
        next_pos,
        tlen,
        read_name,
        cigar,
        sequence,
        quality_scores,
        tags,
    );

    Ok(Some((record, total_len)))
}

/// Advances `cursor` by `len`, bytes, returning the new offset. Errs if that
/// would run past `total_len` (the record's own declared end) — guards
/// against a `block_size`/field-length combination that doesn't add up,
/// which would otherwise read into (or past) the next record.
fn take(buf: &[u8], total_len: usize, cursor: usize, len: usize) -> Result<usize, ReadError> {
    let end = cursor.checked_add(len).ok_or(ReadError::Truncated)?;

    if end > total_len || end > buf.len() {
        return Err(ReadError::Truncated);
    }

    Ok(end)
}

/// An error decoding a record from a buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// The buffer ended before a complete record could be read.
    Truncated,
    /// `block_size` is smaller than the fixed header it must contain.
    InvalidBlockSize(u32),
    /// `l_read_name` is `0` (there must be room for at least the NUL).
    InvalidReadNameLength,
    /// The byte at `read_name`'s declared end is not NUL.
    MissingNulTerminator,
    /// `read_name` contains a non-ASCII byte.
    NonAsciiReadName,
    /// The CIGAR is malformed.
    Cigar(crate::record::cigar::ParseError),
}

impl error::Error for ReadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Cigar(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ReadError> for std::io::Error {
    /// Surfaces a decode failure as `io::Error`: `Truncated` becomes
    /// `UnexpectedEof`, everything else becomes `InvalidData`.
    fn from(e: ReadError) -> Self {
        let kind = match e {
            ReadError::Truncated => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };

        std::io::Error::new(kind, e)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "buffer ended before a complete record"),
            Self::InvalidBlockSize(n) => write!(f, "block_size too small to hold a record: {n}"),
            Self::InvalidReadNameLength => write!(f, "l_read_name is 0"),
            Self::MissingNulTerminator => write!(f, "read_name is not NUL-terminated"),
            Self::NonAsciiReadName => write!(f, "read_name is not ASCII"),
            Self::Cigar(e) => write!(f, "{e}"),
        }
    }
}
