//! Serializes a single [`Record`] to its BAM wire representation.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::record::Record;

const NULL_QUALITY_SCORE: u8 = 0xff;

/// Writes `record`'s exact wire representation: the 36-byte fixed header,
/// then `read_name`+NUL, `cigar`, packed `seq`, `qual`, then `tags`.
///
/// `block_size` is recomputed from `record`'s current contents (never
/// trusted from a prior read), so it always matches what's actually
/// written.
pub fn write_record<W>(writer: &mut W, record: &Record) -> io::Result<()>
where
    W: Write,
{
    let block_size = u32::try_from(record.block_size())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_u32::<LittleEndian>(block_size)?;

    writer.write_i32::<LittleEndian>(record.ref_id())?;
    writer.write_i32::<LittleEndian>(record.pos())?;

    writer.write_u8(record.read_name().len() as u8 + 1)?;
    writer.write_u8(record.mapq())?;
    writer.write_u16::<LittleEndian>(record.bin())?;
    writer.write_u16::<LittleEndian>(record.n_cigar_op())?;
    writer.write_u16::<LittleEndian>(record.flags().bits())?;
    writer.write_u32::<LittleEndian>(record.l_seq())?;

    writer.write_i32::<LittleEndian>(record.next_ref_id())?;
    writer.write_i32::<LittleEndian>(record.next_pos())?;
    writer.write_i32::<LittleEndian>(record.template_length())?;

    writer.write_all(record.read_name())?;
    writer.write_u8(0)?;

    for &word in record.cigar_raw().as_ref() {
        writer.write_u32::<LittleEndian>(word)?;
    }

    writer.write_all(record.sequence().as_packed_bytes())?;

    let quality_scores = record.quality_scores();

    if quality_scores.is_empty() {
        for _ in 0..record.l_seq() {
            writer.write_u8(NULL_QUALITY_SCORE)?;
        }
    } else {
        writer.write_all(quality_scores)?;
    }

    writer.write_all(record.data().as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_record_matches_to_bytes() {
        let record = Record::default();

        let mut buf = Vec::new();
        write_record(&mut buf, &record).unwrap();

        assert_eq!(buf, record.to_bytes());
    }
}
