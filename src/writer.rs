//! Serializes [`Record`](crate::record::Record) values to a byte sink.

pub mod record;

use std::io::{self, Write};

use crate::record::Record;

/// Wraps a byte sink and writes BAM records to it one at a time.
///
/// This core performs no framing beyond the record bytes themselves (no
/// BGZF block compression, no magic/header block) — that belongs to a
/// higher layer that composes this writer with a block-compressed sink.
pub struct Writer<W> {
    inner: W,
}

impl<W> Writer<W>
where
    W: Write,
{
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// The underlying writer, consuming self.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes one record.
    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        self::record::write_record(&mut self.inner, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_write_record() -> io::Result<()> {
        let mut writer = Writer::new(Vec::new());
        writer.write_record(&Record::default())?;

        assert_eq!(writer.into_inner(), Record::default().to_bytes());

        Ok(())
    }
}
