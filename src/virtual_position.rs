//! BGZF virtual file offsets.
//!
//! A virtual position packs a compressed (BGZF) block start, `coffset`, and
//! an offset into that block's uncompressed payload, `uoffset`, into a
//! single `u64`. It does not itself know how to read or decompress a BGZF
//! stream; that lives in an external BGZF layer.

use std::{error, fmt, mem};

use byteorder::{ByteOrder, LittleEndian};

const COFFSET_SHIFT: u32 = 16;
const UOFFSET_MASK: u64 = (1 << COFFSET_SHIFT) - 1;

const MAX_COFFSET: u64 = (1 << 48) - 1;
const MAX_UOFFSET: u64 = (1 << 16) - 1;

/// A 48-bit compressed block offset paired with a 16-bit uncompressed offset.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct VirtualPosition(u64);

impl VirtualPosition {
    /// Creates a virtual position from a block start and an offset within it.
    ///
    /// `uoffset` defaults to 0 when omitted.
    pub fn try_new(coffset: u64, uoffset: u64) -> Result<Self, TryFromU64Error> {
        if coffset > MAX_COFFSET {
            return Err(TryFromU64Error::CoffsetOutOfRange(coffset));
        }

        if uoffset > MAX_UOFFSET {
            return Err(TryFromU64Error::UoffsetOutOfRange(uoffset));
        }

        Ok(Self((coffset << COFFSET_SHIFT) | uoffset))
    }

    /// The compressed (BGZF) block start, in bytes from the start of the file.
    pub fn coffset(&self) -> u64 {
        self.0 >> COFFSET_SHIFT
    }

    /// The offset into the block's uncompressed data.
    pub fn uoffset(&self) -> u64 {
        self.0 & UOFFSET_MASK
    }

    /// The raw packed `u64` value.
    pub fn voffset(&self) -> u64 {
        self.0
    }

    /// Reinterprets 8 little-endian bytes as a virtual position.
    pub fn from_bytes(buf: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(buf))
    }

    /// Decodes a buffer whose length is a multiple of 8 into a list of
    /// virtual positions.
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Self>, DecodeBufferError> {
        let width = mem::size_of::<u64>();

        if buf.len() % width != 0 {
            return Err(DecodeBufferError::LengthNotMultiple {
                len: buf.len(),
                width,
            });
        }

        Ok(buf
            .chunks_exact(width)
            .map(|chunk| Self(LittleEndian::read_u64(chunk)))
            .collect())
    }

    /// Decodes a buffer whose length is a multiple of 16 into a list of
    /// half-open `(start, end)` chunk boundaries.
    pub fn decode_chunks(buf: &[u8]) -> Result<Vec<(Self, Self)>, DecodeBufferError> {
        let width = 2 * mem::size_of::<u64>();

        if buf.len() % width != 0 {
            return Err(DecodeBufferError::LengthNotMultiple {
                len: buf.len(),
                width,
            });
        }

        Ok(buf
            .chunks_exact(width)
            .map(|chunk| {
                let start = Self(LittleEndian::read_u64(&chunk[..8]));
                let end = Self(LittleEndian::read_u64(&chunk[8..]));
                (start, end)
            })
            .collect())
    }
}

impl From<u64> for VirtualPosition {
    fn from(voffset: u64) -> Self {
        Self(voffset)
    }
}

impl From<VirtualPosition> for u64 {
    fn from(pos: VirtualPosition) -> Self {
        pos.0
    }
}

/// An error constructing a [`VirtualPosition`] from out-of-range subfields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TryFromU64Error {
    /// `coffset` does not fit in 48 bits.
    CoffsetOutOfRange(u64),
    /// `uoffset` does not fit in 16 bits.
    UoffsetOutOfRange(u64),
}

impl error::Error for TryFromU64Error {}

impl fmt::Display for TryFromU64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoffsetOutOfRange(n) => write!(f, "coffset out of range: {n}"),
            Self::UoffsetOutOfRange(n) => write!(f, "uoffset out of range: {n}"),
        }
    }
}

/// An error decoding a bulk buffer of virtual positions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeBufferError {
    /// The buffer length is not a multiple of the expected item width.
    LengthNotMultiple { len: usize, width: usize },
}

impl error::Error for DecodeBufferError {}

impl fmt::Display for DecodeBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
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
    fn test_try_new() -> Result<(), TryFromU64Error> {
        let pos = VirtualPosition::try_new(0x123456789ABC, 0x0042)?;
        assert_eq!(pos.coffset(), 0x123456789ABC);
        assert_eq!(pos.uoffset(), 0x0042);
        assert_eq!(pos.voffset(), 0x123456789ABC0042);

        assert_eq!(
            VirtualPosition::try_new(1 << 48, 0),
            Err(TryFromU64Error::CoffsetOutOfRange(1 << 48))
        );
        assert_eq!(
            VirtualPosition::try_new(0, 1 << 16),
            Err(TryFromU64Error::UoffsetOutOfRange(1 << 16))
        );

        Ok(())
    }

    #[test]
    fn test_from_bytes() {
        let pos = VirtualPosition::from_bytes([0x42, 0x00, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(pos.coffset(), 0x123456789ABC);
        assert_eq!(pos.uoffset(), 0x0042);
    }

    #[test]
    fn test_decode_all() -> Result<(), Box<dyn std::error::Error>> {
        let buf = [
            0x42, 0x00, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        ];

        let positions = VirtualPosition::decode_all(&buf)?;
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].coffset(), 0x123456789ABC);
        assert_eq!(positions[1], VirtualPosition::from(0));

        assert!(matches!(
            VirtualPosition::decode_all(&buf[..12]),
            Err(DecodeBufferError::LengthNotMultiple { len: 12, width: 8 })
        ));

        Ok(())
    }

    #[test]
    fn test_decode_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&100u64.to_le_bytes());

        let chunks = VirtualPosition::decode_chunks(&buf)?;
        assert_eq!(chunks, vec![(VirtualPosition::from(0), VirtualPosition::from(100))]);

        assert!(matches!(
            VirtualPosition::decode_chunks(&buf[..8]),
            Err(DecodeBufferError::LengthNotMultiple { len: 8, width: 16 })
        ));

        Ok(())
    }
}
