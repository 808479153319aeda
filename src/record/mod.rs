//! A single BAM alignment record.

pub mod cigar;
pub mod data;
pub mod sequence;

use std::{error, fmt};

pub use self::{cigar::Cigar, data::Data, sequence::Sequence};
use self::data::field::{SetValue, Tag};
use crate::{ascii, Flags};

/// `ref_id`/`next_ref_id` sentinel meaning "unmapped"/"none".
pub const UNMAPPED_REFERENCE_SEQUENCE_ID: i32 = -1;
/// `pos`/`next_pos` sentinel meaning "unset".
pub const UNMAPPED_POSITION: i32 = -1;
/// `mapq` sentinel meaning "not available".
pub const MISSING_MAPPING_QUALITY: u8 = 255;
/// The `bin` value htslib assigns an unplaced read.
pub const UNMAPPED_BIN: u16 = 4680;

/// Byte count of the fixed header from `ref_id` through `tlen`, inclusive
/// (`block_size` excludes its own 4 bytes but includes this span).
const FIXED_FIELDS_LEN: u64 = 32;

/// The maximum number of inline CIGAR operations (`n_cigar_op` is a `u16`).
const MAX_N_CIGAR_OP: usize = u16::MAX as usize;
/// The maximum read-name length, including the trailing NUL (`l_read_name`
/// is a `u8`).
const MAX_L_READ_NAME: usize = u8::MAX as usize;

/// One aligned read.
///
/// A `Record` owns all of its variable-length fields. The fixed integer
/// fields (`ref_id`, `pos`, `mapq`, `bin`, `flag`, `next_ref_id`,
/// `next_pos`, `tlen`) are read-only outside of [`Builder`]; only
/// `read_name`, `cigar`, the sequence/quality pair, and `tags` can be
/// mutated after construction, each through a setter that keeps
/// `block_size` consistent with the record's current contents.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    ref_id: i32,
    pos: i32,
    mapq: u8,
    bin: u16,
    flag: Flags,
    next_ref_id: i32,
    next_pos: i32,
    tlen: i32,
    read_name: Vec<u8>,
    cigar: Cigar,
    sequence: Sequence,
    quality_scores: Vec<u8>,
    tags: Data,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            ref_id: UNMAPPED_REFERENCE_SEQUENCE_ID,
            pos: UNMAPPED_POSITION,
            mapq: MISSING_MAPPING_QUALITY,
            bin: UNMAPPED_BIN,
            flag: Flags::UNMAPPED,
            next_ref_id: UNMAPPED_REFERENCE_SEQUENCE_ID,
            next_pos: UNMAPPED_POSITION,
            tlen: 0,
            read_name: b"*".to_vec(),
            cigar: Cigar::new(),
            sequence: Sequence::new(),
            quality_scores: Vec::new(),
            tags: Data::new(),
        }
    }
}

impl Record {
    /// Starts building a record field by field.
    pub fn builder() -> Builder {
        Builder::default()
    }

    // -- fixed fields, read-only --

    /// The reference sequence ID, or `None` if unmapped.
    pub fn reference_sequence_id(&self) -> Option<usize> {
        usize::try_from(self.ref_id).ok()
    }

    /// The raw `ref_id` field, `-1` meaning unmapped.
    pub fn ref_id(&self) -> i32 {
        self.ref_id
    }

    /// The 0-based alignment position, or `None` if unset.
    pub fn position(&self) -> Option<usize> {
        usize::try_from(self.pos).ok()
    }

    /// The raw `pos` field, `-1` meaning unset.
    pub fn pos(&self) -> i32 {
        self.pos
    }

    /// The mapping quality, or `None` if not available (`mapq == 255`).
    pub fn mapping_quality(&self) -> Option<u8> {
        (self.mapq != MISSING_MAPPING_QUALITY).then_some(self.mapq)
    }

    /// The raw `mapq` byte.
    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    /// The `bin` field.
    pub fn bin(&self) -> u16 {
        self.bin
    }

    /// The number of CIGAR operations stored inline.
    pub fn n_cigar_op(&self) -> u16 {
        self.cigar.len() as u16
    }

    /// The alignment flags.
    pub fn flags(&self) -> Flags {
        self.flag
    }

    /// The nucleotide count.
    pub fn l_seq(&self) -> u32 {
        self.sequence.len() as u32
    }

    /// The mate's reference sequence ID, or `None` if unmapped.
    pub fn mate_reference_sequence_id(&self) -> Option<usize> {
        usize::try_from(self.next_ref_id).ok()
    }

    /// The raw `next_ref_id` field.
    pub fn next_ref_id(&self) -> i32 {
        self.next_ref_id
    }

    /// The mate's 0-based alignment position, or `None` if unset.
    pub fn mate_position(&self) -> Option<usize> {
        usize::try_from(self.next_pos).ok()
    }

    /// The raw `next_pos` field.
    pub fn next_pos(&self) -> i32 {
        self.next_pos
    }

    /// The template length.
    pub fn template_length(&self) -> i32 {
        self.tlen
    }

    // -- flag predicates --

    /// The template has multiple segments in sequencing.
    pub fn is_paired(&self) -> bool {
        self.flag.contains(Flags::PAIRED)
    }

    /// Each segment is properly aligned according to the aligner.
    pub fn is_proper_pair(&self) -> bool {
        self.flag.contains(Flags::PROPER_PAIR)
    }

    /// This segment is unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.flag.contains(Flags::UNMAPPED)
    }

    /// The sequence is reverse complemented.
    pub fn is_reverse(&self) -> bool {
        self.flag.contains(Flags::REVERSE)
    }

    /// The mate is unmapped.
    pub fn is_mate_unmapped(&self) -> bool {
        self.flag.contains(Flags::MATE_UNMAPPED)
    }

    /// The mate's sequence is reverse complemented.
    pub fn is_mate_reverse(&self) -> bool {
        self.flag.contains(Flags::MATE_REVERSE)
    }

    /// This is the first segment in the template.
    pub fn is_read1(&self) -> bool {
        self.flag.contains(Flags::READ1)
    }

    /// This is the last segment in the template.
    pub fn is_read2(&self) -> bool {
        self.flag.contains(Flags::READ2)
    }

    /// This is a secondary alignment.
    pub fn is_secondary(&self) -> bool {
        self.flag.contains(Flags::SECONDARY)
    }

    /// This read failed a quality control check.
    pub fn is_qc_fail(&self) -> bool {
        self.flag.contains(Flags::QC_FAIL)
    }

    /// This read is a PCR or optical duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.flag.contains(Flags::DUPLICATE)
    }

    /// This is a supplementary alignment.
    pub fn is_supplementary(&self) -> bool {
        self.flag.contains(Flags::SUPPLEMENTARY)
    }

    // -- variable fields --

    /// The read name, without its trailing NUL.
    pub fn read_name(&self) -> &[u8] {
        &self.read_name
    }

    /// The CIGAR.
    ///
    /// Returns [`NotImplementedError`] if this record uses the long-CIGAR
    /// `CG`-tag overflow encoding: this core does not expand it.
    /// [`Record::cigar_raw`] returns the stored placeholder as-is (it must
    /// still round-trip through [`Record::to_bytes`] byte-exact).
    pub fn cigar(&self) -> Result<&Cigar, NotImplementedError> {
        if cigar::is_overflow_placeholder(&self.cigar, self.sequence.len()) {
            return Err(NotImplementedError);
        }

        Ok(&self.cigar)
    }

    /// The stored CIGAR, bypassing the long-CIGAR overflow check.
    pub fn cigar_raw(&self) -> &Cigar {
        &self.cigar
    }

    /// The packed nucleotide sequence.
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// The per-base quality scores (Phred+0), or empty if absent (in which
    /// case [`Record::to_bytes`] fills the wire `qual` field with `0xff`).
    pub fn quality_scores(&self) -> &[u8] {
        &self.quality_scores
    }

    /// The auxiliary tag block.
    pub fn data(&self) -> &Data {
        &self.tags
    }

    /// Looks up and decodes a tag.
    pub fn get_tag(&self, tag: Tag) -> Result<data::field::Value<'_>, data::GetError> {
        self.tags.get(tag)
    }

    // -- sizes --

    /// `block_size`: the length of this record on the wire, excluding the
    /// `block_size` field itself. Always recomputed from the current
    /// contents, so it can never drift out of sync with them.
    pub fn block_size(&self) -> u64 {
        self.fixed_len() + self.tags.len() as u64
    }

    /// `block_size` minus the tag block's length: everything through `qual`.
    fn fixed_len(&self) -> u64 {
        let l_read_name = self.read_name.len() as u64 + 1;
        let cigar_bytes = self.cigar.encoded_len() as u64;
        let l_seq = u64::from(self.l_seq());
        let seq_bytes = (l_seq + 1) / 2;

        FIXED_FIELDS_LEN + l_read_name + cigar_bytes + seq_bytes + l_seq
    }

    // -- mutators --

    /// Replaces the read name.
    pub fn set_read_name(&mut self, name: &[u8]) -> Result<(), SetReadNameError> {
        if name.len() + 1 > MAX_L_READ_NAME {
            return Err(SetReadNameError::TooLong(name.len()));
        }

        if !ascii::is_ascii(name) {
            return Err(SetReadNameError::NotAscii);
        }

        self.read_name = name.to_vec();

        Ok(())
    }

    /// Replaces the CIGAR.
    pub fn set_cigar(&mut self, cigar: Cigar) -> Result<(), SetCigarError> {
        if cigar.len() > MAX_N_CIGAR_OP {
            return Err(SetCigarError::TooManyOps(cigar.len()));
        }

        self.cigar = cigar;

        Ok(())
    }

    /// Replaces the sequence and, optionally, its quality scores.
    ///
    /// `qual`, if given, must have the same length as `seq`; if omitted, the
    /// wire `qual` field is filled with `0xff` on serialization.
    pub fn set_sequence(
        &mut self,
        seq: Sequence,
        qual: Option<Vec<u8>>,
    ) -> Result<(), SetSequenceError> {
        if let Some(q) = &qual {
            if q.len() != seq.len() {
                return Err(SetSequenceError::QualityLengthMismatch {
                    seq: seq.len(),
                    qual: q.len(),
                });
            }
        }

        self.sequence = seq;
        self.quality_scores = qual.unwrap_or_default();

        Ok(())
    }

    /// Builds a record directly from already-validated wire fields, as
    /// decoded by [`crate::reader::record::read_record`]. Every field here
    /// has already passed the structural checks the public setters would
    /// otherwise perform (read-name ASCII/length, `n_cigar_op` fitting a
    /// `u16`, `qual`/`seq` length agreement), so this bypasses them.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_raw_parts(
        ref_id: i32,
        pos: i32,
        mapq: u8,
        bin: u16,
        flag: Flags,
        next_ref_id: i32,
        next_pos: i32,
        tlen: i32,
        read_name: Vec<u8>,
        cigar: Cigar,
        sequence: Sequence,
        quality_scores: Vec<u8>,
        tags: Data,
    ) -> Self {
        Self {
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
        }
    }

    /// Inserts or replaces a tag, deriving its wire type from a per-key
    /// default-type table and then from `value`'s own type.
    pub fn set_tag(&mut self, tag: Tag, value: SetValue) -> Result<(), SetTagError> {
        self.apply_tags(self.tags.with_tag_set(tag, &value))
    }

    /// As [`Record::set_tag`], with an explicit `(type, subtype)` override.
    pub fn set_tag_typed(
        &mut self,
        tag: Tag,
        value: SetValue,
        ty: (u8, Option<u8>),
    ) -> Result<(), SetTagError> {
        self.apply_tags(self.tags.with_tag_set_typed(tag, &value, Some(ty)))
    }

    /// Removes a tag, if present. Returns whether a tag was removed.
    pub fn remove_tag(&mut self, tag: Tag) -> Result<bool, data::ReadError> {
        let new_tags = self.tags.with_tag_removed(tag)?;
        let removed = new_tags.len() != self.tags.len();
        self.tags = new_tags;
        Ok(removed)
    }

    fn apply_tags(
        &mut self,
        new_tags: Result<Data, data::SetTagError>,
    ) -> Result<(), SetTagError> {
        let new_tags = new_tags.map_err(SetTagError::Data)?;
        let prospective = self.fixed_len() + new_tags.len() as u64;

        if prospective > u64::from(u32::MAX) {
            return Err(SetTagError::BlockSizeOverflow);
        }

        self.tags = new_tags;

        Ok(())
    }

    /// Serializes this record to its exact wire representation: the 36-byte
    /// fixed header, then `read_name`+NUL, `cigar`, packed `seq`, `qual`,
    /// then `tags`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.block_size() as usize + 4);
        crate::writer::record::write_record(&mut buf, self)
            .expect("writing to a Vec<u8> is infallible");
        buf
    }
}

/// Builds a [`Record`] field by field.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    record: Record,
}

impl Builder {
    /// Sets `ref_id`.
    pub fn set_reference_sequence_id(mut self, ref_id: i32) -> Self {
        self.record.ref_id = ref_id;
        self
    }

    /// Sets `pos`.
    pub fn set_position(mut self, pos: i32) -> Self {
        self.record.pos = pos;
        self
    }

    /// Sets `mapq`.
    pub fn set_mapping_quality(mut self, mapq: u8) -> Self {
        self.record.mapq = mapq;
        self
    }

    /// Sets `bin`.
    pub fn set_bin(mut self, bin: u16) -> Self {
        self.record.bin = bin;
        self
    }

    /// Sets `flag`.
    pub fn set_flags(mut self, flags: Flags) -> Self {
        self.record.flag = flags;
        self
    }

    /// Sets `next_ref_id`.
    pub fn set_mate_reference_sequence_id(mut self, next_ref_id: i32) -> Self {
        self.record.next_ref_id = next_ref_id;
        self
    }

    /// Sets `next_pos`.
    pub fn set_mate_position(mut self, next_pos: i32) -> Self {
        self.record.next_pos = next_pos;
        self
    }

    /// Sets `tlen`.
    pub fn set_template_length(mut self, tlen: i32) -> Self {
        self.record.tlen = tlen;
        self
    }

    /// Sets the read name.
    pub fn set_read_name(mut self, name: &[u8]) -> Result<Self, SetReadNameError> {
        self.record.set_read_name(name)?;
        Ok(self)
    }

    /// Sets the CIGAR.
    pub fn set_cigar(mut self, cigar: Cigar) -> Result<Self, SetCigarError> {
        self.record.set_cigar(cigar)?;
        Ok(self)
    }

    /// Sets the sequence and, optionally, its quality scores.
    pub fn set_sequence(
        mut self,
        seq: Sequence,
        qual: Option<Vec<u8>>,
    ) -> Result<Self, SetSequenceError> {
        self.record.set_sequence(seq, qual)?;
        Ok(self)
    }

    /// Sets the auxiliary tag block wholesale.
    pub fn set_data(mut self, tags: Data) -> Self {
        self.record.tags = tags;
        self
    }

    /// Finishes building, producing the record.
    pub fn build(self) -> Record {
        self.record
    }
}

/// The CIGAR is stored via the long-CIGAR `CG`-tag overflow encoding, which
/// this core does not expand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NotImplementedError;

impl error::Error for NotImplementedError {}

impl fmt::Display for NotImplementedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "long CIGAR (CG tag) expansion is not implemented")
    }
}

/// An error setting the read name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetReadNameError {
    /// `len(name) + 1` does not fit in a `u8`.
    TooLong(usize),
    /// `name` is not ASCII.
    NotAscii,
}

impl error::Error for SetReadNameError {}

impl fmt::Display for SetReadNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong(len) => write!(f, "read name too long: {len} bytes"),
            Self::NotAscii => write!(f, "read name is not ASCII"),
        }
    }
}

/// An error setting the CIGAR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetCigarError {
    /// `n_cigar_op` does not fit in a `u16`.
    TooManyOps(usize),
}

impl error::Error for SetCigarError {}

impl fmt::Display for SetCigarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyOps(n) => write!(f, "too many CIGAR ops: {n}"),
        }
    }
}

/// An error setting the sequence and quality scores.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetSequenceError {
    /// The supplied quality array's length does not match the sequence's.
    QualityLengthMismatch { seq: usize, qual: usize },
}

impl error::Error for SetSequenceError {}

impl fmt::Display for SetSequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QualityLengthMismatch { seq, qual } => write!(
                f,
                "quality scores length mismatch: expected {seq}, got {qual}"
            ),
        }
    }
}

/// An error setting a tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SetTagError {
    /// The tag codec rejected the value or an existing malformed tag block.
    Data(data::SetTagError),
    /// The resulting `block_size` would exceed `u32::MAX`.
    BlockSizeOverflow,
}

impl error::Error for SetTagError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Data(e) => Some(e),
            Self::BlockSizeOverflow => None,
        }
    }
}

impl fmt::Display for SetTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(e) => write!(f, "{e}"),
            Self::BlockSizeOverflow => write!(f, "block_size would exceed u32::MAX"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_block_size() {
        let record = Record::default();
        assert_eq!(record.block_size(), 34);
    }

    #[test]
    fn test_write_record_with_default_fields() -> Result<(), Box<dyn std::error::Error>> {
        let record = Record::default();
        let buf = record.to_bytes();

        let expected = [
            0x22, 0x00, 0x00, 0x00, // block_size = 34
            0xff, 0xff, 0xff, 0xff, // ref_id = -1
            0xff, 0xff, 0xff, 0xff, // pos = -1
            0x02, // l_read_name = 2
            0xff, // mapq = 255
            0x48, 0x12, // bin = 4680
            0x00, 0x00, // n_cigar_op = 0
            0x04, 0x00, // flag = 4
            0x00, 0x00, 0x00, 0x00, // l_seq = 0
            0xff, 0xff, 0xff, 0xff, // next_ref_id = -1
            0xff, 0xff, 0xff, 0xff, // next_pos = -1
            0x00, 0x00, 0x00, 0x00, // tlen = 0
            0x2a, 0x00, // read_name = "*\x00"
        ];

        assert_eq!(buf, expected);

        Ok(())
    }

    #[test]
    fn test_write_record_with_all_fields() -> Result<(), Box<dyn std::error::Error>> {
        use self::cigar::{Kind, Op};
        use self::data::field::{SetValue, Tag};
        use self::sequence::Base;

        let cigar = Cigar::from_ops([Op::new(Kind::Match, 3)?, Op::new(Kind::SoftClip, 1)?]);

        let mut sequence = Sequence::new();
        for base in [Base::A, Base::C, Base::G, Base::T] {
            sequence.push(base);
        }

        let qual = vec![
            b'N' - 33,
            b'D' - 33,
            b'L' - 33,
            b'S' - 33,
        ];

        let mut record = Record::builder()
            .set_reference_sequence_id(1)
            .set_position(8)
            .set_mapping_quality(13)
            .set_bin(6765)
            .set_flags(Flags::PAIRED | Flags::READ1)
            .set_mate_reference_sequence_id(1)
            .set_mate_position(21)
            .set_template_length(144)
            .set_read_name(b"r0")?
            .set_cigar(cigar)?
            .set_sequence(sequence, Some(qual))?
            .build();

        record.set_tag(Tag::new(*b"NH"), SetValue::Int32(1))?;

        let buf = record.to_bytes();

        let expected = [
            0x38, 0x00, 0x00, 0x00, // block_size = 56
            0x01, 0x00, 0x00, 0x00, // ref_id = 1
            0x08, 0x00, 0x00, 0x00, // pos = 8
            0x03, // l_read_name = 3
            0x0d, // mapq = 13
            0x6d, 0x1a, // bin = 6765
            0x02, 0x00, // n_cigar_op = 2
            0x41, 0x00, // flag = 65
            0x04, 0x00, 0x00, 0x00, // l_seq = 4
            0x01, 0x00, 0x00, 0x00, // next_ref_id = 1
            0x15, 0x00, 0x00, 0x00, // next_pos = 21
            0x90, 0x00, 0x00, 0x00, // tlen = 144
            b'r', b'0', 0x00, // read_name = "r0\x00"
            0x30, 0x00, 0x00, 0x00, // cigar[0] = 3M
            0x14, 0x00, 0x00, 0x00, // cigar[1] = 1S
            0x12, 0x48, // seq = ACGT
            0x2d, 0x23, 0x2b, 0x32, // qual = NDLS
            b'N', b'H', b'i', 0x01, 0x00, 0x00, 0x00, // data[0] = NH:i:1
        ];

        assert_eq!(buf, expected);

        Ok(())
    }

    #[test]
    fn test_cigar_overflow_not_implemented() -> Result<(), Box<dyn std::error::Error>> {
        use self::cigar::{Kind, Op};
        use self::sequence::Base;

        let mut sequence = Sequence::new();
        for base in [Base::A, Base::C, Base::G, Base::T] {
            sequence.push(base);
        }

        let cigar = Cigar::from_ops([Op::new(Kind::SoftClip, 4)?, Op::new(Kind::Skip, 8)?]);

        let record = Record::builder()
            .set_sequence(sequence, None)?
            .set_cigar(cigar)?
            .build();

        assert!(matches!(record.cigar(), Err(NotImplementedError)));
        assert!(record.cigar_raw().len() == 2);

        Ok(())
    }

    #[test]
    fn test_set_read_name_validates() {
        let mut record = Record::default();
        assert!(matches!(
            record.set_read_name(b"\xffbad"),
            Err(SetReadNameError::NotAscii)
        ));

        let long = vec![b'a'; 255];
        assert!(matches!(
            record.set_read_name(&long),
            Err(SetReadNameError::TooLong(255))
        ));
    }

    #[test]
    fn test_set_tag_recomputes_block_size() -> Result<(), Box<dyn std::error::Error>> {
        use self::data::field::{SetValue, Tag};

        let mut record = Record::default();
        let before = record.block_size();

        record.set_tag(Tag::new(*b"NM"), SetValue::Int32(2))?;
        assert_eq!(record.block_size(), before + 7);
        assert_eq!(record.get_tag(Tag::new(*b"NM"))?, data::field::Value::Int32(2));

        Ok(())
    }
}
