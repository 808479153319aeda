//! The auxiliary tag block: a concatenation of TLV entries following a
//! record's mandatory fields.

pub mod field;

use std::{error, fmt, str};

use byteorder::{ByteOrder, LittleEndian};

use self::field::{
    tag::{infer_default_subtype, infer_default_type},
    value::fixed_width,
    ArrayView, SetValue, Subtype, Tag, Value,
};

/// The raw `tags` blob of a record: an opaque, owned concatenation of TLV
/// entries. Typed access is performed on demand by [`Data::get`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Data(Vec<u8>);

impl Data {
    /// An empty tag block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already-serialized TLV blob, as read off the wire.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self(buf)
    }

    /// The raw TLV bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The byte length of the tag block.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up and decodes a tag by key.
    pub fn get(&self, tag: Tag) -> Result<Value<'_>, GetError> {
        let start = find_tag(&self.0, tag.as_bytes())
            .map_err(GetError::Read)?
            .ok_or(GetError::NotFound)?;

        if self.0[start + 2] == b'H' {
            return Err(GetError::NotImplemented);
        }

        let (value, _) = decode_value(&self.0, start).map_err(GetError::Read)?;
        Ok(value)
    }

    /// Whether `tag` is present.
    pub fn contains(&self, tag: Tag) -> Result<bool, ReadError> {
        Ok(find_tag(&self.0, tag.as_bytes())?.is_some())
    }

    /// Iterates over the raw `(Tag, Value)` pairs, in storage order.
    pub fn iter(&self) -> Iter<'_> {
        Iter { buf: &self.0, pos: 0 }
    }

    /// Builds the replacement tag block for `set_tag(tag, value, ty)`,
    /// without mutating `self`.
    ///
    /// If `ty` is omitted, the type is derived first from the per-key
    /// default-type table, then from `value`'s own natural type. The
    /// existing tag, if any, is removed and the new TLV is appended at the
    /// end; tag order is not wire-significant.
    pub fn with_tag_set(&self, tag: Tag, value: &SetValue) -> Result<Self, SetTagError> {
        self.with_tag_set_typed(tag, value, None)
    }

    /// As [`Data::with_tag_set`], but with an explicit `(type, subtype)`
    /// override instead of type inference.
    pub fn with_tag_set_typed(
        &self,
        tag: Tag,
        value: &SetValue,
        ty: Option<(u8, Option<u8>)>,
    ) -> Result<Self, SetTagError> {
        let want = match ty {
            Some(want) => want,
            None => {
                let key = tag.as_bytes();
                match infer_default_type(key) {
                    Some(b'B') => (b'B', infer_default_subtype(key)),
                    Some(t) => (t, None),
                    None => value.default_type(),
                }
            }
        };

        let resolved = if value.default_type() == want {
            value.clone()
        } else {
            value
                .coerce(want)
                .ok_or(SetTagError::IncompatibleType { wanted: want.0 })?
        };

        let mut scratch = Vec::with_capacity(2 + 1 + resolved.encoded_len());
        scratch.extend_from_slice(&tag.as_bytes());
        scratch.push(resolved.default_type().0);
        resolved.write_to(&mut scratch).map_err(SetTagError::Encode)?;

        let existing = find_tag(&self.0, tag.as_bytes()).map_err(SetTagError::Read)?;

        let mut out = Vec::with_capacity(self.0.len() + scratch.len());

        match existing {
            Some(start) => {
                let end = skip_tag(&self.0, start).map_err(SetTagError::Read)?;
                out.extend_from_slice(&self.0[..start]);
                out.extend_from_slice(&self.0[end..]);
            }
            None => out.extend_from_slice(&self.0),
        }

        out.extend_from_slice(&scratch);

        Ok(Self(out))
    }

    /// Builds the tag block with `tag` removed, if present.
    pub fn with_tag_removed(&self, tag: Tag) -> Result<Self, ReadError> {
        match find_tag(&self.0, tag.as_bytes())? {
            Some(start) => {
                let end = skip_tag(&self.0, start)?;
                let mut out = Vec::with_capacity(self.0.len() - (end - start));
                out.extend_from_slice(&self.0[..start]);
                out.extend_from_slice(&self.0[end..]);
                Ok(Self(out))
            }
            None => Ok(self.clone()),
        }
    }
}

/// An iterator over the raw `(Tag, Value)` pairs of a [`Data`] block.
pub struct Iter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<(Tag, Value<'a>), GetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        if self.pos + 3 > self.buf.len() {
            self.pos = self.buf.len();
            return Some(Err(GetError::Read(ReadError::UnexpectedEof)));
        }

        let tag = Tag::new([self.buf[self.pos], self.buf[self.pos + 1]]);
        let type_code = self.buf[self.pos + 2];

        // `skip_tag` validates this entry's bounds up front, so the
        // `decode_value` call below never indexes past `self.buf`.
        let end = match skip_tag(self.buf, self.pos) {
            Ok(end) => end,
            Err(e) => {
                self.pos = self.buf.len();
                return Some(Err(GetError::Read(e)));
            }
        };

        if type_code == b'H' {
            self.pos = end;
            return Some(Err(GetError::NotImplemented));
        }

        match decode_value(self.buf, self.pos) {
            Ok((value, _)) => {
                self.pos = end;
                Some(Ok((tag, value)))
            }
            Err(e) => {
                self.pos = self.buf.len();
                Some(Err(GetError::Read(e)))
            }
        }
    }
}

/// Returns the offset just past the TLV entry starting at `start`.
pub fn skip_tag(buf: &[u8], start: usize) -> Result<usize, ReadError> {
    if start + 3 > buf.len() {
        return Err(ReadError::UnexpectedEof);
    }

    let type_code = buf[start + 2];
    let value_start = start + 3;

    match type_code {
        b'Z' | b'H' => {
            let rest = &buf[value_start..];
            let nul = memchr::memchr(0, rest).ok_or(ReadError::UnexpectedEof)?;
            Ok(value_start + nul + 1)
        }
        b'B' => {
            if value_start + 5 > buf.len() {
                return Err(ReadError::UnexpectedEof);
            }

            let subtype = Subtype::try_from(buf[value_start]).map_err(ReadError::InvalidSubtype)?;
            let count = LittleEndian::read_u32(&buf[value_start + 1..value_start + 5]) as usize;
            let end = value_start + 5 + count * subtype.size();

            if end > buf.len() {
                return Err(ReadError::UnexpectedEof);
            }

            Ok(end)
        }
        _ => {
            let width = fixed_width(type_code).ok_or(ReadError::InvalidType(type_code))?;
            let end = value_start + width;

            if end > buf.len() {
                return Err(ReadError::UnexpectedEof);
            }

            Ok(end)
        }
    }
}

/// Scans from the start of `buf` for a TLV entry with key `key`, returning
/// the offset of its first byte.
pub fn find_tag(buf: &[u8], key: [u8; 2]) -> Result<Option<usize>, ReadError> {
    let mut pos = 0;

    while pos < buf.len() {
        if pos + 2 > buf.len() {
            return Err(ReadError::UnexpectedEof);
        }

        let this_key = [buf[pos], buf[pos + 1]];
        let end = skip_tag(buf, pos)?;

        if this_key == key {
            return Ok(Some(pos));
        }

        pos = end;
    }

    Ok(None)
}

/// Decodes the value of the TLV entry starting at `start`, returning it
/// along with the offset just past the entry.
///
/// `H` is not decoded here; callers must check the type byte first (see
/// [`Data::get`]).
fn decode_value(buf: &[u8], start: usize) -> Result<(Value<'_>, usize), ReadError> {
    let type_code = buf[start + 2];
    let value_start = start + 3;

    match type_code {
        b'A' => Ok((Value::Char(buf[value_start]), value_start + 1)),
        b'c' => Ok((Value::Int8(buf[value_start] as i8), value_start + 1)),
        b'C' => Ok((Value::UInt8(buf[value_start]), value_start + 1)),
        b's' => Ok((
            Value::Int16(LittleEndian::read_i16(&buf[value_start..value_start + 2])),
            value_start + 2,
        )),
        b'S' => Ok((
            Value::UInt16(LittleEndian::read_u16(&buf[value_start..value_start + 2])),
            value_start + 2,
        )),
        b'i' => Ok((
            Value::Int32(LittleEndian::read_i32(&buf[value_start..value_start + 4])),
            value_start + 4,
        )),
        b'I' => Ok((
            Value::UInt32(LittleEndian::read_u32(&buf[value_start..value_start + 4])),
            value_start + 4,
        )),
        b'f' => Ok((
            Value::Float(LittleEndian::read_f32(&buf[value_start..value_start + 4])),
            value_start + 4,
        )),
        b'd' => Ok((
            Value::Double(LittleEndian::read_f64(&buf[value_start..value_start + 8])),
            value_start + 8,
        )),
        b'Z' => {
            let rest = &buf[value_start..];
            let nul = memchr::memchr(0, rest).ok_or(ReadError::UnexpectedEof)?;
            let s = str::from_utf8(&rest[..nul]).map_err(|_| ReadError::NonAscii)?;

            if !s.is_ascii() {
                return Err(ReadError::NonAscii);
            }

            Ok((Value::String(s), value_start + nul + 1))
        }
        b'H' => Err(ReadError::NotImplemented),
        b'B' => {
            if value_start + 5 > buf.len() {
                return Err(ReadError::UnexpectedEof);
            }

            let subtype = Subtype::try_from(buf[value_start]).map_err(ReadError::InvalidSubtype)?;
            let count = LittleEndian::read_u32(&buf[value_start + 1..value_start + 5]) as usize;
            let data_start = value_start + 5;
            let end = data_start + count * subtype.size();

            if end > buf.len() {
                return Err(ReadError::UnexpectedEof);
            }

            Ok((Value::Array(ArrayView::new(subtype, &buf[data_start..end])), end))
        }
        _ => Err(ReadError::InvalidType(type_code)),
    }
}

/// An error scanning or decoding the tag block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// The buffer ended inside a TLV entry.
    UnexpectedEof,
    /// A type or subtype code is not recognized.
    InvalidType(u8),
    /// A `B`-array subtype code is not recognized.
    InvalidSubtype(field::value::InvalidSubtype),
    /// A `Z` string is not valid ASCII.
    NonAscii,
    /// The entry is a well-formed `H` (hex string); decoding it is not
    /// implemented.
    NotImplemented,
}

impl error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of tag data"),
            Self::InvalidType(c) => write!(f, "invalid tag type: {:?}", *c as char),
            Self::InvalidSubtype(e) => write!(f, "{e}"),
            Self::NonAscii => write!(f, "tag string is not ASCII"),
            Self::NotImplemented => write!(f, "decoding H tags is not implemented"),
        }
    }
}

/// An error looking up or decoding a tag via [`Data::get`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GetError {
    /// No tag with that key is present.
    NotFound,
    /// The tag is an `H` (hex string); decoding it is not implemented.
    NotImplemented,
    /// The tag block is malformed.
    Read(ReadError),
}

impl error::Error for GetError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "tag not found"),
            Self::NotImplemented => write!(f, "decoding H tags is not implemented"),
            Self::Read(e) => write!(f, "{e}"),
        }
    }
}

/// An error replacing, inserting, or deleting a tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SetTagError {
    /// The value could not be encoded.
    Encode(field::value::EncodeError),
    /// The resolved type is not reachable from the supplied value.
    IncompatibleType { wanted: u8 },
    /// The existing tag block is malformed.
    Read(ReadError),
}

impl error::Error for SetTagError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SetTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "{e}"),
            Self::IncompatibleType { wanted } => {
                write!(f, "value cannot be encoded as type {:?}", *wanted as char)
            }
            Self::Read(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_replace() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new();
        let data = data.with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(2))?;

        assert_eq!(data.as_bytes(), b"NMi\x02\x00\x00\x00");
        assert_eq!(data.get(Tag::new(*b"NM"))?, Value::Int32(2));

        let data = data.with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(5))?;
        assert_eq!(data.len(), 7);
        assert_eq!(data.get(Tag::new(*b"NM"))?, Value::Int32(5));

        Ok(())
    }

    #[test]
    fn test_set_tag_appends_second_unrelated() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new()
            .with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(2))?
            .with_tag_set(Tag::new(*b"MD"), &SetValue::String("10M".into()))?;

        assert_eq!(data.get(Tag::new(*b"NM"))?, Value::Int32(2));
        assert_eq!(data.get(Tag::new(*b"MD"))?, Value::String("10M"));

        let data = data.with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(9))?;
        assert_eq!(data.get(Tag::new(*b"NM"))?, Value::Int32(9));
        assert_eq!(data.get(Tag::new(*b"MD"))?, Value::String("10M"));

        Ok(())
    }

    #[test]
    fn test_get_not_found() {
        let data = Data::new();
        assert_eq!(data.get(Tag::new(*b"NM")), Err(GetError::NotFound));
    }

    #[test]
    fn test_h_not_implemented() -> Result<(), Box<dyn std::error::Error>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ZHH");
        buf.extend_from_slice(b"CAFE\x00");
        let data = Data::from_bytes(buf);

        assert_eq!(data.get(Tag::new(*b"ZH")), Err(GetError::NotImplemented));

        Ok(())
    }

    #[test]
    fn test_default_type_inference() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new().with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(2))?;
        assert_eq!(data.as_bytes()[2], b'i');

        let data = Data::new().with_tag_set(
            Tag::new(*b"ZZ"),
            &SetValue::String("hi".into()),
        )?;
        assert_eq!(data.as_bytes()[2], b'Z');

        Ok(())
    }

    #[test]
    fn test_array_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new().with_tag_set(
            Tag::new(*b"ZB"),
            &SetValue::UInt8Array(vec![1, 2, 3]),
        )?;

        match data.get(Tag::new(*b"ZB"))? {
            Value::Array(view) => {
                assert_eq!(view.len(), 3);
                let elems: Vec<_> = view.iter().collect();
                assert_eq!(
                    elems,
                    vec![
                        field::Element::UInt8(1),
                        field::Element::UInt8(2),
                        field::Element::UInt8(3)
                    ]
                );
            }
            other => panic!("unexpected value: {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_remove() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new().with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(2))?;
        let data = data.with_tag_removed(Tag::new(*b"NM"))?;
        assert!(data.is_empty());
        Ok(())
    }

    #[test]
    fn test_iter() -> Result<(), Box<dyn std::error::Error>> {
        let data = Data::new()
            .with_tag_set(Tag::new(*b"NM"), &SetValue::Int32(2))?
            .with_tag_set(Tag::new(*b"MD"), &SetValue::String("10M".into()))?;

        let pairs: Result<Vec<_>, _> = data.iter().collect();
        let pairs = pairs?;

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (Tag::new(*b"NM"), Value::Int32(2)));
        assert_eq!(pairs[1], (Tag::new(*b"MD"), Value::String("10M")));

        Ok(())
    }

    #[test]
    fn test_iter_truncated_entry_does_not_panic() {
        // A well-formed key and type byte for a 4-byte `i` value, but only
        // one content byte actually present.
        let data = Data::from_bytes(vec![b'N', b'M', b'i', 0x01]);

        let results: Vec<_> = data.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(GetError::Read(ReadError::UnexpectedEof))
        ));
    }

    #[test]
    fn test_iter_dangling_key_does_not_panic() {
        // Fewer than 3 bytes remain: not even a full key+type.
        let data = Data::from_bytes(vec![b'N', b'M']);

        let results: Vec<_> = data.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(GetError::Read(ReadError::UnexpectedEof))
        ));
    }
}
