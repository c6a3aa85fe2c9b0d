//! Value serialization and type tagging
//!
//! Every argument and return value crosses the wire as a [`TaggedValue`]:
//! the value's serialized bytes together with a type tag string. Peers
//! compare tags by equality only; a call whose
//! tags do not match the registered handler's signature is refused before
//! the handler runs.
//!
//! [`Serializable`] is the extension point. The crate implements it for the
//! fixed-width primitives, `bool`, `()`, `String` and `Vec<T>`; anything
//! else either implements the trait by hand or uses the
//! [`impl_serializable!`](crate::impl_serializable) field-by-field macro.
// (c) 2025 Ross Younger

use std::borrow::Cow;

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

/// Tag of the unit type. A handler that returns `()` declares this as its
/// return tag, and its response carries an empty return array.
pub const UNIT_TAG: &str = "unit";

/// Failure of a value to serialize or deserialize
#[derive(thiserror::Error, Debug)]
pub enum SerialError {
    /// The payload is not the right length for a fixed-width type
    #[error("payload of {actual} bytes where {expected} were expected")]
    WrongLength {
        /// the size of the target type
        expected: usize,
        /// what actually arrived
        actual: usize,
    },
    /// A boolean payload held something other than 0 or 1
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// A string payload was not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// A container payload was not a valid subdocument
    #[error("container payload did not parse: {0}")]
    Subdocument(#[from] serde_json::Error),
    /// A payload that should have been hex-encoded was not
    #[error("payload is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The tag on the wire is not the tag of the requested type
    #[error("type tag mismatch: expected {expected:?}, found {found:?}")]
    TagMismatch {
        /// tag of the type the caller asked for
        expected: String,
        /// tag that was actually carried
        found: String,
    },
    /// A field's length prefix ran past the end of the payload
    #[error("field extends past the end of the payload")]
    Truncated,
    /// Bytes were left over after the last field was decoded
    #[error("trailing bytes after the last field")]
    TrailingBytes,
    /// A user-supplied implementation refused the value
    #[error("{0}")]
    Custom(String),
}

/// A type that can travel as an argument or return value.
///
/// Implementations must uphold the round-trip law:
/// `from_bytes(&to_bytes(v)?)? == v` for every value `v`.
///
/// Tags are opaque to the protocol; only equality matters. They must be
/// deterministic, distinct for structurally distinct types, and identical
/// between peers compiled against the same type definitions. Do not derive
/// them from compiler-provided type names.
pub trait Serializable: Sized {
    /// The wire tag for this type
    fn type_tag() -> Cow<'static, str>;
    /// Serialize into a byte string
    fn to_bytes(&self) -> Result<Vec<u8>, SerialError>;
    /// Deserialize from a byte string
    fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError>;
}

/// One value as carried in an envelope array: a type tag plus the
/// serialized payload. Created whole, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedValue {
    tag: String,
    payload: Vec<u8>,
}

impl TaggedValue {
    /// Encodes a native value
    pub fn encode<T: Serializable>(value: &T) -> Result<Self, SerialError> {
        Ok(Self {
            tag: T::type_tag().into_owned(),
            payload: value.to_bytes()?,
        })
    }

    /// Decodes back to a native value, refusing a tag mismatch first
    pub fn decode<T: Serializable>(&self) -> Result<T, SerialError> {
        let expected = T::type_tag();
        if self.tag != expected {
            return Err(SerialError::TagMismatch {
                expected: expected.into_owned(),
                found: self.tag.clone(),
            });
        }
        T::from_bytes(&self.payload)
    }

    /// Reassembles a value that arrived off the wire
    pub fn from_parts(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// The type tag
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The serialized payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

// Fixed-width scalars travel as their little-endian byte image. Decoding
// refuses any payload whose length differs from the type's size.
macro_rules! fixed_width {
    ($($ty:ty => $tag:literal),+ $(,)?) => {$(
        impl Serializable for $ty {
            fn type_tag() -> Cow<'static, str> {
                Cow::Borrowed($tag)
            }
            fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
                Ok(self.to_le_bytes().to_vec())
            }
            fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
                let image: [u8; std::mem::size_of::<$ty>()] =
                    bytes.try_into().map_err(|_| SerialError::WrongLength {
                        expected: std::mem::size_of::<$ty>(),
                        actual: bytes.len(),
                    })?;
                Ok(<$ty>::from_le_bytes(image))
            }
        }
    )+};
}

fixed_width! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
}

impl Serializable for bool {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("bool")
    }
    fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
        Ok(vec![u8::from(*self)])
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(SerialError::InvalidBool(*other)),
            _ => Err(SerialError::WrongLength {
                expected: 1,
                actual: bytes.len(),
            }),
        }
    }
}

impl Serializable for () {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed(UNIT_TAG)
    }
    fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
        Ok(Vec::new())
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
        if bytes.is_empty() {
            Ok(())
        } else {
            Err(SerialError::WrongLength {
                expected: 0,
                actual: bytes.len(),
            })
        }
    }
}

impl Serializable for String {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("str")
    }
    fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
        Ok(self.as_bytes().to_vec())
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// One element of a container payload. The payload of a `Vec<T>` is a
/// subdocument in the envelope format: an ordered array of these, each
/// carrying the recursive encoding of one element.
#[derive(Serialize, Deserialize)]
struct ListEntry {
    v: String,
}

impl<T: Serializable> Serializable for Vec<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("list<{}>", T::type_tag()))
    }
    fn to_bytes(&self) -> Result<Vec<u8>, SerialError> {
        let entries = self
            .iter()
            .map(|item| {
                Ok(ListEntry {
                    v: hex::encode(item.to_bytes()?),
                })
            })
            .collect::<Result<Vec<_>, SerialError>>()?;
        Ok(serde_json::to_vec(&entries)?)
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, SerialError> {
        let entries: Vec<ListEntry> = serde_json::from_slice(bytes)?;
        entries
            .into_iter()
            .map(|entry| T::from_bytes(&hex::decode(entry.v)?))
            .collect()
    }
}

/// Appends one length-prefixed field to a payload under construction.
///
/// Used by [`impl_serializable!`](crate::impl_serializable); also available
/// to hand-written implementations that want the same field framing.
pub fn write_field(out: &mut Vec<u8>, field: &[u8]) -> Result<(), SerialError> {
    let len = u32::try_from(field.len())
        .map_err(|_| SerialError::Custom(format!("field of {} bytes is too long", field.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
    Ok(())
}

/// Takes the next length-prefixed field off the front of a payload.
///
/// The counterpart of [`write_field`]; advances `input` past the field.
pub fn read_field(input: &mut &[u8]) -> Result<Vec<u8>, SerialError> {
    let len = input
        .read_u32::<BigEndian>()
        .map_err(|_| SerialError::Truncated)? as usize;
    let slice = *input;
    if slice.len() < len {
        return Err(SerialError::Truncated);
    }
    let (field, rest) = slice.split_at(len);
    *input = rest;
    Ok(field.to_vec())
}

/// Implements [`Serializable`] for a struct, field by field.
///
/// Fields are encoded in the order given, each length-prefixed, using
/// their own [`Serializable`] impls. This is the deterministic alternative
/// to shipping a raw memory image of the struct: no padding, no layout
/// sensitivity. The tag is declared explicitly.
///
/// ```
/// use tagrpc::{impl_serializable, Serializable};
///
/// #[derive(Debug, PartialEq)]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
/// impl_serializable!(Point, tag = "point", fields = [x, y]);
///
/// let p = Point { x: 3, y: -4 };
/// let bytes = p.to_bytes().unwrap();
/// assert_eq!(Point::from_bytes(&bytes).unwrap(), p);
/// ```
#[macro_export]
macro_rules! impl_serializable {
    ($ty:ty, tag = $tag:literal, fields = [$($field:ident),+ $(,)?]) => {
        impl $crate::serial::Serializable for $ty {
            fn type_tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($tag)
            }
            fn to_bytes(
                &self,
            ) -> ::std::result::Result<::std::vec::Vec<u8>, $crate::serial::SerialError> {
                let mut out = ::std::vec::Vec::new();
                $(
                    $crate::serial::write_field(
                        &mut out,
                        &$crate::serial::Serializable::to_bytes(&self.$field)?,
                    )?;
                )+
                Ok(out)
            }
            fn from_bytes(
                bytes: &[u8],
            ) -> ::std::result::Result<Self, $crate::serial::SerialError> {
                let mut rest = bytes;
                $(
                    let $field = $crate::serial::Serializable::from_bytes(
                        &$crate::serial::read_field(&mut rest)?,
                    )?;
                )+
                if !rest.is_empty() {
                    return Err($crate::serial::SerialError::TrailingBytes);
                }
                Ok(Self { $($field),+ })
            }
        }
    };
}
