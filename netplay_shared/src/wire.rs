//! Binary wire codec.
//!
//! Every value on the wire is written by [`Wire::write`] into a `BytesMut` and
//! read back by [`Wire::read`] from a `Bytes` cursor that advances as it goes.
//!
//! Rules both ends agree on (there is no negotiation and no version field):
//! - Integers and floats are big-endian.
//! - `bool` is one byte, `0` or `1`.
//! - Sequences and strings carry a `u32` length prefix.
//! - `Option<T>` carries a one-byte presence flag.
//! - Enumerations are one-byte tags; an unknown tag is an error, never skipped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on the element count of a length-prefixed sequence.
pub const MAX_SEQUENCE_LEN: usize = 4096;

/// Upper bound on the byte length of a string.
pub const MAX_STRING_LEN: usize = 1024;

/// Codec failures. A failure aborts decoding of the message it occurred in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown {kind} tag {value:#04x}")]
    UnknownTag { kind: &'static str, value: u32 },

    #[error("length {len} exceeds limit {max}")]
    LengthLimit { len: usize, max: usize },

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A value with a fixed binary representation.
pub trait Wire: Sized {
    /// Appends the encoded value.
    fn write(&self, out: &mut BytesMut);

    /// Reads one value, advancing the cursor past it.
    fn read(input: &mut Bytes) -> Result<Self, WireError>;
}

/// Encodes a single value into a frozen buffer.
pub fn to_bytes<T: Wire>(value: &T) -> Bytes {
    let mut out = BytesMut::new();
    value.write(&mut out);
    out.freeze()
}

/// Decodes a value that must occupy the whole buffer.
pub fn from_bytes<T: Wire>(mut input: Bytes) -> Result<T, WireError> {
    let value = T::read(&mut input)?;
    if input.has_remaining() {
        return Err(WireError::TrailingBytes(input.remaining()));
    }
    Ok(value)
}

fn ensure(input: &Bytes, needed: usize) -> Result<(), WireError> {
    if input.remaining() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: input.remaining(),
        });
    }
    Ok(())
}

/// Reads a `u32` length prefix and checks it against `max`.
pub fn read_len(input: &mut Bytes, max: usize) -> Result<usize, WireError> {
    let len = u32::read(input)? as usize;
    if len > max {
        return Err(WireError::LengthLimit { len, max });
    }
    Ok(len)
}

/// Writes a `u32` length prefix.
pub fn write_len(len: usize, out: &mut BytesMut) {
    out.put_u32(len as u32);
}

macro_rules! wire_number {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Wire for $ty {
                fn write(&self, out: &mut BytesMut) {
                    out.$put(*self);
                }

                fn read(input: &mut Bytes) -> Result<Self, WireError> {
                    ensure(input, std::mem::size_of::<$ty>())?;
                    Ok(input.$get())
                }
            }
        )*
    };
}

wire_number! {
    u8 => put_u8, get_u8;
    u16 => put_u16, get_u16;
    u32 => put_u32, get_u32;
    u64 => put_u64, get_u64;
    i32 => put_i32, get_i32;
    f32 => put_f32, get_f32;
}

impl Wire for bool {
    fn write(&self, out: &mut BytesMut) {
        out.put_u8(u8::from(*self));
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        match u8::read(input)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }
}

impl Wire for String {
    fn write(&self, out: &mut BytesMut) {
        write_len(self.len(), out);
        out.put_slice(self.as_bytes());
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let len = read_len(input, MAX_STRING_LEN)?;
        ensure(input, len)?;
        let raw = input.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn write(&self, out: &mut BytesMut) {
        write_len(self.len(), out);
        for item in self {
            item.write(out);
        }
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let len = read_len(input, MAX_SEQUENCE_LEN)?;
        // Every element takes at least one byte, so a larger count cannot be satisfied.
        ensure(input, len)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::read(input)?);
        }
        Ok(items)
    }
}

impl<T: Wire> Wire for Option<T> {
    fn write(&self, out: &mut BytesMut) {
        match self {
            Some(value) => {
                out.put_u8(1);
                value.write(out);
            }
            None => out.put_u8(0),
        }
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        if bool::read(input)? {
            Ok(Some(T::read(input)?))
        } else {
            Ok(None)
        }
    }
}

impl<A: Wire, B: Wire> Wire for (A, B) {
    fn write(&self, out: &mut BytesMut) {
        self.0.write(out);
        self.1.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        Ok((A::read(input)?, B::read(input)?))
    }
}

/// Implements [`Wire`] for a fieldless enum with a `from_u8` constructor and
/// `#[repr(u8)]`-style discriminants.
#[macro_export]
macro_rules! wire_enum {
    ($ty:ty, $kind:literal) => {
        impl $crate::wire::Wire for $ty {
            fn write(&self, out: &mut ::bytes::BytesMut) {
                $crate::wire::Wire::write(&(*self as u8), out);
            }

            fn read(input: &mut ::bytes::Bytes) -> Result<Self, $crate::wire::WireError> {
                let raw = <u8 as $crate::wire::Wire>::read(input)?;
                <$ty>::from_u8(raw).ok_or($crate::wire::WireError::UnknownTag {
                    kind: $kind,
                    value: raw as u32,
                })
            }
        }
    };
}
