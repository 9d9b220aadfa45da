//! Primitive property types and the values they carry
//!
//! Every property in the registry is one of nine fixed-size scalars. The
//! [`PrimitiveType`] tag names the scalar, [`Value`] carries one, and the
//! untyped-buffer helpers move exactly `size()` bytes in native byte order.
//!
//! ```text
//! tag    Rust type   bytes
//! i8     i8          1
//! u8     u8          1
//! i16    i16         2
//! u16    u16         2
//! i32    i32         4
//! u32    u32         4
//! i64    i64         8
//! u64    u64         8
//! uptr   usize       pointer width
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Invokes `$callback!` with the full `Variant => type, "name";` table.
macro_rules! for_each_primitive {
    ($callback:ident) => {
        $callback! {
            I8 => i8, "i8";
            U8 => u8, "u8";
            I16 => i16, "i16";
            U16 => u16, "u16";
            I32 => i32, "i32";
            U32 => u32, "u32";
            I64 => i64, "i64";
            U64 => u64, "u64";
            Ptr => usize, "uptr";
        }
    };
}
pub(crate) use for_each_primitive;

/// Type tag of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// Pointer-sized unsigned integer
    #[serde(rename = "uptr")]
    Ptr,
}

/// A single property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    #[serde(rename = "uptr")]
    Ptr(usize),
}

/// Rust scalars that map onto a [`PrimitiveType`]
pub trait Primitive: Copy + Send + Sync + 'static {
    const TYPE: PrimitiveType;

    fn into_value(self) -> Value;

    /// Returns `None` when `value` carries a different type.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_primitives {
    ($($variant:ident => $ty:ty, $name:literal;)*) => {
        impl PrimitiveType {
            /// All tags, in declaration order
            pub const ALL: [PrimitiveType; 9] = [$(PrimitiveType::$variant),*];

            /// Number of bytes a value of this type occupies in a buffer
            pub const fn size(self) -> usize {
                match self {
                    $(PrimitiveType::$variant => std::mem::size_of::<$ty>(),)*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(PrimitiveType::$variant => $name,)*
                }
            }

            /// Parse decimal or `0x`-prefixed hexadecimal text as this type
            pub fn parse_value(self, text: &str) -> Result<Value> {
                let text = text.trim();
                match self {
                    $(PrimitiveType::$variant => {
                        let parsed = match text
                            .strip_prefix("0x")
                            .or_else(|| text.strip_prefix("0X"))
                        {
                            Some(hex) => <$ty>::from_str_radix(hex, 16),
                            None => text.parse::<$ty>(),
                        };
                        parsed.map(Value::$variant).map_err(|e| {
                            Error::InvalidArgument(format!(
                                "cannot parse '{}' as {}: {}",
                                text, $name, e
                            ))
                        })
                    })*
                }
            }
        }

        impl Value {
            pub const fn ty(&self) -> PrimitiveType {
                match self {
                    $(Value::$variant(_) => PrimitiveType::$variant,)*
                }
            }

            /// Write exactly `self.ty().size()` bytes to the front of `out`
            ///
            /// Returns the number of bytes written.
            pub fn write_to(&self, out: &mut [u8]) -> Result<usize> {
                let size = self.ty().size();
                let available = out.len();
                let dst = out.get_mut(..size).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "output buffer holds {} bytes, {} needs {}",
                        available,
                        self.ty(),
                        size
                    ))
                })?;
                match self {
                    $(Value::$variant(v) => dst.copy_from_slice(&v.to_ne_bytes()),)*
                }
                Ok(size)
            }

            /// Read exactly `ty.size()` bytes from the front of `input`
            pub fn read_from(ty: PrimitiveType, input: &[u8]) -> Result<Self> {
                let size = ty.size();
                let src = input.get(..size).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "input buffer holds {} bytes, {} needs {}",
                        input.len(),
                        ty,
                        size
                    ))
                })?;
                Ok(match ty {
                    $(PrimitiveType::$variant => {
                        let mut raw = [0u8; std::mem::size_of::<$ty>()];
                        raw.copy_from_slice(src);
                        Value::$variant(<$ty>::from_ne_bytes(raw))
                    })*
                })
            }
        }

        impl fmt::Display for Value {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Value::$variant(v) => write!(f, "{}", v),)*
                }
            }
        }

        $(
            impl Primitive for $ty {
                const TYPE: PrimitiveType = PrimitiveType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

for_each_primitive!(impl_primitives);

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrimitiveType {
    type Err = Error;

    /// Accepts the canonical names plus the `s8`..`s64`, `ptr` and `usize` aliases
    fn from_str(s: &str) -> Result<Self> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "i8" | "s8" => PrimitiveType::I8,
            "u8" => PrimitiveType::U8,
            "i16" | "s16" => PrimitiveType::I16,
            "u16" => PrimitiveType::U16,
            "i32" | "s32" => PrimitiveType::I32,
            "u32" => PrimitiveType::U32,
            "i64" | "s64" => PrimitiveType::I64,
            "u64" => PrimitiveType::U64,
            "uptr" | "ptr" | "usize" => PrimitiveType::Ptr,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown primitive type '{}'",
                    other
                )))
            }
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(PrimitiveType::I8.size(), 1);
        assert_eq!(PrimitiveType::U16.size(), 2);
        assert_eq!(PrimitiveType::I32.size(), 4);
        assert_eq!(PrimitiveType::U64.size(), 8);
        assert_eq!(PrimitiveType::Ptr.size(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_write_exact_width() -> Result<()> {
        let mut buf = [0xAAu8; 8];
        let written = Value::U16(0x1234).write_to(&mut buf)?;
        assert_eq!(written, 2);
        assert_eq!(&buf[..2], &0x1234u16.to_ne_bytes());
        // Bytes past the value are untouched
        assert!(buf[2..].iter().all(|&b| b == 0xAA));
        Ok(())
    }

    #[test]
    fn test_short_buffers_rejected() {
        let mut buf = [0u8; 2];
        assert!(matches!(
            Value::U32(7).write_to(&mut buf),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Value::read_from(PrimitiveType::I64, &buf),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_from_buffer() -> Result<()> {
        let raw = (-5i32).to_ne_bytes();
        assert_eq!(Value::read_from(PrimitiveType::I32, &raw)?, Value::I32(-5));
        Ok(())
    }

    #[test]
    fn test_parse_value() -> Result<()> {
        assert_eq!(PrimitiveType::U32.parse_value("4096")?, Value::U32(4096));
        assert_eq!(PrimitiveType::Ptr.parse_value("0x10")?, Value::Ptr(16));
        assert_eq!(PrimitiveType::I8.parse_value(" -3 ")?, Value::I8(-3));
        assert!(PrimitiveType::U8.parse_value("256").is_err());
        assert!(PrimitiveType::U16.parse_value("-1").is_err());
        Ok(())
    }

    #[test]
    fn test_type_names() -> Result<()> {
        for ty in PrimitiveType::ALL {
            assert_eq!(ty.name().parse::<PrimitiveType>()?, ty);
        }
        assert_eq!("s32".parse::<PrimitiveType>()?, PrimitiveType::I32);
        assert_eq!("usize".parse::<PrimitiveType>()?, PrimitiveType::Ptr);
        assert!("f32".parse::<PrimitiveType>().is_err());
        Ok(())
    }

    #[test]
    fn test_primitive_trait() {
        assert_eq!(<u64 as Primitive>::TYPE, PrimitiveType::U64);
        assert_eq!(7u8.into_value(), Value::U8(7));
        assert_eq!(u8::from_value(Value::U8(7)), Some(7));
        assert_eq!(u8::from_value(Value::I8(7)), None);
    }

    #[test]
    fn test_value_serde() {
        let json = serde_json::to_string(&Value::Ptr(3)).unwrap();
        assert_eq!(json, r#"{"type":"uptr","value":3}"#);
    }
}
