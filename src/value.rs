//! Typed values held by object dictionary entries.

use crate::data_type::DataType;

/// A typed application value.
///
/// Integer types narrower than 64 bits but not a native width (24, 40, 48 and
/// 56 bits) are carried by the next wider native variant: `Integer24` decodes
/// to [`Value::I32`], `Unsigned48` to [`Value::U64`], and so on.
///
/// # Example
///
/// ```
/// use canopen_sdo::{DataType, Value};
///
/// let v = Value::I32(-5);
/// assert!(v.fits(DataType::Integer24));
/// assert!(!v.fits(DataType::Unsigned24));
/// assert_eq!(v.as_f64(), Some(-5.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit.
    I8(i8),
    /// Signed 16-bit.
    I16(i16),
    /// Signed 24/32-bit.
    I32(i32),
    /// Signed 40/48/56/64-bit.
    I64(i64),
    /// Unsigned 8-bit.
    U8(u8),
    /// Unsigned 16-bit.
    U16(u16),
    /// Unsigned 24/32-bit.
    U32(u32),
    /// Unsigned 40/48/56/64-bit.
    U64(u64),
    /// Single precision float.
    F32(f32),
    /// Double precision float.
    F64(f64),
    /// Text.
    String(String),
    /// Raw octets.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the value as a wide integer, if it is an integer or a boolean.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Value::Bool(b) => Some(i128::from(b)),
            Value::I8(v) => Some(i128::from(v)),
            Value::I16(v) => Some(i128::from(v)),
            Value::I32(v) => Some(i128::from(v)),
            Value::I64(v) => Some(i128::from(v)),
            Value::U8(v) => Some(i128::from(v)),
            Value::U16(v) => Some(i128::from(v)),
            Value::U32(v) => Some(i128::from(v)),
            Value::U64(v) => Some(i128::from(v)),
            Value::F32(_) | Value::F64(_) | Value::String(_) | Value::Bytes(_) => None,
        }
    }

    /// Returns the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(f64::from(v)),
            Value::F64(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }

    /// Returns the raw octets of a text or byte value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns whether this value is representable in `data_type`.
    ///
    /// Integers fit any integer type whose range contains them; floats only
    /// fit the real type of their own width; text and bytes fit any
    /// variable-length type.
    pub fn fits(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::None => false,
            DataType::Boolean => matches!(self, Value::Bool(_)),
            DataType::Real32 => matches!(self, Value::F32(_)),
            DataType::Real64 => matches!(self, Value::F64(_)),
            DataType::VisibleString
            | DataType::OctetString
            | DataType::UnicodeString
            | DataType::Domain => self.as_bytes().is_some(),
            integer => match (self, integer.integer_range()) {
                (Value::Bool(_), _) => false,
                (value, Some((min, max))) => value
                    .as_integer()
                    .is_some_and(|v| (min..=max).contains(&v)),
                (_, None) => false,
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => {
                for (i, byte) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! impl_from_native {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_native! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
