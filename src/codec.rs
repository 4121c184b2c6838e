//! Little-endian marshaling between [`Value`]s and raw octets.
//!
//! [`decode`] turns the bytes accumulated by an upload into a typed value;
//! [`encode`] produces the bytes a download sends. Every multi-byte field on
//! the wire is little-endian.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::codec::{decode, encode};
//! use canopen_sdo::{DataType, Value};
//!
//! let bytes = encode(&Value::I32(-2), DataType::Integer24).unwrap();
//! assert_eq!(bytes, vec![0xFE, 0xFF, 0xFF]);
//! assert_eq!(decode(&bytes, DataType::Integer24), Some(Value::I32(-2)));
//! ```

use crate::data_type::DataType;
use crate::error::{Result, SdoError};
use crate::value::Value;

/// Decodes `data` as a value of `data_type`.
///
/// Fixed-width types read their width from the start of the buffer and
/// ignore any trailing bytes. Returns `None` when the buffer is shorter than
/// the type's width and for [`DataType::None`].
///
/// String and blob types keep the octets unchanged. A `VISIBLE_STRING`
/// decodes to [`Value::String`] when it is valid UTF-8 and to
/// [`Value::Bytes`] otherwise.
pub fn decode(data: &[u8], data_type: DataType) -> Option<Value> {
    match data_type {
        DataType::None => None,
        DataType::Boolean => data.first().map(|b| Value::Bool(*b != 0)),
        DataType::Integer8 => read_signed(data, 1).map(|v| Value::I8(v as i8)),
        DataType::Integer16 => read_signed(data, 2).map(|v| Value::I16(v as i16)),
        DataType::Integer24 | DataType::Integer32 => {
            let width = data_type.byte_length()?;
            read_signed(data, width).map(|v| Value::I32(v as i32))
        }
        DataType::Integer40 | DataType::Integer48 | DataType::Integer56 | DataType::Integer64 => {
            let width = data_type.byte_length()?;
            read_signed(data, width).map(Value::I64)
        }
        DataType::Unsigned8 => read_unsigned(data, 1).map(|v| Value::U8(v as u8)),
        DataType::Unsigned16 => read_unsigned(data, 2).map(|v| Value::U16(v as u16)),
        DataType::Unsigned24 | DataType::Unsigned32 => {
            let width = data_type.byte_length()?;
            read_unsigned(data, width).map(|v| Value::U32(v as u32))
        }
        DataType::Unsigned40
        | DataType::Unsigned48
        | DataType::Unsigned56
        | DataType::Unsigned64 => {
            let width = data_type.byte_length()?;
            read_unsigned(data, width).map(Value::U64)
        }
        DataType::Real32 => {
            let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
            Some(Value::F32(f32::from_le_bytes(bytes)))
        }
        DataType::Real64 => {
            let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
            Some(Value::F64(f64::from_le_bytes(bytes)))
        }
        DataType::VisibleString => Some(match std::str::from_utf8(data) {
            Ok(text) => Value::String(text.to_owned()),
            Err(_) => Value::Bytes(data.to_vec()),
        }),
        DataType::OctetString | DataType::UnicodeString | DataType::Domain => {
            Some(Value::Bytes(data.to_vec()))
        }
    }
}

/// Encodes `value` as the octets of `data_type`.
///
/// # Errors
///
/// Returns `SdoError::InvalidValue` if the value is not representable in the
/// declared type (see [`Value::fits`]).
pub fn encode(value: &Value, data_type: DataType) -> Result<Vec<u8>> {
    if !value.fits(data_type) {
        return Err(SdoError::invalid_value(format!(
            "{:?} is not representable as {}",
            value, data_type
        )));
    }

    match (value, data_type) {
        (Value::Bool(b), _) => Ok(vec![u8::from(*b)]),
        (Value::F32(v), _) => Ok(v.to_le_bytes().to_vec()),
        (Value::F64(v), _) => Ok(v.to_le_bytes().to_vec()),
        (Value::String(_) | Value::Bytes(_), _) => {
            Ok(value.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
        }
        (integer, data_type) => {
            let width = data_type
                .byte_length()
                .ok_or_else(|| SdoError::invalid_value("integer needs a fixed-width type"))?;
            let raw = integer
                .as_integer()
                .ok_or_else(|| SdoError::invalid_value("not an integer"))?;
            Ok(raw.to_le_bytes()[..width].to_vec())
        }
    }
}

fn read_unsigned(data: &[u8], width: usize) -> Option<u64> {
    let bytes = data.get(..width)?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

fn read_signed(data: &[u8], width: usize) -> Option<i64> {
    let raw = read_unsigned(data, width)?;
    let shift = 64 - (width as u32 * 8);
    // Sign-extend from the top bit of the declared width
    Some(((raw << shift) as i64) >> shift)
}
