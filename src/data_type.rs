//! Element data types of object dictionary entries.
//!
//! [`DataType`] is the closed set of element types an entry can declare. It
//! drives how raw octets are marshaled ([`codec`](crate::codec)) and which
//! transfer mode a download uses: [`DataType::Domain`] entries always move by
//! block transfer.
//!
//! | Type | CiA code | Bytes |
//! |------|----------|-------|
//! | `Boolean` | 0x0001 | 1 |
//! | `Integer8` / `Unsigned8` | 0x0002 / 0x0005 | 1 |
//! | `Integer16` / `Unsigned16` | 0x0003 / 0x0006 | 2 |
//! | `Integer24` / `Unsigned24` | 0x0010 / 0x0016 | 3 |
//! | `Integer32` / `Unsigned32` / `Real32` | 0x0004 / 0x0007 / 0x0008 | 4 |
//! | `Integer40` / `Unsigned40` | 0x0012 / 0x0018 | 5 |
//! | `Integer48` / `Unsigned48` | 0x0013 / 0x0019 | 6 |
//! | `Integer56` / `Unsigned56` | 0x0014 / 0x001A | 7 |
//! | `Integer64` / `Unsigned64` / `Real64` | 0x0015 / 0x001B / 0x0011 | 8 |
//! | `VisibleString`, `OctetString`, `UnicodeString` | 0x0009, 0x000A, 0x000B | variable |
//! | `Domain` | 0x000F | variable |

/// Element type declared by an object dictionary entry.
///
/// # Example
///
/// ```
/// use canopen_sdo::DataType;
///
/// assert_eq!(DataType::Unsigned16.byte_length(), Some(2));
/// assert_eq!(DataType::Domain.byte_length(), None);
/// assert_eq!(DataType::from_code(0x0007), Some(DataType::Unsigned32));
/// assert_eq!(DataType::Integer24.to_string(), "INT24");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// No declared type; decodes to no value.
    #[default]
    None,
    /// Boolean stored on one byte.
    Boolean,
    /// Signed 8-bit integer.
    Integer8,
    /// Signed 16-bit integer.
    Integer16,
    /// Signed 24-bit integer.
    Integer24,
    /// Signed 32-bit integer.
    Integer32,
    /// Signed 40-bit integer.
    Integer40,
    /// Signed 48-bit integer.
    Integer48,
    /// Signed 56-bit integer.
    Integer56,
    /// Signed 64-bit integer.
    Integer64,
    /// Unsigned 8-bit integer.
    Unsigned8,
    /// Unsigned 16-bit integer.
    Unsigned16,
    /// Unsigned 24-bit integer.
    Unsigned24,
    /// Unsigned 32-bit integer.
    Unsigned32,
    /// Unsigned 40-bit integer.
    Unsigned40,
    /// Unsigned 48-bit integer.
    Unsigned48,
    /// Unsigned 56-bit integer.
    Unsigned56,
    /// Unsigned 64-bit integer.
    Unsigned64,
    /// IEEE-754 single precision.
    Real32,
    /// IEEE-754 double precision.
    Real64,
    /// ASCII text.
    VisibleString,
    /// Raw octets.
    OctetString,
    /// UTF-16 text, carried as raw octets.
    UnicodeString,
    /// Opaque variable-length payload, always moved by block transfer.
    Domain,
}

impl DataType {
    /// Maps a CiA 301 data type code to a [`DataType`].
    ///
    /// Returns `None` for codes this client does not model (time types,
    /// complex types).
    pub fn from_code(code: u16) -> Option<Self> {
        let data_type = match code {
            0x0001 => Self::Boolean,
            0x0002 => Self::Integer8,
            0x0003 => Self::Integer16,
            0x0004 => Self::Integer32,
            0x0005 => Self::Unsigned8,
            0x0006 => Self::Unsigned16,
            0x0007 => Self::Unsigned32,
            0x0008 => Self::Real32,
            0x0009 => Self::VisibleString,
            0x000A => Self::OctetString,
            0x000B => Self::UnicodeString,
            0x000F => Self::Domain,
            0x0010 => Self::Integer24,
            0x0011 => Self::Real64,
            0x0012 => Self::Integer40,
            0x0013 => Self::Integer48,
            0x0014 => Self::Integer56,
            0x0015 => Self::Integer64,
            0x0016 => Self::Unsigned24,
            0x0018 => Self::Unsigned40,
            0x0019 => Self::Unsigned48,
            0x001A => Self::Unsigned56,
            0x001B => Self::Unsigned64,
            _ => return None,
        };
        Some(data_type)
    }

    /// Returns the CiA 301 data type code (0 for [`DataType::None`]).
    pub fn code(self) -> u16 {
        match self {
            Self::None => 0x0000,
            Self::Boolean => 0x0001,
            Self::Integer8 => 0x0002,
            Self::Integer16 => 0x0003,
            Self::Integer32 => 0x0004,
            Self::Unsigned8 => 0x0005,
            Self::Unsigned16 => 0x0006,
            Self::Unsigned32 => 0x0007,
            Self::Real32 => 0x0008,
            Self::VisibleString => 0x0009,
            Self::OctetString => 0x000A,
            Self::UnicodeString => 0x000B,
            Self::Domain => 0x000F,
            Self::Integer24 => 0x0010,
            Self::Real64 => 0x0011,
            Self::Integer40 => 0x0012,
            Self::Integer48 => 0x0013,
            Self::Integer56 => 0x0014,
            Self::Integer64 => 0x0015,
            Self::Unsigned24 => 0x0016,
            Self::Unsigned40 => 0x0018,
            Self::Unsigned48 => 0x0019,
            Self::Unsigned56 => 0x001A,
            Self::Unsigned64 => 0x001B,
        }
    }

    /// Returns the fixed encoded size in bytes, or `None` for variable-length
    /// and untyped entries.
    pub fn byte_length(self) -> Option<usize> {
        match self {
            Self::Boolean | Self::Integer8 | Self::Unsigned8 => Some(1),
            Self::Integer16 | Self::Unsigned16 => Some(2),
            Self::Integer24 | Self::Unsigned24 => Some(3),
            Self::Integer32 | Self::Unsigned32 | Self::Real32 => Some(4),
            Self::Integer40 | Self::Unsigned40 => Some(5),
            Self::Integer48 | Self::Unsigned48 => Some(6),
            Self::Integer56 | Self::Unsigned56 => Some(7),
            Self::Integer64 | Self::Unsigned64 | Self::Real64 => Some(8),
            Self::None
            | Self::VisibleString
            | Self::OctetString
            | Self::UnicodeString
            | Self::Domain => None,
        }
    }

    /// Returns the size in bits (1 for booleans), or `None` for
    /// variable-length and untyped entries.
    pub fn bit_length(self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            other => other.byte_length().map(|bytes| bytes * 8),
        }
    }

    /// Returns whether this is a signed integer type.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Integer8
                | Self::Integer16
                | Self::Integer24
                | Self::Integer32
                | Self::Integer40
                | Self::Integer48
                | Self::Integer56
                | Self::Integer64
        )
    }

    /// Returns whether this is an unsigned integer type.
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::Unsigned8
                | Self::Unsigned16
                | Self::Unsigned24
                | Self::Unsigned32
                | Self::Unsigned40
                | Self::Unsigned48
                | Self::Unsigned56
                | Self::Unsigned64
        )
    }

    /// Returns whether values of this type are numbers (integers or reals).
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::DataType;
    ///
    /// assert!(DataType::Real32.is_numeric());
    /// assert!(!DataType::Boolean.is_numeric());
    /// assert!(!DataType::VisibleString.is_numeric());
    /// ```
    pub fn is_numeric(self) -> bool {
        self.is_signed() || self.is_unsigned() || matches!(self, Self::Real32 | Self::Real64)
    }

    /// Returns whether values of this type have no fixed size.
    pub fn is_variable_length(self) -> bool {
        matches!(
            self,
            Self::VisibleString | Self::OctetString | Self::UnicodeString | Self::Domain
        )
    }

    /// Returns the inclusive integer range of this type, if it is an integer.
    pub(crate) fn integer_range(self) -> Option<(i128, i128)> {
        let bits = self.byte_length()? as u32 * 8;
        if self.is_signed() {
            let max = (1i128 << (bits - 1)) - 1;
            Some((-max - 1, max))
        } else if self.is_unsigned() {
            Some((0, (1i128 << bits) - 1))
        } else {
            None
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Boolean => "BOOLEAN",
            Self::Integer8 => "INT8",
            Self::Integer16 => "INT16",
            Self::Integer24 => "INT24",
            Self::Integer32 => "INT32",
            Self::Integer40 => "INT40",
            Self::Integer48 => "INT48",
            Self::Integer56 => "INT56",
            Self::Integer64 => "INT64",
            Self::Unsigned8 => "UINT8",
            Self::Unsigned16 => "UINT16",
            Self::Unsigned24 => "UINT24",
            Self::Unsigned32 => "UINT32",
            Self::Unsigned40 => "UINT40",
            Self::Unsigned48 => "UINT48",
            Self::Unsigned56 => "UINT56",
            Self::Unsigned64 => "UINT64",
            Self::Real32 => "REAL32",
            Self::Real64 => "REAL64",
            Self::VisibleString => "VSTRING",
            Self::OctetString => "OSTRING",
            Self::UnicodeString => "USTRING",
            Self::Domain => "DOMAIN",
        };
        f.write_str(name)
    }
}
