//! SDO abort codes.
//!
//! A transfer that does not complete ends with a 32-bit abort code. Codes
//! detected locally by the client and codes reported by the server share the
//! same space; the server's codes are passed through unchanged.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::AbortCode;
//!
//! let code = AbortCode::from(0x0503_0000);
//! assert_eq!(code, AbortCode::TOGGLE_BIT_NOT_ALTERNATED);
//! assert_eq!(code.description(), Some("Toggle bit not alternated"));
//! assert_eq!(code.to_string(), "0x05030000 (Toggle bit not alternated)");
//! ```

/// 32-bit SDO abort code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbortCode(pub u32);

impl AbortCode {
    /// Toggle bit not alternated.
    pub const TOGGLE_BIT_NOT_ALTERNATED: Self = Self(0x0503_0000);
    /// SDO protocol timed out.
    pub const TIMEOUT: Self = Self(0x0504_0000);
    /// Client/server command specifier not valid or unknown.
    pub const CMD_NOT_VALID: Self = Self(0x0504_0001);
    /// Invalid block size (block mode only).
    pub const INVALID_BLOCK_SIZE: Self = Self(0x0504_0002);
    /// Invalid sequence number (block mode only).
    pub const INVALID_SEQUENCE_NUMBER: Self = Self(0x0504_0003);
    /// CRC error (block mode only).
    pub const CRC_ERROR: Self = Self(0x0504_0004);
    /// Out of memory.
    pub const OUT_OF_MEMORY: Self = Self(0x0504_0005);
    /// Unsupported access to an object.
    pub const UNSUPPORTED_ACCESS: Self = Self(0x0601_0000);
    /// Attempt to read a write only object.
    pub const WRITE_ONLY: Self = Self(0x0601_0001);
    /// Attempt to write a read only object.
    pub const READ_ONLY: Self = Self(0x0601_0002);
    /// Object does not exist in the object dictionary.
    pub const OBJECT_NOT_FOUND: Self = Self(0x0602_0000);
    /// Object cannot be mapped to the PDO.
    pub const NOT_MAPPABLE: Self = Self(0x0604_0041);
    /// The number and length of the objects to be mapped would exceed PDO length.
    pub const PDO_LENGTH_EXCEEDED: Self = Self(0x0604_0042);
    /// General parameter incompatibility reason.
    pub const PARAMETER_INCOMPATIBILITY: Self = Self(0x0604_0043);
    /// General internal incompatibility in the device.
    pub const INTERNAL_INCOMPATIBILITY: Self = Self(0x0604_0047);
    /// Access failed due to a hardware error.
    pub const HARDWARE_ERROR: Self = Self(0x0606_0000);
    /// Data type does not match, length of service parameter does not match.
    pub const LENGTH_MISMATCH: Self = Self(0x0607_0010);
    /// Data type does not match, length of service parameter too high.
    pub const LENGTH_TOO_HIGH: Self = Self(0x0607_0012);
    /// Data type does not match, length of service parameter too low.
    pub const LENGTH_TOO_LOW: Self = Self(0x0607_0013);
    /// Sub-index does not exist.
    pub const SUB_INDEX_NOT_FOUND: Self = Self(0x0609_0011);
    /// Invalid value for parameter (download only).
    pub const INVALID_VALUE: Self = Self(0x0609_0030);
    /// Value of parameter written too high (download only).
    pub const VALUE_TOO_HIGH: Self = Self(0x0609_0031);
    /// Value of parameter written too low (download only).
    pub const VALUE_TOO_LOW: Self = Self(0x0609_0032);
    /// Maximum value is less than minimum value.
    pub const MAX_LESS_THAN_MIN: Self = Self(0x0609_0036);
    /// Resource not available: SDO connection.
    pub const RESOURCE_NOT_AVAILABLE: Self = Self(0x060A_0023);
    /// General error.
    pub const GENERAL_ERROR: Self = Self(0x0800_0000);
    /// Data cannot be transferred or stored to the application.
    pub const DATA_TRANSFER: Self = Self(0x0800_0020);
    /// Data cannot be transferred or stored because of local control.
    pub const DATA_LOCAL_CONTROL: Self = Self(0x0800_0021);
    /// Data cannot be transferred or stored because of the present device state.
    pub const DATA_DEVICE_STATE: Self = Self(0x0800_0022);
    /// Object dictionary dynamic generation fails or no object dictionary is present.
    pub const NO_OBJECT_DICTIONARY: Self = Self(0x0800_0023);
    /// No data available.
    pub const NO_DATA: Self = Self(0x0800_0024);

    /// Returns the raw 32-bit code.
    pub fn code(self) -> u32 {
        self.0
    }

    /// Returns the standard description of this code, if it is a known one.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::AbortCode;
    ///
    /// assert_eq!(
    ///     AbortCode::OBJECT_NOT_FOUND.description(),
    ///     Some("Object does not exist in the object dictionary")
    /// );
    /// assert_eq!(AbortCode(0x1234_5678).description(), None);
    /// ```
    pub fn description(self) -> Option<&'static str> {
        let text = match self {
            Self::TOGGLE_BIT_NOT_ALTERNATED => "Toggle bit not alternated",
            Self::TIMEOUT => "SDO protocol timed out",
            Self::CMD_NOT_VALID => "Client/server command specifier not valid or unknown",
            Self::INVALID_BLOCK_SIZE => "Invalid block size",
            Self::INVALID_SEQUENCE_NUMBER => "Invalid sequence number",
            Self::CRC_ERROR => "CRC error",
            Self::OUT_OF_MEMORY => "Out of memory",
            Self::UNSUPPORTED_ACCESS => "Unsupported access to an object",
            Self::WRITE_ONLY => "Attempt to read a write only object",
            Self::READ_ONLY => "Attempt to write a read only object",
            Self::OBJECT_NOT_FOUND => "Object does not exist in the object dictionary",
            Self::NOT_MAPPABLE => "Object cannot be mapped to the PDO",
            Self::PDO_LENGTH_EXCEEDED => {
                "The number and length of the objects to be mapped would exceed PDO length"
            }
            Self::PARAMETER_INCOMPATIBILITY => "General parameter incompatibility reason",
            Self::INTERNAL_INCOMPATIBILITY => "General internal incompatibility in the device",
            Self::HARDWARE_ERROR => "Access failed due to a hardware error",
            Self::LENGTH_MISMATCH => {
                "Data type does not match, length of service parameter does not match"
            }
            Self::LENGTH_TOO_HIGH => "Data type does not match, length of service parameter too high",
            Self::LENGTH_TOO_LOW => "Data type does not match, length of service parameter too low",
            Self::SUB_INDEX_NOT_FOUND => "Sub-index does not exist",
            Self::INVALID_VALUE => "Invalid value for parameter",
            Self::VALUE_TOO_HIGH => "Value of parameter written too high",
            Self::VALUE_TOO_LOW => "Value of parameter written too low",
            Self::MAX_LESS_THAN_MIN => "Maximum value is less than minimum value",
            Self::RESOURCE_NOT_AVAILABLE => "Resource not available: SDO connection",
            Self::GENERAL_ERROR => "General error",
            Self::DATA_TRANSFER => "Data cannot be transferred or stored to the application",
            Self::DATA_LOCAL_CONTROL => {
                "Data cannot be transferred or stored to the application because of local control"
            }
            Self::DATA_DEVICE_STATE => {
                "Data cannot be transferred or stored to the application because of the present device state"
            }
            Self::NO_OBJECT_DICTIONARY => {
                "Object dictionary dynamic generation fails or no object dictionary is present"
            }
            Self::NO_DATA => "No data available",
            _ => return None,
        };
        Some(text)
    }

    /// Returns whether this code is one the client raises on its own.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::AbortCode;
    ///
    /// assert!(AbortCode::TIMEOUT.is_protocol_error());
    /// assert!(!AbortCode::READ_ONLY.is_protocol_error());
    /// ```
    pub fn is_protocol_error(self) -> bool {
        matches!(
            self,
            Self::TOGGLE_BIT_NOT_ALTERNATED
                | Self::TIMEOUT
                | Self::CMD_NOT_VALID
                | Self::INVALID_BLOCK_SIZE
                | Self::INVALID_SEQUENCE_NUMBER
                | Self::CRC_ERROR
                | Self::LENGTH_MISMATCH
                | Self::GENERAL_ERROR
        )
    }
}

impl From<u32> for AbortCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<AbortCode> for u32 {
    fn from(code: AbortCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for AbortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.description() {
            Some(text) => write!(f, "0x{:08X} ({})", self.0, text),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}
