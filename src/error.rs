//! Error types for the SDO client.
//!
//! [`SdoError`] covers failures the caller can act on: addressing an unknown
//! node or object, handing over a value that does not fit the declared type,
//! or a transport that refused a frame. Protocol failures during a transfer
//! are not errors in this sense; they end the transfer with an
//! [`AbortCode`](crate::AbortCode) written into the object dictionary.

use thiserror::Error;

/// Result type alias for SDO operations.
pub type Result<T> = std::result::Result<T, SdoError>;

/// Errors that can occur when driving the SDO client.
#[derive(Debug, Error)]
pub enum SdoError {
    /// No node with this id is registered on the bus.
    #[error("Unknown node {node_id}")]
    UnknownNode {
        /// Node id that was addressed.
        node_id: u8,
    },

    /// The object does not exist in the node object dictionary.
    #[error("Object 0x{index:04X}.{sub_index:02X} not found in object dictionary")]
    ObjectNotFound {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
    },

    /// The value cannot be represented in the declared data type.
    #[error("Invalid value: {reason}")]
    InvalidValue {
        /// Description of the mismatch.
        reason: String,
    },

    /// The value is outside the limits declared for the object.
    #[error("Value out of limits for 0x{index:04X}.{sub_index:02X}")]
    OutOfLimits {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
    },

    /// Frame is malformed or carries an unknown command specifier.
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the frame error.
        reason: String,
    },

    /// The transport cannot accept a frame right now.
    #[error("Bus not ready to send")]
    BusNotReady,

    /// The transport failed to send a frame.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },
}

impl SdoError {
    /// Creates a new `ObjectNotFound` error.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::SdoError;
    ///
    /// let err = SdoError::object_not_found(0x1017, 0);
    /// assert_eq!(err.to_string(), "Object 0x1017.00 not found in object dictionary");
    /// ```
    pub fn object_not_found(index: u16, sub_index: u8) -> Self {
        Self::ObjectNotFound { index, sub_index }
    }

    /// Creates a new `InvalidValue` error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidFrame` error.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::SdoError;
    ///
    /// let err = SdoError::invalid_frame("expected 8 bytes, got 3");
    /// ```
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Creates a new `Transport` error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_not_found_display() {
        let err = SdoError::object_not_found(0x6041, 0);
        assert_eq!(
            err.to_string(),
            "Object 0x6041.00 not found in object dictionary"
        );
    }

    #[test]
    fn test_invalid_value_display() {
        let err = SdoError::invalid_value("300 does not fit UINT8");
        assert_eq!(err.to_string(), "Invalid value: 300 does not fit UINT8");
    }

    #[test]
    fn test_out_of_limits_display() {
        let err = SdoError::OutOfLimits {
            index: 0x2000,
            sub_index: 0x0A,
        };
        assert_eq!(err.to_string(), "Value out of limits for 0x2000.0A");
    }

    #[test]
    fn test_bus_not_ready_display() {
        assert_eq!(SdoError::BusNotReady.to_string(), "Bus not ready to send");
    }

    #[test]
    fn test_unknown_node_display() {
        let err = SdoError::UnknownNode { node_id: 5 };
        assert_eq!(err.to_string(), "Unknown node 5");
    }
}
