//! Addressing of object dictionary entries across the bus.
//!
//! An [`ObjectId`] names one entry: which bus, which node on that bus, the
//! 16-bit index, the 8-bit sub-index, and the element type the entry
//! declares. It is the key callers use to enqueue transfers and the payload
//! carried by every store [`Notification`](crate::Notification).
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{DataType, ObjectId};
//!
//! let id = ObjectId::new(0, 3, 0x6041, 0, DataType::Unsigned16);
//! assert_eq!(id.to_string(), "bus 0 node 3 0x6041.00 (UINT16)");
//! assert!(id.same_object(&ObjectId::new(0, 3, 0x6041, 0, DataType::None)));
//! ```

use crate::data_type::DataType;
use crate::utils::format_object;

/// Identity of an object dictionary entry on a bus.
///
/// Equality and hashing cover every field, the declared data type included.
/// Use [`ObjectId::same_object`] to compare addresses only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId {
    /// Bus identity.
    pub bus_id: u8,
    /// Node identity (1-127 on a CANopen network).
    pub node_id: u8,
    /// Object index.
    pub index: u16,
    /// Object sub-index.
    pub sub_index: u8,
    /// Declared element type.
    pub data_type: DataType,
}

impl ObjectId {
    /// Creates a fully specified object id.
    pub fn new(bus_id: u8, node_id: u8, index: u16, sub_index: u8, data_type: DataType) -> Self {
        Self {
            bus_id,
            node_id,
            index,
            sub_index,
            data_type,
        }
    }

    /// Returns the same address with a different declared type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Returns whether both ids address the same entry on the same node,
    /// regardless of declared type.
    pub fn same_object(&self, other: &ObjectId) -> bool {
        self.bus_id == other.bus_id
            && self.node_id == other.node_id
            && self.index == other.index
            && self.sub_index == other.sub_index
    }

    /// Returns the 24-bit multiplexer (index << 8 | sub-index).
    pub fn key(&self) -> u32 {
        (u32::from(self.index) << 8) | u32::from(self.sub_index)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bus {} node {} {} ({})",
            self.bus_id,
            self.node_id,
            format_object(self.index, self.sub_index),
            self.data_type
        )
    }
}
