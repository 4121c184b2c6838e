//! Node object dictionary: the parameter store the transfer engine writes to.
//!
//! A [`NodeOd`] belongs to one remote node. It groups records
//! ([`NodeSubIndex`]) into indices ([`NodeIndex`]) and publishes a
//! [`Notification`] to every subscriber each time a transfer completes or
//! aborts. Subscribers receive notifications over a channel, so the store has
//! no knowledge of who is listening.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{AccessType, DataType, NodeIndex, NodeOd, NodeSubIndex, ObjectType};
//!
//! let mut od = NodeOd::new(0, 2);
//! let mut index = NodeIndex::new(0x1017, "Producer heartbeat time", ObjectType::Var);
//! index.add_sub_index(NodeSubIndex::new(0, "Producer heartbeat time", DataType::Unsigned16, AccessType::READ | AccessType::WRITE));
//! od.insert_index(index);
//!
//! let id = od.object_id(0x1017, 0).unwrap();
//! assert_eq!(id.data_type, DataType::Unsigned16);
//! assert!(od.record_exists(&id));
//! ```

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

use bitflags::bitflags;
use log::debug;

use crate::abort::AbortCode;
use crate::error::{Result, SdoError};
use crate::object_id::ObjectId;
use crate::request::Direction;
use crate::subindex::NodeSubIndex;
use crate::value::Value;

bitflags! {
    /// Outcome tags carried by a [`Notification`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestFlags: u8 {
        /// A read (upload) completed or failed.
        const READ = 0x01;
        /// A write (download) completed or failed.
        const WRITE = 0x02;
        /// The transfer aborted.
        const ERROR = 0x04;
    }
}

impl RequestFlags {
    /// Flags for a transfer in `direction`, with `ERROR` when it failed.
    pub fn for_outcome(direction: Direction, failed: bool) -> Self {
        let mut flags = match direction {
            Direction::Upload => Self::READ,
            Direction::Download => Self::WRITE,
        };
        if failed {
            flags |= Self::ERROR;
        }
        flags
    }
}

/// Store mutation published to subscribers, once per finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Entry that changed.
    pub object_id: ObjectId,
    /// What happened to it.
    pub flags: RequestFlags,
}

/// Kind of object stored at an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    /// Single value at sub-index 0.
    #[default]
    Var,
    /// Array of same-typed sub-indices.
    Array,
    /// Record of differently typed sub-indices.
    Record,
}

/// A named group of up to 256 records sharing one 16-bit index.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIndex {
    index: u16,
    name: String,
    object_type: ObjectType,
    sub_indexes: BTreeMap<u8, NodeSubIndex>,
}

impl NodeIndex {
    /// Creates an empty index.
    pub fn new(index: u16, name: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            index,
            name: name.into(),
            object_type,
            sub_indexes: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a record, keyed by its sub-index.
    pub fn add_sub_index(&mut self, sub_index: NodeSubIndex) {
        self.sub_indexes.insert(sub_index.sub_index(), sub_index);
    }

    /// Builder form of [`NodeIndex::add_sub_index`].
    pub fn with_sub_index(mut self, sub_index: NodeSubIndex) -> Self {
        self.add_sub_index(sub_index);
        self
    }

    /// Index number.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object kind.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Record at `sub_index`, if any.
    pub fn sub_index(&self, sub_index: u8) -> Option<&NodeSubIndex> {
        self.sub_indexes.get(&sub_index)
    }

    /// Mutable record at `sub_index`, if any.
    pub fn sub_index_mut(&mut self, sub_index: u8) -> Option<&mut NodeSubIndex> {
        self.sub_indexes.get_mut(&sub_index)
    }

    /// Records in sub-index order.
    pub fn sub_indexes(&self) -> impl Iterator<Item = &NodeSubIndex> {
        self.sub_indexes.values()
    }

    /// Number of records.
    pub fn sub_index_count(&self) -> usize {
        self.sub_indexes.len()
    }
}

/// Object dictionary of one remote node.
#[derive(Debug)]
pub struct NodeOd {
    bus_id: u8,
    node_id: u8,
    indexes: BTreeMap<u16, NodeIndex>,
    subscribers: Vec<Sender<Notification>>,
}

impl NodeOd {
    /// Creates an empty dictionary for `node_id` on `bus_id`.
    pub fn new(bus_id: u8, node_id: u8) -> Self {
        Self {
            bus_id,
            node_id,
            indexes: BTreeMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Bus identity.
    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    /// Node identity.
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Adds (or replaces) an index.
    pub fn insert_index(&mut self, index: NodeIndex) {
        self.indexes.insert(index.index(), index);
    }

    /// Index `index`, if present.
    pub fn index(&self, index: u16) -> Option<&NodeIndex> {
        self.indexes.get(&index)
    }

    /// Mutable index `index`, if present.
    pub fn index_mut(&mut self, index: u16) -> Option<&mut NodeIndex> {
        self.indexes.get_mut(&index)
    }

    /// Indices in index order.
    pub fn indexes(&self) -> impl Iterator<Item = &NodeIndex> {
        self.indexes.values()
    }

    /// Number of indices.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Builds the [`ObjectId`] of an existing record, with its declared type.
    pub fn object_id(&self, index: u16, sub_index: u8) -> Option<ObjectId> {
        let record = self.indexes.get(&index)?.sub_index(sub_index)?;
        Some(ObjectId::new(
            self.bus_id,
            self.node_id,
            index,
            sub_index,
            record.data_type(),
        ))
    }

    /// Record addressed by `object_id` (index and sub-index only).
    pub fn record(&self, object_id: &ObjectId) -> Option<&NodeSubIndex> {
        self.indexes
            .get(&object_id.index)?
            .sub_index(object_id.sub_index)
    }

    /// Mutable record addressed by `object_id`.
    pub fn record_mut(&mut self, object_id: &ObjectId) -> Option<&mut NodeSubIndex> {
        self.indexes
            .get_mut(&object_id.index)?
            .sub_index_mut(object_id.sub_index)
    }

    /// Returns whether a record exists at `object_id`.
    pub fn record_exists(&self, object_id: &ObjectId) -> bool {
        self.record(object_id).is_some()
    }

    /// Current value of the record at `object_id`.
    pub fn value(&self, object_id: &ObjectId) -> Option<&Value> {
        self.record(object_id)?.value()
    }

    /// Last abort code of the record at `object_id`.
    pub fn error(&self, object_id: &ObjectId) -> Option<AbortCode> {
        self.record(object_id).map(NodeSubIndex::error)
    }

    /// Stages a value locally, without any transfer and without notifying.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::ObjectNotFound` for unknown records and
    /// `SdoError::InvalidValue` for values that do not fit the declared type.
    pub fn set_value(&mut self, object_id: &ObjectId, value: Value) -> Result<()> {
        self.record_mut(object_id)
            .ok_or_else(|| SdoError::object_not_found(object_id.index, object_id.sub_index))?
            .set_value(value)
    }

    /// Restores every record to its default value.
    pub fn reset_all_values(&mut self) {
        for index in self.indexes.values_mut() {
            for record in index.sub_indexes.values_mut() {
                record.reset_value();
            }
        }
    }

    /// Registers a new subscriber and returns its end of the channel.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Commits the result of a successful transfer: stores `value` with a
    /// fresh timestamp, clears the error and notifies subscribers.
    ///
    /// Unknown records are ignored.
    pub fn commit_value(&mut self, object_id: &ObjectId, value: Option<Value>, direction: Direction) {
        let Some(record) = self.record_mut(object_id) else {
            debug!("commit on unknown object {}", object_id);
            return;
        };
        record.store_value(value);
        record.clear_error();
        self.notify(*object_id, RequestFlags::for_outcome(direction, false));
    }

    /// Commits a failed transfer: stores the abort code, keeps the value and
    /// notifies subscribers.
    ///
    /// Unknown records are ignored.
    pub fn commit_error(&mut self, object_id: &ObjectId, code: AbortCode, direction: Direction) {
        let Some(record) = self.record_mut(object_id) else {
            debug!("error commit on unknown object {}", object_id);
            return;
        };
        record.set_error(code);
        self.notify(*object_id, RequestFlags::for_outcome(direction, true));
    }

    fn notify(&mut self, object_id: ObjectId, flags: RequestFlags) {
        let notification = Notification { object_id, flags };
        // Drop subscribers whose receiver is gone
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::subindex::AccessType;

    fn sample_od() -> NodeOd {
        let mut od = NodeOd::new(1, 4);
        od.insert_index(
            NodeIndex::new(0x2000, "Config", ObjectType::Record)
                .with_sub_index(NodeSubIndex::new(
                    0,
                    "Highest sub-index",
                    DataType::Unsigned8,
                    AccessType::READ,
                ))
                .with_sub_index(
                    NodeSubIndex::new(1, "Gain", DataType::Integer32, AccessType::all())
                        .with_default_value(Value::I32(10)),
                ),
        );
        od
    }

    #[test]
    fn test_lookup() {
        let od = sample_od();
        assert_eq!(od.index_count(), 1);
        assert_eq!(od.index(0x2000).unwrap().sub_index_count(), 2);
        assert_eq!(od.index(0x2000).unwrap().object_type(), ObjectType::Record);

        let id = od.object_id(0x2000, 1).unwrap();
        assert_eq!(id, ObjectId::new(1, 4, 0x2000, 1, DataType::Integer32));
        assert_eq!(od.value(&id), Some(&Value::I32(10)));
        assert!(od.object_id(0x2000, 2).is_none());
        assert!(od.object_id(0x2001, 0).is_none());
    }

    #[test]
    fn test_commit_value_notifies() {
        let mut od = sample_od();
        let rx = od.subscribe();
        let id = od.object_id(0x2000, 1).unwrap();

        od.record_mut(&id).unwrap().set_error(AbortCode::TIMEOUT);
        od.commit_value(&id, Some(Value::I32(-3)), Direction::Upload);

        assert_eq!(od.value(&id), Some(&Value::I32(-3)));
        assert_eq!(od.error(&id), Some(AbortCode(0)));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.object_id, id);
        assert_eq!(n.flags, RequestFlags::READ);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_commit_error_keeps_value() {
        let mut od = sample_od();
        let rx = od.subscribe();
        let id = od.object_id(0x2000, 1).unwrap();

        od.commit_error(&id, AbortCode::READ_ONLY, Direction::Download);

        assert_eq!(od.value(&id), Some(&Value::I32(10)));
        assert_eq!(od.error(&id), Some(AbortCode::READ_ONLY));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.flags, RequestFlags::WRITE | RequestFlags::ERROR);
    }

    #[test]
    fn test_every_subscriber_is_notified() {
        let mut od = sample_od();
        let a = od.subscribe();
        let b = od.subscribe();
        let id = od.object_id(0x2000, 0).unwrap();

        od.commit_value(&id, Some(Value::U8(1)), Direction::Upload);

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut od = sample_od();
        let kept = od.subscribe();
        drop(od.subscribe());
        assert_eq!(od.subscriber_count(), 2);

        let id = od.object_id(0x2000, 0).unwrap();
        od.commit_value(&id, Some(Value::U8(1)), Direction::Upload);

        assert_eq!(od.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_commit_unknown_object_is_ignored() {
        let mut od = sample_od();
        let rx = od.subscribe();
        let id = ObjectId::new(1, 4, 0x3000, 0, DataType::Unsigned8);
        od.commit_value(&id, Some(Value::U8(1)), Direction::Upload);
        od.commit_error(&id, AbortCode::TIMEOUT, Direction::Upload);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_value_and_reset_all() {
        let mut od = sample_od();
        let id = od.object_id(0x2000, 1).unwrap();
        od.set_value(&id, Value::I32(99)).unwrap();
        assert_eq!(od.value(&id), Some(&Value::I32(99)));
        assert!(od.set_value(&id, Value::from("x")).is_err());

        let missing = ObjectId::new(1, 4, 0x3000, 0, DataType::Unsigned8);
        assert!(matches!(
            od.set_value(&missing, Value::U8(1)),
            Err(SdoError::ObjectNotFound { index: 0x3000, .. })
        ));

        od.reset_all_values();
        assert_eq!(od.value(&id), Some(&Value::I32(10)));
    }

    #[test]
    fn test_request_flags_for_outcome() {
        assert_eq!(
            RequestFlags::for_outcome(Direction::Upload, false),
            RequestFlags::READ
        );
        assert_eq!(
            RequestFlags::for_outcome(Direction::Download, true),
            RequestFlags::WRITE | RequestFlags::ERROR
        );
    }
}
