//! Nodes and the bus that routes frames to them.
//!
//! A [`Node`] pairs the object dictionary of a remote device with the SDO
//! engine that fills it. A [`Bus`] owns the transport and every node on it:
//! it forwards requests to the right engine, dispatches received frames by
//! COB-ID and fires the engines' timers from a single [`Bus::poll`].
//!
//! Engines share nothing but the transport, so one node's transfer never
//! waits for another's.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use canopen_sdo::{
//!     AccessType, Bus, CanFrame, DataType, MemoryTransport, NodeIndex, NodeOd, NodeSubIndex,
//!     ObjectType, Value,
//! };
//!
//! let mut od = NodeOd::new(0, 3);
//! od.insert_index(NodeIndex::new(0x6040, "Controlword", ObjectType::Var)
//!     .with_sub_index(NodeSubIndex::new(0, "Controlword", DataType::Unsigned16, AccessType::READ | AccessType::WRITE)));
//!
//! let mut bus = Bus::new(0, MemoryTransport::new());
//! bus.add_node(od);
//!
//! let id = bus.node(3).unwrap().od().object_id(0x6040, 0).unwrap();
//! bus.download(id, Value::U16(0x000F))?;
//! assert_eq!(bus.transport().last().unwrap().id, 0x603);
//!
//! bus.handle_frame(&CanFrame::new(0x583, [0x60, 0x40, 0x60, 0x00, 0, 0, 0, 0]));
//! assert_eq!(bus.node(3).unwrap().od().value(&id), Some(&Value::U16(0x000F)));
//!
//! bus.poll(Instant::now());
//! assert!(bus.is_idle());
//! # Ok::<(), canopen_sdo::SdoError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use log::{debug, trace};

use crate::error::{Result, SdoError};
use crate::frame::CanFrame;
use crate::object_id::ObjectId;
use crate::od::{NodeOd, Notification};
use crate::sdo::{Sdo, SdoConfig};
use crate::transport::Transport;
use crate::value::Value;

/// A remote node: its object dictionary and its SDO engine.
#[derive(Debug)]
pub struct Node {
    od: NodeOd,
    sdo: Sdo,
}

impl Node {
    /// Creates a node around `od`, with an engine for the same node id.
    pub fn new(od: NodeOd, config: SdoConfig) -> Self {
        let sdo = Sdo::new(od.node_id(), config);
        Self { od, sdo }
    }

    /// Node identity.
    pub fn node_id(&self) -> u8 {
        self.od.node_id()
    }

    /// Object dictionary.
    pub fn od(&self) -> &NodeOd {
        &self.od
    }

    /// Mutable object dictionary, for population and local staging.
    pub fn od_mut(&mut self) -> &mut NodeOd {
        &mut self.od
    }

    /// SDO engine.
    pub fn sdo(&self) -> &Sdo {
        &self.sdo
    }

    /// Queues a read on this node.
    ///
    /// # Errors
    ///
    /// See [`Sdo::upload`].
    pub fn upload(&mut self, transport: &mut dyn Transport, object_id: ObjectId) -> Result<()> {
        self.sdo.upload(&mut self.od, transport, object_id)
    }

    /// Queues a write on this node.
    ///
    /// # Errors
    ///
    /// See [`Sdo::download`].
    pub fn download(
        &mut self,
        transport: &mut dyn Transport,
        object_id: ObjectId,
        value: Value,
    ) -> Result<()> {
        self.sdo.download(&mut self.od, transport, object_id, value)
    }

    /// Feeds a received frame to the engine.
    pub fn process_frame(&mut self, transport: &mut dyn Transport, frame: &CanFrame) {
        self.sdo.process_frame(&mut self.od, transport, frame);
    }

    /// Fires the engine timers due at `now`.
    pub fn poll(&mut self, transport: &mut dyn Transport, now: Instant) {
        self.sdo.poll(&mut self.od, transport, now);
    }
}

/// A CAN bus: one transport and the nodes reached through it.
pub struct Bus<T: Transport> {
    bus_id: u8,
    transport: T,
    config: SdoConfig,
    nodes: BTreeMap<u8, Node>,
}

impl<T: Transport> Bus<T> {
    /// Creates an empty bus using the default engine configuration.
    pub fn new(bus_id: u8, transport: T) -> Self {
        Self::with_config(bus_id, transport, SdoConfig::default())
    }

    /// Creates an empty bus whose nodes use `config`.
    pub fn with_config(bus_id: u8, transport: T, config: SdoConfig) -> Self {
        Self {
            bus_id,
            transport,
            config,
            nodes: BTreeMap::new(),
        }
    }

    /// Bus identity.
    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    /// Transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Adds the node described by `od`, replacing any node with the same id.
    pub fn add_node(&mut self, od: NodeOd) -> &mut Node {
        let node_id = od.node_id();
        debug!("bus {}: adding node {}", self.bus_id, node_id);
        self.nodes.remove(&node_id);
        self.nodes
            .entry(node_id)
            .or_insert_with(|| Node::new(od, self.config.clone()))
    }

    /// Removes a node and returns it.
    pub fn remove_node(&mut self, node_id: u8) -> Option<Node> {
        self.nodes.remove(&node_id)
    }

    /// Node `node_id`, if present.
    pub fn node(&self, node_id: u8) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Mutable node `node_id`, if present.
    pub fn node_mut(&mut self, node_id: u8) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Nodes in node id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Subscribes to the store notifications of node `node_id`.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::UnknownNode` if no such node is on the bus.
    pub fn subscribe(&mut self, node_id: u8) -> Result<Receiver<Notification>> {
        self.nodes
            .get_mut(&node_id)
            .map(|node| node.od.subscribe())
            .ok_or(SdoError::UnknownNode { node_id })
    }

    /// Queues a read of `object_id` on its node.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::UnknownNode` if the node is not on this bus, or any
    /// error of [`Sdo::upload`].
    pub fn upload(&mut self, object_id: ObjectId) -> Result<()> {
        let node = Self::route(&mut self.nodes, self.bus_id, &object_id)?;
        node.upload(&mut self.transport, object_id)
    }

    /// Queues a write of `value` to `object_id` on its node.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::UnknownNode` if the node is not on this bus, or any
    /// error of [`Sdo::download`].
    pub fn download(&mut self, object_id: ObjectId, value: Value) -> Result<()> {
        let node = Self::route(&mut self.nodes, self.bus_id, &object_id)?;
        node.download(&mut self.transport, object_id, value)
    }

    /// Hands a received frame to the node whose SDO channel it belongs to.
    ///
    /// Frames of no known node are dropped.
    pub fn handle_frame(&mut self, frame: &CanFrame) {
        match self
            .nodes
            .values_mut()
            .find(|node| node.sdo.cob_id_rx() == frame.id)
        {
            Some(node) => node.process_frame(&mut self.transport, frame),
            None => trace!("bus {}: no node for 0x{:03X}", self.bus_id, frame.id),
        }
    }

    /// Fires every engine timer due at `now`.
    pub fn poll(&mut self, now: Instant) {
        for node in self.nodes.values_mut() {
            node.poll(&mut self.transport, now);
        }
    }

    /// Earliest deadline over all engines, for the host event loop.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.nodes
            .values()
            .filter_map(|node| node.sdo.next_deadline())
            .min()
    }

    /// Returns whether no node has a transfer active or queued.
    pub fn is_idle(&self) -> bool {
        self.nodes.values().all(|node| node.sdo.is_idle())
    }

    fn route<'a>(
        nodes: &'a mut BTreeMap<u8, Node>,
        bus_id: u8,
        object_id: &ObjectId,
    ) -> Result<&'a mut Node> {
        if object_id.bus_id != bus_id {
            return Err(SdoError::UnknownNode {
                node_id: object_id.node_id,
            });
        }
        nodes
            .get_mut(&object_id.node_id)
            .ok_or(SdoError::UnknownNode {
                node_id: object_id.node_id,
            })
    }
}

impl<T: Transport> std::fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("bus_id", &self.bus_id)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
