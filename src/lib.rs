//! # CANopen SDO Client Library
//!
//! A Rust library for reading and writing the object dictionaries of remote
//! CANopen nodes through SDO (Service Data Object) transfers.
//!
//! Every SDO exchange is one 8-byte CAN frame. Values of any size are moved
//! through those frames with the three CiA 301 transfer modes, and the
//! results land in a local copy of each node's object dictionary.
//!
//! ## Features
//!
//! - **Complete client**: expedited, segmented and block transfers, both directions
//! - **Non-blocking**: the engine sends a frame and returns; frames and timers drive it
//! - **One request at a time per node**: strict FIFO, reads to the same entry merged
//! - **Typed values**: every CiA 301 integer width, reals, strings and domains
//! - **Observable**: every finished transfer is published on a channel
//! - **Transport agnostic**: plug any CAN driver behind the [`Transport`] trait
//!
//! ## Quick Start
//!
//! ```
//! use canopen_sdo::{
//!     AccessType, Bus, CanFrame, DataType, MemoryTransport, NodeIndex, NodeOd, NodeSubIndex,
//!     ObjectType, RequestFlags, Value,
//! };
//!
//! fn main() -> canopen_sdo::Result<()> {
//!     // Describe the remote node (usually built from its EDS file)
//!     let mut od = NodeOd::new(0, 4);
//!     od.insert_index(
//!         NodeIndex::new(0x1017, "Producer heartbeat time", ObjectType::Var).with_sub_index(
//!             NodeSubIndex::new(0, "Producer heartbeat time", DataType::Unsigned16, AccessType::READ | AccessType::WRITE)
//!                 .with_default_value(Value::U16(0)),
//!         ),
//!     );
//!
//!     let mut bus = Bus::new(0, MemoryTransport::new());
//!     bus.add_node(od);
//!     let events = bus.subscribe(4)?;
//!
//!     // Write 500 ms: sent as an expedited download on COB-ID 0x604
//!     let heartbeat = bus.node(4).unwrap().od().object_id(0x1017, 0).unwrap();
//!     bus.download(heartbeat, Value::U16(500))?;
//!
//!     // The node confirms on COB-ID 0x584
//!     bus.handle_frame(&CanFrame::new(0x584, [0x60, 0x17, 0x10, 0x00, 0, 0, 0, 0]));
//!
//!     let event = events.try_recv().unwrap();
//!     assert_eq!(event.object_id, heartbeat);
//!     assert_eq!(event.flags, RequestFlags::WRITE);
//!     Ok(())
//! }
//! ```
//!
//! ## Transfer Modes
//!
//! | Mode | Payload | Frames |
//! |------|---------|--------|
//! | Expedited | up to 4 bytes | initiate + response |
//! | Segmented | any size | initiate, then one request/response per 7 bytes, toggle bit alternating |
//! | Block | any size, `DOMAIN` entries | initiate, then acknowledged blocks of up to 127 numbered segments |
//!
//! The client picks the mode when a transfer starts: `DOMAIN` entries always
//! use block transfer; other downloads are expedited when they fit in 4
//! bytes and segmented otherwise; other uploads follow what the server
//! answers.
//!
//! ## Driving the Engine
//!
//! The library never blocks and never spawns. The host loop hands received
//! frames to [`Bus::handle_frame`] and calls [`Bus::poll`] when
//! [`Bus::next_deadline`] is reached:
//!
//! ```no_run
//! # use canopen_sdo::{Bus, CanFrame, MemoryTransport};
//! # use std::time::{Duration, Instant};
//! # let mut bus = Bus::new(0, MemoryTransport::new());
//! # fn receive(_: Duration) -> Option<CanFrame> { None }
//! loop {
//!     let wait = bus
//!         .next_deadline()
//!         .map_or(Duration::from_millis(100), |d| d.saturating_duration_since(Instant::now()));
//!     if let Some(frame) = receive(wait) {
//!         bus.handle_frame(&frame);
//!     }
//!     bus.poll(Instant::now());
//! }
//! ```
//!
//! ## Error Handling
//!
//! Requests that can never succeed are refused up front with an
//! [`SdoError`]. Everything that goes wrong during a transfer ends it with
//! an [`AbortCode`] stored in the record and published as an `ERROR`
//! notification:
//!
//! ```
//! # use canopen_sdo::{AccessType, Bus, CanFrame, DataType, MemoryTransport, NodeIndex, NodeOd, NodeSubIndex, ObjectType, Value};
//! use canopen_sdo::{AbortCode, SdoError};
//!
//! # let mut od = NodeOd::new(0, 4);
//! # od.insert_index(NodeIndex::new(0x1017, "Heartbeat", ObjectType::Var).with_sub_index(
//! #     NodeSubIndex::new(0, "Heartbeat", DataType::Unsigned16, AccessType::READ | AccessType::WRITE)));
//! # let mut bus = Bus::new(0, MemoryTransport::new());
//! # bus.add_node(od);
//! let id = bus.node(4).unwrap().od().object_id(0x1017, 0).unwrap();
//!
//! // Does not fit a UNSIGNED16
//! match bus.download(id, Value::U32(70_000)) {
//!     Err(SdoError::InvalidValue { reason }) => println!("refused: {}", reason),
//!     other => panic!("unexpected {:?}", other),
//! }
//!
//! // The node refuses the write
//! bus.download(id, Value::U16(1))?;
//! bus.handle_frame(&CanFrame::new(0x584, [0x80, 0x17, 0x10, 0x00, 0x02, 0x00, 0x01, 0x06]));
//! let error = bus.node(4).unwrap().od().error(&id).unwrap();
//! assert_eq!(error, AbortCode::READ_ONLY);
//! assert_eq!(error.to_string(), "0x06010002 (Attempt to write a read only object)");
//! # Ok::<(), SdoError>(())
//! ```
//!
//! ## Configuration
//!
//! ```
//! use canopen_sdo::SdoConfig;
//! use std::time::Duration;
//!
//! let config = SdoConfig::new()
//!     .with_timeout(Duration::from_millis(500))       // default: 1 s
//!     .with_pacing_interval(Duration::from_millis(2)) // default: 1 ms
//!     .with_block_size(64)                            // default: 127
//!     .with_crc(true);                                // default: off
//! ```
//!
//! ## Logging
//!
//! The library logs through the [`log`](https://docs.rs/log) facade: `debug`
//! for transfers starting and ending, `trace` for every frame, `warn` for
//! aborts and frames the bus refused. Install any logger to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod abort;
mod bus;
pub mod codec;
mod data_type;
mod error;
mod frame;
mod object_id;
mod od;
mod request;
mod sdo;
mod subindex;
mod transport;
pub mod utils;
mod value;

// Public re-exports
pub use abort::AbortCode;
pub use bus::{Bus, Node};
pub use data_type::DataType;
pub use error::{Result, SdoError};
pub use frame::{
    BlockSegment, CanFrame, ClientRequest, ServerResponse, BLOCK_MAX, EXPEDITED_MAX,
    SDO_CLIENT_TO_SERVER, SDO_FRAME_SIZE, SDO_SERVER_TO_CLIENT, SEGMENT_SIZE,
};
pub use object_id::ObjectId;
pub use od::{NodeIndex, NodeOd, Notification, ObjectType, RequestFlags};
pub use request::{Direction, TransferRequest};
pub use sdo::{
    Sdo, SdoConfig, SdoState, DEFAULT_PACING_INTERVAL, DEFAULT_TIMEOUT, MAX_BLOCK_RETRIES,
};
pub use subindex::{AccessType, NodeSubIndex};
pub use transport::{MemoryTransport, Transport};
pub use value::Value;
