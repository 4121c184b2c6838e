//! SDO client transfer engine.
//!
//! One [`Sdo`] drives the SDO channel of one remote node. Callers queue
//! uploads and downloads; the engine runs them strictly one at a time, in
//! FIFO order, and writes each result into the node's [`NodeOd`].
//!
//! The engine never blocks. It sends one frame and returns; it resumes when
//! the host hands it the next received frame ([`Sdo::process_frame`]) or
//! when one of its two timers is due ([`Sdo::poll`]):
//!
//! - the **timeout** timer, re-armed on every frame sent, aborts the active
//!   transfer with [`AbortCode::TIMEOUT`];
//! - the **pacing** timer spaces out block download segments, one segment
//!   per tick.
//!
//! # Transfer modes
//!
//! | Entry / payload | Upload | Download |
//! |-----------------|--------|----------|
//! | `DOMAIN` type | block | block |
//! | 1-4 bytes | expedited or segmented, as the server answers | expedited |
//! | anything else | expedited or segmented, as the server answers | segmented |
//!
//! # Outcome
//!
//! A finished transfer commits its value (fresh timestamp, error cleared)
//! and notifies with `READ` or `WRITE`. An aborted transfer writes the abort
//! code into the record, keeps the value, and notifies with `ERROR` added.
//! Locally detected aborts are also sent to the server as an abort frame;
//! aborts received from the server are not answered.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{
//!     AccessType, CanFrame, DataType, MemoryTransport, NodeIndex, NodeOd, NodeSubIndex,
//!     ObjectType, RequestFlags, Sdo, SdoConfig, SdoState, Value,
//! };
//!
//! let mut od = NodeOd::new(0, 5);
//! od.insert_index(NodeIndex::new(0x1017, "Producer heartbeat time", ObjectType::Var)
//!     .with_sub_index(NodeSubIndex::new(0, "Producer heartbeat time", DataType::Unsigned16, AccessType::READ | AccessType::WRITE)));
//! let events = od.subscribe();
//!
//! let mut sdo = Sdo::new(5, SdoConfig::default());
//! let mut transport = MemoryTransport::new();
//! let id = od.object_id(0x1017, 0).unwrap();
//!
//! sdo.upload(&mut od, &mut transport, id)?;
//! assert_eq!(transport.last().unwrap().data, [0x40, 0x17, 0x10, 0x00, 0, 0, 0, 0]);
//!
//! // Expedited answer carrying 1000 (0x03E8) on two bytes
//! let answer = CanFrame::new(0x585, [0x4B, 0x17, 0x10, 0x00, 0xE8, 0x03, 0, 0]);
//! sdo.process_frame(&mut od, &mut transport, &answer);
//!
//! assert_eq!(sdo.state(), SdoState::Free);
//! assert_eq!(od.value(&id), Some(&Value::U16(1000)));
//! assert_eq!(events.try_recv().unwrap().flags, RequestFlags::READ);
//! # Ok::<(), canopen_sdo::SdoError>(())
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::abort::AbortCode;
use crate::codec;
use crate::error::{Result, SdoError};
use crate::frame::{
    is_abort, BlockSegment, CanFrame, ClientRequest, ServerResponse, BLOCK_MAX, EXPEDITED_MAX,
    SDO_CLIENT_TO_SERVER, SDO_FRAME_SIZE, SDO_SERVER_TO_CLIENT, SEGMENT_SIZE,
};
use crate::object_id::ObjectId;
use crate::od::NodeOd;
use crate::request::{
    block_size_for, final_padding, BlockDownload, BlockUpload, Direction, Phase, TransferRequest,
};
use crate::transport::Transport;
use crate::utils::{crc16, format_bytes, format_object};
use crate::value::Value;

/// Default SDO timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default delay between two block download segments.
pub const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(1);

/// Blocks the server may acknowledge short before the block download aborts.
pub const MAX_BLOCK_RETRIES: u8 = 3;

/// Configuration of an SDO engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoConfig {
    /// Time allowed for the server to answer a frame.
    pub timeout: Duration,
    /// Delay between two block download segments.
    pub pacing_interval: Duration,
    /// Segments per block requested on block uploads (1-127).
    pub block_size: u8,
    /// Advertise CRC support on block transfers.
    pub crc: bool,
    /// COB-ID base of client-to-server frames.
    pub cob_id_client_to_server: u32,
    /// COB-ID base of server-to-client frames.
    pub cob_id_server_to_client: u32,
}

impl Default for SdoConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            pacing_interval: DEFAULT_PACING_INTERVAL,
            block_size: BLOCK_MAX,
            crc: false,
            cob_id_client_to_server: SDO_CLIENT_TO_SERVER,
            cob_id_server_to_client: SDO_SERVER_TO_CLIENT,
        }
    }
}

impl SdoConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response timeout (default is 1 second).
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::SdoConfig;
    /// use std::time::Duration;
    ///
    /// let config = SdoConfig::new().with_timeout(Duration::from_millis(250));
    /// assert_eq!(config.timeout, Duration::from_millis(250));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay between block download segments (default is 1 ms).
    pub fn with_pacing_interval(mut self, interval: Duration) -> Self {
        self.pacing_interval = interval;
        self
    }

    /// Sets the segments per block requested on block uploads.
    ///
    /// The value is clamped to `1..=127`.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::SdoConfig;
    ///
    /// assert_eq!(SdoConfig::new().with_block_size(200).block_size, 127);
    /// assert_eq!(SdoConfig::new().with_block_size(0).block_size, 1);
    /// ```
    pub fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size.clamp(1, BLOCK_MAX);
        self
    }

    /// Enables CRC checking on block transfers.
    pub fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    /// Sets the COB-ID bases of both directions.
    pub fn with_cob_ids(mut self, client_to_server: u32, server_to_client: u32) -> Self {
        self.cob_id_client_to_server = client_to_server;
        self.cob_id_server_to_client = server_to_client;
        self
    }
}

/// Externally visible state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdoState {
    /// No transfer in progress.
    #[default]
    Free,
    /// Initiate upload sent.
    Upload,
    /// Segmented upload in progress.
    UploadSegment,
    /// Block upload initiated or streaming.
    BlockUpload,
    /// Block upload waiting for its end frame.
    BlockUploadEnd,
    /// Initiate download sent.
    Download,
    /// Segmented download in progress.
    DownloadSegment,
    /// Block download initiated or streaming.
    BlockDownload,
    /// Block download end sent.
    BlockDownloadEnd,
}

impl std::fmt::Display for SdoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SdoState::Free => "FREE",
            SdoState::Upload => "UPLOAD",
            SdoState::UploadSegment => "UPLOAD_SEGMENT",
            SdoState::BlockUpload => "BLOCK_UPLOAD",
            SdoState::BlockUploadEnd => "BLOCK_UPLOAD_END",
            SdoState::Download => "DOWNLOAD",
            SdoState::DownloadSegment => "DOWNLOAD_SEGMENT",
            SdoState::BlockDownload => "BLOCK_DOWNLOAD",
            SdoState::BlockDownloadEnd => "BLOCK_DOWNLOAD_END",
        };
        write!(f, "{}", name)
    }
}

/// Result of feeding one event to the active request.
#[derive(Debug)]
enum Step {
    Continue,
    Complete(Option<Value>),
    Abort(AbortCode),
    PeerAbort(AbortCode),
}

/// SDO client engine for one remote node.
pub struct Sdo {
    node_id: u8,
    config: SdoConfig,
    queue: VecDeque<TransferRequest>,
    active: Option<TransferRequest>,
    timeout_deadline: Option<Instant>,
    pacing_deadline: Option<Instant>,
}

impl Sdo {
    /// Creates an idle engine for `node_id`.
    pub fn new(node_id: u8, config: SdoConfig) -> Self {
        Self {
            node_id,
            config,
            queue: VecDeque::new(),
            active: None,
            timeout_deadline: None,
            pacing_deadline: None,
        }
    }

    /// Node this engine talks to.
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Engine configuration.
    pub fn config(&self) -> &SdoConfig {
        &self.config
    }

    /// COB-ID of frames sent to the server.
    pub fn cob_id_tx(&self) -> u32 {
        self.config.cob_id_client_to_server + u32::from(self.node_id)
    }

    /// COB-ID of frames received from the server.
    pub fn cob_id_rx(&self) -> u32 {
        self.config.cob_id_server_to_client + u32::from(self.node_id)
    }

    /// Current protocol state.
    pub fn state(&self) -> SdoState {
        let Some(request) = &self.active else {
            return SdoState::Free;
        };
        match request.phase {
            Phase::Queued => SdoState::Free,
            Phase::Upload => SdoState::Upload,
            Phase::UploadSegment { .. } => SdoState::UploadSegment,
            Phase::BlockUpload(_) => SdoState::BlockUpload,
            Phase::BlockUploadEnd { .. } => SdoState::BlockUploadEnd,
            Phase::Download { .. } => SdoState::Download,
            Phase::DownloadSegment { .. } => SdoState::DownloadSegment,
            Phase::BlockDownload(_) => SdoState::BlockDownload,
            Phase::BlockDownloadEnd => SdoState::BlockDownloadEnd,
        }
    }

    /// Returns whether no transfer is active and none is queued.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    /// Transfer in progress, if any.
    pub fn active(&self) -> Option<&TransferRequest> {
        self.active.as_ref()
    }

    /// Number of requests waiting behind the active one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// When the active transfer times out, if a timeout is armed.
    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.timeout_deadline
    }

    /// When the next block download segment is due, if pacing is armed.
    pub fn pacing_deadline(&self) -> Option<Instant> {
        self.pacing_deadline
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timeout_deadline, self.pacing_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Queues a read of `object_id`.
    ///
    /// The value is decoded as the type the record declares. A read of an
    /// entry that already has a read waiting in the queue is merged into it.
    /// When the engine is free the transfer starts immediately.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::UnknownNode` if `object_id` names another node and
    /// `SdoError::ObjectNotFound` if the dictionary has no such record.
    pub fn upload(
        &mut self,
        od: &mut NodeOd,
        transport: &mut dyn Transport,
        object_id: ObjectId,
    ) -> Result<()> {
        let object_id = self.resolve(od, object_id)?;
        if self.queue.iter().any(|r| r.is_upload_of(&object_id)) {
            debug!("{}: upload already queued", object_id);
            return Ok(());
        }
        self.queue.push_back(TransferRequest::upload(object_id));
        self.dispatch_next(transport);
        Ok(())
    }

    /// Queues a write of `value` to `object_id`.
    ///
    /// The value is encoded as the type the record declares, and on success
    /// the record holds it as a read would return it (a `U8` written to a
    /// `UNSIGNED32` entry is stored as `U32`). Writes are never merged: two
    /// writes to the same entry both run, in order.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::UnknownNode`, `SdoError::ObjectNotFound`,
    /// `SdoError::InvalidValue` if the value does not fit the declared type,
    /// or `SdoError::OutOfLimits` if it lies outside the record limits.
    pub fn download(
        &mut self,
        od: &mut NodeOd,
        transport: &mut dyn Transport,
        object_id: ObjectId,
        value: Value,
    ) -> Result<()> {
        let object_id = self.resolve(od, object_id)?;
        let within_limits = od
            .record(&object_id)
            .map_or(true, |record| record.is_within_limits(&value));
        if !within_limits {
            return Err(SdoError::OutOfLimits {
                index: object_id.index,
                sub_index: object_id.sub_index,
            });
        }
        let data = codec::encode(&value, object_id.data_type)?;
        // Store what a read of the entry would return
        let value = codec::decode(&data, object_id.data_type).unwrap_or(value);
        self.queue
            .push_back(TransferRequest::download(object_id, value, data));
        self.dispatch_next(transport);
        Ok(())
    }

    /// Feeds a frame received from the bus.
    ///
    /// Frames on another COB-ID, and any frame while no transfer is active,
    /// are ignored.
    pub fn process_frame(&mut self, od: &mut NodeOd, transport: &mut dyn Transport, frame: &CanFrame) {
        if frame.id != self.cob_id_rx() {
            trace!("node {}: ignoring frame on 0x{:03X}", self.node_id, frame.id);
            return;
        }
        let Some(mut request) = self.active.take() else {
            trace!("node {}: idle, ignoring [{}]", self.node_id, format_bytes(&frame.data));
            return;
        };
        trace!(
            "node {} rx 0x{:03X} [{}]",
            self.node_id,
            frame.id,
            format_bytes(&frame.data)
        );

        let step = if frame.data.len() != SDO_FRAME_SIZE {
            warn!(
                "node {}: {}-byte frame during {}",
                self.node_id,
                frame.data.len(),
                request.object_id
            );
            Step::Abort(AbortCode::GENERAL_ERROR)
        } else {
            self.advance(&mut request, transport, &frame.data)
        };
        self.conclude(od, transport, request, step);
    }

    /// Aborts the active transfer with [`AbortCode::TIMEOUT`].
    pub fn on_timeout(&mut self, od: &mut NodeOd, transport: &mut dyn Transport) {
        self.timeout_deadline = None;
        let Some(request) = self.active.take() else {
            return;
        };
        warn!("{}: {} timed out", request.object_id, request.direction);
        self.conclude(od, transport, request, Step::Abort(AbortCode::TIMEOUT));
    }

    /// Sends the next block download segment.
    ///
    /// Does nothing outside a block download sub-block. When the bus cannot
    /// take a frame the segment is not consumed and the tick is re-armed.
    pub fn on_pacing_tick(&mut self, transport: &mut dyn Transport) {
        self.pacing_deadline = None;
        let Some(mut request) = self.active.take() else {
            return;
        };
        let mut state = match std::mem::take(&mut request.phase) {
            Phase::BlockDownload(state) if state.initiated && !state.awaiting_ack => state,
            other => {
                request.phase = other;
                self.active = Some(request);
                return;
            }
        };

        if !transport.can_send() {
            trace!("node {}: bus busy, holding segment", self.node_id);
            request.phase = Phase::BlockDownload(state);
            self.active = Some(request);
            self.arm_pacing();
            return;
        }

        state.seqno += 1;
        let seqno = state.seqno;
        let (data, _, last) = request.next_chunk();
        state.awaiting_ack = last || seqno >= state.blksize;
        let awaiting_ack = state.awaiting_ack;
        request.phase = Phase::BlockDownload(state);
        self.active = Some(request);

        self.send(transport, ClientRequest::BlockDownloadSegment { seqno, data, last });
        if !awaiting_ack {
            self.arm_pacing();
        }
    }

    /// Fires every timer due at `now`.
    pub fn poll(&mut self, od: &mut NodeOd, transport: &mut dyn Transport, now: Instant) {
        if self.timeout_deadline.is_some_and(|deadline| deadline <= now) {
            self.on_timeout(od, transport);
        }
        if self.pacing_deadline.is_some_and(|deadline| deadline <= now) {
            self.on_pacing_tick(transport);
        }
    }

    fn resolve(&self, od: &NodeOd, object_id: ObjectId) -> Result<ObjectId> {
        if object_id.node_id != self.node_id || od.node_id() != self.node_id {
            return Err(SdoError::UnknownNode {
                node_id: object_id.node_id,
            });
        }
        let record = od
            .record(&object_id)
            .ok_or_else(|| SdoError::object_not_found(object_id.index, object_id.sub_index))?;
        Ok(object_id.with_data_type(record.data_type()))
    }

    fn dispatch_next(&mut self, transport: &mut dyn Transport) {
        if self.active.is_some() {
            return;
        }
        let Some(mut request) = self.queue.pop_front() else {
            return;
        };
        debug!(
            "{}: starting {} ({} queued)",
            request.object_id,
            request.direction,
            self.queue.len()
        );
        let initiate = self.initiate(&mut request);
        self.active = Some(request);
        self.send(transport, initiate);
    }

    /// Picks the transfer mode and returns the initiate request.
    fn initiate(&self, request: &mut TransferRequest) -> ClientRequest {
        let ObjectId {
            index, sub_index, ..
        } = request.object_id;
        let size = u32::try_from(request.size).unwrap_or(u32::MAX);

        match (request.direction, request.uses_block_transfer()) {
            (Direction::Upload, true) => {
                request.phase = Phase::BlockUpload(BlockUpload {
                    blksize: self.config.block_size,
                    ..BlockUpload::default()
                });
                ClientRequest::BlockUploadInitiate {
                    index,
                    sub_index,
                    blksize: self.config.block_size,
                    pst: 0,
                    crc: self.config.crc,
                }
            }
            (Direction::Upload, false) => {
                request.phase = Phase::Upload;
                ClientRequest::InitiateUpload { index, sub_index }
            }
            (Direction::Download, true) => {
                request.phase = Phase::BlockDownload(BlockDownload::default());
                ClientRequest::BlockDownloadInitiate {
                    index,
                    sub_index,
                    size,
                    crc: self.config.crc,
                }
            }
            (Direction::Download, false) if (1..=EXPEDITED_MAX).contains(&request.size) => {
                let mut data = [0u8; EXPEDITED_MAX];
                data[..request.size].copy_from_slice(&request.data);
                request.offset = request.size;
                request.phase = Phase::Download { expedited: true };
                ClientRequest::InitiateDownloadExpedited {
                    index,
                    sub_index,
                    data,
                    len: request.size as u8,
                }
            }
            (Direction::Download, false) => {
                request.phase = Phase::Download { expedited: false };
                ClientRequest::InitiateDownload {
                    index,
                    sub_index,
                    size,
                }
            }
        }
    }

    fn advance(&mut self, request: &mut TransferRequest, transport: &mut dyn Transport, data: &[u8]) -> Step {
        let phase = match std::mem::take(&mut request.phase) {
            Phase::BlockUpload(state) if state.started && !is_abort(data) => {
                return match BlockSegment::parse(data) {
                    Ok(segment) => self.on_block_segment(request, transport, state, segment),
                    Err(_) => Step::Abort(AbortCode::GENERAL_ERROR),
                };
            }
            other => other,
        };

        let response = match ServerResponse::parse(data) {
            Ok(response) => response,
            Err(e) => {
                warn!("{}: {}", request.object_id, e);
                request.phase = phase;
                return Step::Abort(AbortCode::CMD_NOT_VALID);
            }
        };
        if let ServerResponse::Abort { code, .. } = response {
            request.phase = phase;
            return Step::PeerAbort(code);
        }

        match (phase, response) {
            (
                Phase::Upload,
                ServerResponse::UploadInitiate {
                    index,
                    sub_index,
                    expedited,
                    size_indicated,
                    unused,
                    data,
                },
            ) => {
                if !same_mux(request, index, sub_index) {
                    return Step::Abort(AbortCode::CMD_NOT_VALID);
                }
                if expedited {
                    let len = if size_indicated {
                        EXPEDITED_MAX - usize::from(unused)
                    } else {
                        EXPEDITED_MAX
                    };
                    request.data = data[..len].to_vec();
                    request.size = len;
                    return finish_upload(request);
                }
                request.size = if size_indicated {
                    u32::from_le_bytes(data) as usize
                } else {
                    0
                };
                request.data.clear();
                request.phase = Phase::UploadSegment { toggle: false };
                self.send(transport, ClientRequest::UploadSegment { toggle: false });
                Step::Continue
            }

            (
                Phase::UploadSegment { toggle },
                ServerResponse::UploadSegment {
                    toggle: received,
                    len,
                    last,
                    data,
                },
            ) => {
                if received != toggle {
                    return Step::Abort(AbortCode::TOGGLE_BIT_NOT_ALTERNATED);
                }
                request.data.extend_from_slice(&data[..usize::from(len)]);
                if last {
                    if request.size != 0 && request.data.len() != request.size {
                        warn!(
                            "{}: received {} bytes, {} indicated",
                            request.object_id,
                            request.data.len(),
                            request.size
                        );
                        return Step::Abort(AbortCode::LENGTH_MISMATCH);
                    }
                    return finish_upload(request);
                }
                request.phase = Phase::UploadSegment { toggle: !toggle };
                self.send(transport, ClientRequest::UploadSegment { toggle: !toggle });
                Step::Continue
            }

            (Phase::Download { expedited }, ServerResponse::DownloadInitiate { index, sub_index }) => {
                if !same_mux(request, index, sub_index) {
                    return Step::Abort(AbortCode::CMD_NOT_VALID);
                }
                if expedited {
                    return Step::Complete(request.value.clone());
                }
                request.phase = Phase::DownloadSegment { toggle: false };
                self.send_download_segment(request, transport, false);
                Step::Continue
            }

            (Phase::DownloadSegment { toggle }, ServerResponse::DownloadSegment { toggle: received }) => {
                if received != toggle {
                    return Step::Abort(AbortCode::TOGGLE_BIT_NOT_ALTERNATED);
                }
                if request.offset >= request.size {
                    return Step::Complete(request.value.clone());
                }
                request.phase = Phase::DownloadSegment { toggle: !toggle };
                self.send_download_segment(request, transport, !toggle);
                Step::Continue
            }

            (
                Phase::BlockUpload(mut state),
                ServerResponse::BlockUploadInitiate {
                    index,
                    sub_index,
                    crc,
                    size,
                },
            ) if !state.started => {
                if !same_mux(request, index, sub_index) {
                    return Step::Abort(AbortCode::CMD_NOT_VALID);
                }
                state.started = true;
                state.crc = self.config.crc && crc;
                request.size = size.map_or(0, |size| size as usize);
                request.data.clear();
                request.phase = Phase::BlockUpload(state);
                self.send(transport, ClientRequest::BlockUploadStart);
                Step::Continue
            }

            (Phase::BlockUploadEnd { crc }, ServerResponse::BlockUploadEnd { unused, crc: expected }) => {
                let kept = request.data.len().saturating_sub(usize::from(unused));
                request.data.truncate(kept);
                if request.size != 0 && request.data.len() != request.size {
                    warn!(
                        "{}: block upload ended with {} bytes, {} indicated",
                        request.object_id,
                        request.data.len(),
                        request.size
                    );
                    return Step::Abort(AbortCode::INVALID_BLOCK_SIZE);
                }
                if crc && crc16(&request.data) != expected {
                    return Step::Abort(AbortCode::CRC_ERROR);
                }
                let step = finish_upload(request);
                if let Step::Complete(_) = step {
                    self.send(transport, ClientRequest::BlockUploadEnd);
                }
                step
            }

            (
                Phase::BlockDownload(mut state),
                ServerResponse::BlockDownloadInitiate {
                    index,
                    sub_index,
                    crc,
                    blksize,
                },
            ) if !state.initiated => {
                if !same_mux(request, index, sub_index) {
                    return Step::Abort(AbortCode::CMD_NOT_VALID);
                }
                if !valid_block_size(blksize) {
                    return Step::Abort(AbortCode::INVALID_BLOCK_SIZE);
                }
                state.initiated = true;
                state.blksize = blksize;
                state.crc = self.config.crc && crc;
                request.phase = Phase::BlockDownload(state);
                self.arm_pacing();
                Step::Continue
            }

            (Phase::BlockDownload(state), ServerResponse::BlockDownloadAck { ackseq, blksize })
                if state.awaiting_ack =>
            {
                self.on_block_ack(request, transport, state, ackseq, blksize)
            }

            (Phase::BlockDownloadEnd, ServerResponse::BlockDownloadEnd) => {
                Step::Complete(request.value.clone())
            }

            (phase, response) => {
                warn!(
                    "{}: unexpected {:?} in {:?}",
                    request.object_id, response, phase
                );
                request.phase = phase;
                Step::Abort(AbortCode::CMD_NOT_VALID)
            }
        }
    }

    fn on_block_segment(
        &mut self,
        request: &mut TransferRequest,
        transport: &mut dyn Transport,
        mut state: BlockUpload,
        segment: BlockSegment,
    ) -> Step {
        if state.error {
            // Block already broken, wait for its end
        } else if segment.seqno == state.seqno + 1 {
            state.seqno = segment.seqno;
            state.block.extend_from_slice(&segment.data);
            state.last_received = segment.last;
        } else {
            warn!(
                "{}: expected segment {}, got {}",
                request.object_id,
                state.seqno + 1,
                segment.seqno
            );
            state.error = true;
        }

        if !segment.last && segment.seqno < state.blksize {
            request.phase = Phase::BlockUpload(state);
            return Step::Continue;
        }

        let ackseq = if state.error {
            state.block.clear();
            state.error = false;
            state.last_received = false;
            0
        } else {
            request.data.append(&mut state.block);
            state.seqno
        };
        state.seqno = 0;
        state.blksize = if request.size == 0 {
            self.config.block_size
        } else {
            block_size_for(request.remaining(), self.config.block_size)
        };

        let blksize = state.blksize;
        request.phase = if state.last_received {
            Phase::BlockUploadEnd { crc: state.crc }
        } else {
            Phase::BlockUpload(state)
        };
        self.send(transport, ClientRequest::BlockUploadAck { ackseq, blksize });
        Step::Continue
    }

    fn on_block_ack(
        &mut self,
        request: &mut TransferRequest,
        transport: &mut dyn Transport,
        mut state: BlockDownload,
        ackseq: u8,
        blksize: u8,
    ) -> Step {
        if !valid_block_size(blksize) {
            return Step::Abort(AbortCode::INVALID_BLOCK_SIZE);
        }
        if ackseq > state.seqno {
            return Step::Abort(AbortCode::INVALID_SEQUENCE_NUMBER);
        }

        let complete = ackseq == state.seqno && request.offset >= request.size;
        if ackseq < state.seqno {
            state.attempts += 1;
            if state.attempts > MAX_BLOCK_RETRIES {
                warn!(
                    "{}: block not acknowledged after {} attempts",
                    request.object_id, MAX_BLOCK_RETRIES
                );
                return Step::Abort(AbortCode::INVALID_SEQUENCE_NUMBER);
            }
            debug!(
                "{}: server acknowledged {} of {} segments, resending",
                request.object_id, ackseq, state.seqno
            );
            request.offset =
                (state.block_start + usize::from(ackseq) * SEGMENT_SIZE).min(request.size);
        } else {
            state.attempts = 0;
        }

        state.block_start = request.offset;
        state.seqno = 0;
        state.blksize = blksize;
        state.awaiting_ack = false;

        if complete {
            let crc = if state.crc { crc16(&request.data) } else { 0 };
            request.phase = Phase::BlockDownloadEnd;
            self.send(
                transport,
                ClientRequest::BlockDownloadEnd {
                    unused: final_padding(request.size),
                    crc,
                },
            );
        } else {
            request.phase = Phase::BlockDownload(state);
            self.arm_pacing();
        }
        Step::Continue
    }

    fn send_download_segment(&mut self, request: &mut TransferRequest, transport: &mut dyn Transport, toggle: bool) {
        let (data, len, last) = request.next_chunk();
        self.send(
            transport,
            ClientRequest::DownloadSegment {
                toggle,
                data,
                len,
                last,
            },
        );
    }

    /// Applies the outcome of an event and moves the queue on when the
    /// active transfer ended.
    fn conclude(&mut self, od: &mut NodeOd, transport: &mut dyn Transport, request: TransferRequest, step: Step) {
        match step {
            Step::Continue => {
                self.active = Some(request);
                return;
            }
            Step::Complete(value) => {
                self.clear_timers();
                debug!("{}: {} complete", request.object_id, request.direction);
                od.commit_value(&request.object_id, value, request.direction);
            }
            Step::Abort(code) => {
                warn!(
                    "{}: {} aborted with {}",
                    request.object_id, request.direction, code
                );
                self.send(
                    transport,
                    ClientRequest::Abort {
                        index: request.object_id.index,
                        sub_index: request.object_id.sub_index,
                        code,
                    },
                );
                self.clear_timers();
                od.commit_error(&request.object_id, code, request.direction);
            }
            Step::PeerAbort(code) => {
                warn!(
                    "{}: {} aborted by server with {}",
                    request.object_id, request.direction, code
                );
                self.clear_timers();
                od.commit_error(&request.object_id, code, request.direction);
            }
        }
        self.dispatch_next(transport);
    }

    /// Sends one request, re-arming the timeout first.
    ///
    /// A refused frame is logged and left to the timeout.
    fn send(&mut self, transport: &mut dyn Transport, request: ClientRequest) {
        self.timeout_deadline = Some(Instant::now() + self.config.timeout);
        let frame = CanFrame::new(self.cob_id_tx(), request.to_bytes());
        if !transport.can_send() {
            warn!("node {}: bus not ready, {:?} not sent", self.node_id, request);
            return;
        }
        match transport.send(&frame) {
            Ok(()) => trace!(
                "node {} tx 0x{:03X} [{}]",
                self.node_id,
                frame.id,
                format_bytes(&frame.data)
            ),
            Err(e) => warn!("node {}: {}", self.node_id, e),
        }
    }

    fn arm_pacing(&mut self) {
        self.pacing_deadline = Some(Instant::now() + self.config.pacing_interval);
    }

    fn clear_timers(&mut self) {
        self.timeout_deadline = None;
        self.pacing_deadline = None;
    }
}

impl std::fmt::Debug for Sdo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdo")
            .field("node_id", &self.node_id)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

fn same_mux(request: &TransferRequest, index: u16, sub_index: u8) -> bool {
    let matches = request.object_id.index == index && request.object_id.sub_index == sub_index;
    if !matches {
        warn!(
            "{}: response addresses {}",
            request.object_id,
            format_object(index, sub_index)
        );
    }
    matches
}

/// Decodes a finished upload, aborting when a fixed-width entry came back
/// short.
fn finish_upload(request: &TransferRequest) -> Step {
    let data_type = request.object_id.data_type;
    if let Some(width) = data_type.byte_length() {
        if request.data.len() < width {
            warn!(
                "{}: received {} bytes, {} needs {}",
                request.object_id,
                request.data.len(),
                data_type,
                width
            );
            return Step::Abort(AbortCode::LENGTH_MISMATCH);
        }
    }
    Step::Complete(codec::decode(&request.data, data_type))
}

fn valid_block_size(blksize: u8) -> bool {
    (1..=BLOCK_MAX).contains(&blksize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::od::{NodeIndex, Notification, ObjectType, RequestFlags};
    use crate::subindex::{AccessType, NodeSubIndex};
    use crate::transport::MemoryTransport;
    use std::sync::mpsc::Receiver;

    const NODE: u8 = 5;

    struct Fixture {
        sdo: Sdo,
        od: NodeOd,
        tx: MemoryTransport,
        events: Receiver<Notification>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(SdoConfig::default())
        }

        fn with_config(config: SdoConfig) -> Self {
            let rw = AccessType::READ | AccessType::WRITE;
            let mut od = NodeOd::new(0, NODE);
            od.insert_index(NodeIndex::new(0x1017, "Heartbeat", ObjectType::Var).with_sub_index(
                NodeSubIndex::new(0, "Heartbeat", DataType::Unsigned16, rw),
            ));
            od.insert_index(NodeIndex::new(0x1008, "Device name", ObjectType::Var).with_sub_index(
                NodeSubIndex::new(0, "Device name", DataType::VisibleString, AccessType::READ)
                    .with_default_value(Value::from("none")),
            ));
            od.insert_index(NodeIndex::new(0x2000, "Tuning", ObjectType::Record).with_sub_index(
                NodeSubIndex::new(1, "Gain", DataType::Integer32, rw)
                    .with_limits(Some(Value::I32(-1000)), Some(Value::I32(1000))),
            ));
            od.insert_index(NodeIndex::new(0x2001, "Blob", ObjectType::Var).with_sub_index(
                NodeSubIndex::new(0, "Blob", DataType::OctetString, rw),
            ));
            od.insert_index(NodeIndex::new(0x1F50, "Program", ObjectType::Array).with_sub_index(
                NodeSubIndex::new(1, "Program 1", DataType::Domain, rw),
            ));
            let events = od.subscribe();
            Self {
                sdo: Sdo::new(NODE, config),
                od,
                tx: MemoryTransport::new(),
                events,
            }
        }

        fn id(&self, index: u16, sub_index: u8) -> ObjectId {
            self.od.object_id(index, sub_index).unwrap()
        }

        fn upload(&mut self, index: u16, sub_index: u8) {
            let id = self.id(index, sub_index);
            self.sdo.upload(&mut self.od, &mut self.tx, id).unwrap();
        }

        fn download(&mut self, index: u16, sub_index: u8, value: Value) {
            let id = self.id(index, sub_index);
            self.sdo.download(&mut self.od, &mut self.tx, id, value).unwrap();
        }

        fn reply(&mut self, hex_frame: &str) {
            self.reply_bytes(&hex::decode(hex_frame).unwrap());
        }

        fn reply_bytes(&mut self, data: &[u8]) {
            let frame = CanFrame::new(0x580 + u32::from(NODE), data.to_vec());
            self.sdo.process_frame(&mut self.od, &mut self.tx, &frame);
        }

        fn tick(&mut self) {
            self.sdo.on_pacing_tick(&mut self.tx);
        }

        fn last_sent(&self) -> String {
            hex::encode_upper(&self.tx.last().unwrap().data)
        }

        fn sent_count(&self) -> usize {
            self.tx.sent().len()
        }

        fn notification(&self) -> Notification {
            self.events.try_recv().unwrap()
        }

        /// Serves a segmented upload of `payload`, returns the number of
        /// segments exchanged.
        fn serve_segmented_upload(&mut self, index: u16, sub_index: u8, payload: &[u8]) -> usize {
            let mut init = vec![0x41];
            init.extend_from_slice(&index.to_le_bytes());
            init.push(sub_index);
            init.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            self.reply_bytes(&init);

            let chunks: Vec<&[u8]> = payload.chunks(7).collect();
            for (i, chunk) in chunks.iter().enumerate() {
                let toggle = (i % 2) as u8;
                assert_eq!(self.tx.last().unwrap().data[0], 0x60 | (toggle << 4));
                let last = u8::from(i + 1 == chunks.len());
                let mut segment = vec![(toggle << 4) | (((7 - chunk.len()) as u8) << 1) | last];
                segment.extend_from_slice(chunk);
                segment.resize(8, 0);
                self.reply_bytes(&segment);
            }
            chunks.len()
        }

        /// Answers every block download sub-block with a full ack.
        fn serve_block_download(&mut self, blksize: u8) -> Vec<u8> {
            let mut received = Vec::new();
            while self.sdo.state() == SdoState::BlockDownload {
                if self.sdo.pacing_deadline().is_some() {
                    self.tick();
                    let data = self.tx.last().unwrap().data.clone();
                    received.extend_from_slice(&data[1..]);
                } else {
                    let seqno = self.tx.last().unwrap().data[0] & 0x7F;
                    self.reply_bytes(&[0xA2, seqno, blksize, 0, 0, 0, 0, 0]);
                }
            }
            received
        }
    }

    fn block_segment(seqno: u8, last: bool, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![seqno | if last { 0x80 } else { 0 }];
        frame.extend_from_slice(data);
        frame.resize(8, 0);
        frame
    }

    #[test]
    fn test_config_defaults() {
        let config = SdoConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert_eq!(config.pacing_interval, Duration::from_millis(1));
        assert_eq!(config.block_size, 127);
        assert!(!config.crc);
        assert_eq!(config.cob_id_client_to_server, 0x600);
        assert_eq!(config.cob_id_server_to_client, 0x580);

        let sdo = Sdo::new(0x22, SdoConfig::new().with_cob_ids(0x640, 0x5C0));
        assert_eq!(sdo.cob_id_tx(), 0x662);
        assert_eq!(sdo.cob_id_rx(), 0x5E2);
    }

    #[test]
    fn test_expedited_upload() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        assert_eq!(f.sdo.state(), SdoState::Upload);
        assert_eq!(f.tx.last().unwrap().id, 0x605);
        assert_eq!(f.last_sent(), "4017100000000000");
        assert!(f.sdo.timeout_deadline().is_some());

        f.reply("4B171000E8030000");

        let id = f.id(0x1017, 0);
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&id), Some(&Value::U16(1000)));
        assert_eq!(f.od.error(&id), Some(AbortCode(0)));
        assert!(f.sdo.timeout_deadline().is_none());
        assert_eq!(
            f.notification(),
            Notification {
                object_id: id,
                flags: RequestFlags::READ
            }
        );
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_expedited_upload_without_size() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.reply("4217100034120000");
        assert_eq!(f.od.value(&f.id(0x1017, 0)), Some(&Value::U16(0x1234)));
    }

    #[test]
    fn test_segmented_upload() {
        let mut f = Fixture::new();
        f.upload(0x1008, 0);
        f.reply("410810000A000000");
        assert_eq!(f.sdo.state(), SdoState::UploadSegment);
        assert_eq!(f.last_sent(), "6000000000000000");

        f.reply("0041424344454647");
        assert_eq!(f.last_sent(), "7000000000000000");

        f.reply("1948494A00000000");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&f.id(0x1008, 0)), Some(&Value::from("ABCDEFGHIJ")));
        // initiate plus two segment requests
        assert_eq!(f.sent_count(), 3);
    }

    #[test]
    fn test_segmented_upload_segment_count() {
        for n in [5usize, 13, 20, 100] {
            let mut f = Fixture::new();
            let payload: Vec<u8> = (0..n).map(|i| b'a' + (i % 26) as u8).collect();
            f.upload(0x1008, 0);
            let segments = f.serve_segmented_upload(0x1008, 0, &payload);

            assert_eq!(segments, n.div_ceil(7));
            assert_eq!(f.sent_count(), 1 + segments);
            let expected = String::from_utf8(payload).unwrap();
            assert_eq!(f.od.value(&f.id(0x1008, 0)), Some(&Value::String(expected)));
            assert_eq!(f.sdo.state(), SdoState::Free);
        }
    }

    #[test]
    fn test_upload_toggle_not_alternated() {
        let mut f = Fixture::new();
        f.upload(0x1008, 0);
        f.reply("410810000A000000");
        f.reply("0041424344454647");
        // Repeats toggle 0 instead of 1
        f.reply("0948494A00000000");

        let id = f.id(0x1008, 0);
        assert_eq!(f.last_sent(), "8008100000000305");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&id), Some(&Value::from("none")));
        assert_eq!(f.od.error(&id), Some(AbortCode::TOGGLE_BIT_NOT_ALTERNATED));
        assert_eq!(f.notification().flags, RequestFlags::READ | RequestFlags::ERROR);
    }

    #[test]
    fn test_segmented_upload_length_mismatch() {
        let mut f = Fixture::new();
        f.upload(0x1008, 0);
        f.reply("410810000A000000");
        f.reply("0141424344454647");
        assert_eq!(f.od.error(&f.id(0x1008, 0)), Some(AbortCode::LENGTH_MISMATCH));
        assert_eq!(f.last_sent(), "8008100010000706");
    }

    #[test]
    fn test_short_expedited_upload_keeps_value() {
        let mut f = Fixture::new();
        let id = f.id(0x1017, 0);
        f.od.set_value(&id, Value::U16(500)).unwrap();

        f.upload(0x1017, 0);
        // Size indicated, a single byte for a UNSIGNED16 entry
        f.reply("4F1710002A000000");

        assert_eq!(f.last_sent(), "8017100010000706");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&id), Some(&Value::U16(500)));
        assert_eq!(f.od.error(&id), Some(AbortCode::LENGTH_MISMATCH));
        assert_eq!(f.notification().flags, RequestFlags::READ | RequestFlags::ERROR);
    }

    #[test]
    fn test_upload_of_non_utf8_string() {
        let mut f = Fixture::new();
        f.upload(0x1008, 0);
        f.reply("4B081000B0430000");
        assert_eq!(
            f.od.value(&f.id(0x1008, 0)),
            Some(&Value::Bytes(vec![0xB0, 0x43]))
        );
        assert_eq!(f.notification().flags, RequestFlags::READ);
    }

    #[test]
    fn test_download_stores_declared_variant() {
        let mut f = Fixture::new();
        f.download(0x2000, 1, Value::I16(-5));
        assert_eq!(f.last_sent(), "23002001FBFFFFFF");
        f.reply("6000200100000000");

        let id = f.id(0x2000, 1);
        assert_eq!(f.od.value(&id), Some(&Value::I32(-5)));

        f.upload(0x2000, 1);
        f.reply("43002001FBFFFFFF");
        assert_eq!(f.od.value(&id), Some(&Value::I32(-5)));
    }

    #[test]
    fn test_expedited_download() {
        let mut f = Fixture::new();
        f.download(0x1017, 0, Value::U16(1000));
        assert_eq!(f.sdo.state(), SdoState::Download);
        assert_eq!(f.last_sent(), "2B171000E8030000");

        f.reply("6017100000000000");

        let id = f.id(0x1017, 0);
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&id), Some(&Value::U16(1000)));
        assert_eq!(f.notification().flags, RequestFlags::WRITE);
    }

    #[test]
    fn test_expedited_download_full_width() {
        let mut f = Fixture::new();
        f.download(0x2000, 1, Value::I32(-2));
        assert_eq!(f.last_sent(), "23002001FEFFFFFF");
    }

    #[test]
    fn test_segmented_download() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (0..10).collect();
        f.download(0x2001, 0, Value::Bytes(payload.clone()));
        assert_eq!(f.last_sent(), "210120000A000000");

        f.reply("6001200000000000");
        assert_eq!(f.sdo.state(), SdoState::DownloadSegment);
        assert_eq!(f.last_sent(), "0000010203040506");

        f.reply("2000000000000000");
        assert_eq!(f.last_sent(), "1907080900000000");

        f.reply("3000000000000000");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.sent_count(), 3);
        assert_eq!(f.od.value(&f.id(0x2001, 0)), Some(&Value::Bytes(payload)));
        assert_eq!(f.notification().flags, RequestFlags::WRITE);
    }

    #[test]
    fn test_empty_segmented_download() {
        let mut f = Fixture::new();
        f.download(0x2001, 0, Value::Bytes(vec![]));
        assert_eq!(f.last_sent(), "2101200000000000");
        f.reply("6001200000000000");
        // No data, n = 7, c = 1
        assert_eq!(f.last_sent(), "0F00000000000000");
        f.reply("2000000000000000");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.notification().flags, RequestFlags::WRITE);
    }

    #[test]
    fn test_download_toggle_not_alternated() {
        let mut f = Fixture::new();
        f.download(0x2001, 0, Value::Bytes((0..10).collect()));
        f.reply("6001200000000000");
        f.reply("3000000000000000");

        let id = f.id(0x2001, 0);
        assert_eq!(f.od.error(&id), Some(AbortCode::TOGGLE_BIT_NOT_ALTERNATED));
        assert_eq!(f.od.value(&id), None);
        assert_eq!(f.notification().flags, RequestFlags::WRITE | RequestFlags::ERROR);
    }

    #[test]
    fn test_download_rejects_bad_requests() {
        let mut f = Fixture::new();
        let gain = f.id(0x2000, 1);

        let missing = ObjectId::new(0, NODE, 0x3000, 0, DataType::Unsigned8);
        assert!(matches!(
            f.sdo.download(&mut f.od, &mut f.tx, missing, Value::U8(1)),
            Err(SdoError::ObjectNotFound { index: 0x3000, .. })
        ));
        assert!(matches!(
            f.sdo.download(&mut f.od, &mut f.tx, gain, Value::from("x")),
            Err(SdoError::InvalidValue { .. })
        ));
        assert!(matches!(
            f.sdo.download(&mut f.od, &mut f.tx, gain, Value::I32(5000)),
            Err(SdoError::OutOfLimits { index: 0x2000, sub_index: 1 })
        ));
        let other_node = ObjectId { node_id: 9, ..gain };
        assert!(matches!(
            f.sdo.upload(&mut f.od, &mut f.tx, other_node),
            Err(SdoError::UnknownNode { node_id: 9 })
        ));

        assert!(f.sdo.is_idle());
        assert_eq!(f.sent_count(), 0);
    }

    #[test]
    fn test_declared_type_comes_from_record() {
        let mut f = Fixture::new();
        let loose = ObjectId::new(0, NODE, 0x1017, 0, DataType::None);
        f.sdo.upload(&mut f.od, &mut f.tx, loose).unwrap();
        assert_eq!(f.sdo.active().unwrap().object_id().data_type, DataType::Unsigned16);
    }

    #[test]
    fn test_upload_coalescing() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.upload(0x1008, 0);
        f.upload(0x1008, 0);
        assert_eq!(f.sdo.queue_len(), 1);

        // The active upload is not part of the queue
        f.upload(0x1017, 0);
        assert_eq!(f.sdo.queue_len(), 2);
    }

    #[test]
    fn test_downloads_are_not_coalesced() {
        let mut f = Fixture::new();
        f.upload(0x1008, 0);
        f.download(0x1017, 0, Value::U16(1));
        f.download(0x1017, 0, Value::U16(2));
        assert_eq!(f.sdo.queue_len(), 2);

        f.reply("4F08100058000000");
        assert_eq!(f.last_sent(), "2B17100001000000");
        f.reply("6017100000000000");
        assert_eq!(f.last_sent(), "2B17100002000000");
        f.reply("6017100000000000");

        assert!(f.sdo.is_idle());
        assert_eq!(f.od.value(&f.id(0x1017, 0)), Some(&Value::U16(2)));
    }

    #[test]
    fn test_timeout_dispatches_next() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.upload(0x1008, 0);

        f.sdo.on_timeout(&mut f.od, &mut f.tx);

        let sent = f.tx.sent();
        assert_eq!(hex::encode_upper(&sent[1].data), "8017100000000405");
        assert_eq!(hex::encode_upper(&sent[2].data), "4008100000000000");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::TIMEOUT));
        assert_eq!(f.sdo.state(), SdoState::Upload);
        assert_eq!(f.sdo.active().unwrap().object_id().index, 0x1008);
        assert!(f.sdo.timeout_deadline().is_some());
    }

    #[test]
    fn test_timeout_when_idle_is_noop() {
        let mut f = Fixture::new();
        f.sdo.on_timeout(&mut f.od, &mut f.tx);
        assert_eq!(f.sent_count(), 0);
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_poll_fires_due_timeout() {
        let mut f = Fixture::with_config(SdoConfig::new().with_timeout(Duration::from_secs(10)));
        f.upload(0x1017, 0);

        let now = Instant::now();
        f.sdo.poll(&mut f.od, &mut f.tx, now);
        assert_eq!(f.sdo.state(), SdoState::Upload);

        f.sdo.poll(&mut f.od, &mut f.tx, now + Duration::from_secs(20));
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::TIMEOUT));
    }

    #[test]
    fn test_peer_abort() {
        let mut f = Fixture::new();
        f.download(0x1017, 0, Value::U16(7));
        f.reply("8017100002000106");

        let id = f.id(0x1017, 0);
        assert_eq!(f.od.error(&id), Some(AbortCode::READ_ONLY));
        assert_eq!(f.od.value(&id), None);
        // No abort is echoed back
        assert_eq!(f.sent_count(), 1);
        assert_eq!(f.notification().flags, RequestFlags::WRITE | RequestFlags::ERROR);
    }

    #[test]
    fn test_success_clears_previous_error() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.reply("8017100000000206");
        f.upload(0x1017, 0);
        f.reply("4B17100001000000");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode(0)));
    }

    #[test]
    fn test_frames_while_idle_are_ignored() {
        let mut f = Fixture::new();
        f.reply("4B171000E8030000");
        f.reply_bytes(&[0x01]);
        assert_eq!(f.sent_count(), 0);
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.od.value(&f.id(0x1017, 0)), None);
    }

    #[test]
    fn test_other_cob_id_is_ignored() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        let frame = CanFrame::new(0x586, hex::decode("4B171000E8030000").unwrap());
        f.sdo.process_frame(&mut f.od, &mut f.tx, &frame);
        assert_eq!(f.sdo.state(), SdoState::Upload);
    }

    #[test]
    fn test_short_frame_aborts() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.reply_bytes(&[0x4B, 0x17, 0x10]);
        assert_eq!(f.last_sent(), "8017100000000008");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::GENERAL_ERROR));
    }

    #[test]
    fn test_address_mismatch_aborts() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.reply("4B181000E8030000");
        assert_eq!(f.last_sent(), "8017100001000405");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::CMD_NOT_VALID));
    }

    #[test]
    fn test_unexpected_response_aborts() {
        let mut f = Fixture::new();
        f.upload(0x1017, 0);
        f.reply("6017100000000000");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::CMD_NOT_VALID));

        f.upload(0x1017, 0);
        f.reply("E000000000000000");
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::CMD_NOT_VALID));
    }

    #[test]
    fn test_bus_not_ready_leaves_request_to_timeout() {
        let mut f = Fixture::new();
        f.tx.set_ready(false);
        f.upload(0x1017, 0);
        assert_eq!(f.sent_count(), 0);
        assert_eq!(f.sdo.state(), SdoState::Upload);
        assert!(f.sdo.timeout_deadline().is_some());

        f.sdo.on_timeout(&mut f.od, &mut f.tx);
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.error(&f.id(0x1017, 0)), Some(AbortCode::TIMEOUT));
    }

    #[test]
    fn test_block_upload() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (1..=20).collect();
        f.upload(0x1F50, 1);
        assert_eq!(f.sdo.state(), SdoState::BlockUpload);
        assert_eq!(f.last_sent(), "A0501F017F000000");

        f.reply("C2501F0114000000");
        assert_eq!(f.last_sent(), "A300000000000000");
        assert_eq!(f.sdo.active().unwrap().size(), 20);

        f.reply_bytes(&block_segment(1, false, &payload[0..7]));
        f.reply_bytes(&block_segment(2, false, &payload[7..14]));
        assert_eq!(f.sent_count(), 2);
        f.reply_bytes(&block_segment(3, true, &payload[14..20]));
        assert_eq!(f.last_sent(), "A203010000000000");
        assert_eq!(f.sdo.state(), SdoState::BlockUploadEnd);

        f.reply("C500000000000000");
        assert_eq!(f.last_sent(), "A100000000000000");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(payload)));
        assert_eq!(f.notification().flags, RequestFlags::READ);
    }

    #[test]
    fn test_block_upload_exact_multiple_has_no_padding() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (0..14).collect();
        f.upload(0x1F50, 1);
        f.reply("C2501F010E000000");
        f.reply_bytes(&block_segment(1, false, &payload[..7]));
        f.reply_bytes(&block_segment(2, true, &payload[7..]));
        f.reply("C100000000000000");

        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(payload)));
    }

    #[test]
    fn test_block_upload_multiple_blocks() {
        let mut f = Fixture::with_config(SdoConfig::new().with_block_size(2));
        let payload: Vec<u8> = (100..120).collect();
        f.upload(0x1F50, 1);
        assert_eq!(f.last_sent(), "A0501F0102000000");
        f.reply("C2501F0114000000");

        f.reply_bytes(&block_segment(1, false, &payload[0..7]));
        f.reply_bytes(&block_segment(2, false, &payload[7..14]));
        // 6 bytes left: one segment
        assert_eq!(f.last_sent(), "A202010000000000");
        assert_eq!(f.sdo.active().unwrap().remaining(), 6);

        f.reply_bytes(&block_segment(1, true, &payload[14..20]));
        assert_eq!(f.last_sent(), "A201010000000000");
        f.reply("C500000000000000");

        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(payload)));
    }

    #[test]
    fn test_block_upload_sequence_gap_resends_block() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (1..=20).collect();
        f.upload(0x1F50, 1);
        f.reply("C2501F0114000000");

        f.reply_bytes(&block_segment(1, false, &payload[0..7]));
        // Segment 2 lost
        f.reply_bytes(&block_segment(3, true, &payload[14..20]));
        assert_eq!(f.last_sent(), "A200030000000000");
        assert_eq!(f.sdo.state(), SdoState::BlockUpload);
        assert_eq!(f.sdo.active().unwrap().remaining(), 20);

        f.reply_bytes(&block_segment(1, false, &payload[0..7]));
        f.reply_bytes(&block_segment(2, false, &payload[7..14]));
        f.reply_bytes(&block_segment(3, true, &payload[14..20]));
        assert_eq!(f.last_sent(), "A203010000000000");
        f.reply("C500000000000000");

        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(payload)));
        assert_eq!(f.notification().flags, RequestFlags::READ);
    }

    #[test]
    fn test_block_upload_size_mismatch() {
        let mut f = Fixture::new();
        f.upload(0x1F50, 1);
        f.reply("C2501F0114000000");
        f.reply_bytes(&block_segment(1, false, &[0; 7]));
        f.reply_bytes(&block_segment(2, false, &[0; 7]));
        f.reply_bytes(&block_segment(3, true, &[0; 7]));
        // Claims no padding: 21 bytes for a 20-byte object
        f.reply("C100000000000000");

        assert_eq!(f.last_sent(), "80501F0102000405");
        assert_eq!(f.od.error(&f.id(0x1F50, 1)), Some(AbortCode::INVALID_BLOCK_SIZE));
    }

    #[test]
    fn test_block_upload_crc() {
        let payload: Vec<u8> = b"block with crc".to_vec();
        let crc = crc16(&payload);

        for (sent_crc, ok) in [(crc, true), (crc ^ 0xFFFF, false)] {
            let mut f = Fixture::with_config(SdoConfig::new().with_crc(true));
            f.upload(0x1F50, 1);
            assert_eq!(f.last_sent(), "A4501F017F000000");
            f.reply("C6501F010E000000");
            f.reply_bytes(&block_segment(1, false, &payload[..7]));
            f.reply_bytes(&block_segment(2, true, &payload[7..]));
            f.reply_bytes(&[0xC1, sent_crc as u8, (sent_crc >> 8) as u8, 0, 0, 0, 0, 0]);

            let id = f.id(0x1F50, 1);
            if ok {
                assert_eq!(f.od.value(&id), Some(&Value::Bytes(payload.clone())));
            } else {
                assert_eq!(f.od.error(&id), Some(AbortCode::CRC_ERROR));
                assert_eq!(f.od.value(&id), None);
            }
        }
    }

    #[test]
    fn test_block_upload_peer_abort_during_stream() {
        let mut f = Fixture::new();
        f.upload(0x1F50, 1);
        f.reply("C2501F0114000000");
        f.reply_bytes(&block_segment(1, false, &[0; 7]));
        f.reply("80501F0100000008");
        assert_eq!(f.od.error(&f.id(0x1F50, 1)), Some(AbortCode::GENERAL_ERROR));
        assert_eq!(f.sdo.state(), SdoState::Free);
    }

    #[test]
    fn test_domain_download_small_uses_block() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![1, 2, 3]));
        assert_eq!(f.sdo.state(), SdoState::BlockDownload);
        assert_eq!(f.last_sent(), "C2501F0103000000");
        assert!(f.sdo.pacing_deadline().is_none());

        f.reply("A0501F0110000000");
        assert!(f.sdo.pacing_deadline().is_some());
        assert_eq!(f.sent_count(), 1);

        f.tick();
        assert_eq!(f.last_sent(), "8101020300000000");
        assert!(f.sdo.pacing_deadline().is_none());
        f.tick();
        assert_eq!(f.sent_count(), 2);

        f.reply("A201100000000000");
        assert_eq!(f.sdo.state(), SdoState::BlockDownloadEnd);
        // 4 padding bytes
        assert_eq!(f.last_sent(), "D100000000000000");

        f.reply("A100000000000000");
        assert_eq!(f.sdo.state(), SdoState::Free);
        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(f.notification().flags, RequestFlags::WRITE);
    }

    #[test]
    fn test_domain_download_empty() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![]));
        assert_eq!(f.last_sent(), "C2501F0100000000");
        f.reply("A0501F017F000000");
        f.tick();
        assert_eq!(f.last_sent(), "8100000000000000");
        f.reply("A2017F0000000000");
        assert_eq!(f.last_sent(), "DD00000000000000");
        f.reply("A100000000000000");
        assert_eq!(f.notification().flags, RequestFlags::WRITE);
    }

    #[test]
    fn test_domain_download_large() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        f.download(0x1F50, 1, Value::Bytes(payload.clone()));
        assert_eq!(f.last_sent(), "C2501F0110270000");
        f.reply("A0501F017F000000");

        let received = f.serve_block_download(127);

        assert_eq!(received.len(), 10_000usize.div_ceil(7) * 7);
        assert_eq!(&received[..10_000], &payload[..]);
        // 10000 = 1428 * 7 + 4: three padding bytes
        assert_eq!(f.last_sent(), "CD00000000000000");
        // Initiate, 1429 segments and the end request; the client never acks
        assert_eq!(f.sent_count(), 1 + 1429 + 1);

        f.reply("A100000000000000");
        assert_eq!(f.od.value(&f.id(0x1F50, 1)), Some(&Value::Bytes(payload)));
    }

    #[test]
    fn test_block_download_partial_ack_rewinds() {
        let mut f = Fixture::new();
        let payload: Vec<u8> = (1..=20).collect();
        f.download(0x1F50, 1, Value::Bytes(payload.clone()));
        f.reply("A0501F017F000000");
        f.tick();
        f.tick();
        f.tick();
        assert_eq!(f.last_sent(), hex::encode_upper(block_segment(3, true, &payload[14..])));

        // Only the first segment arrived
        f.reply("A2017F0000000000");
        assert_eq!(f.sdo.active().unwrap().remaining(), 13);
        f.tick();
        assert_eq!(f.last_sent(), hex::encode_upper(block_segment(1, false, &payload[7..14])));
        f.tick();
        assert_eq!(f.last_sent(), hex::encode_upper(block_segment(2, true, &payload[14..])));

        f.reply("A2027F0000000000");
        assert_eq!(f.sdo.state(), SdoState::BlockDownloadEnd);
        assert_eq!(f.last_sent(), "C500000000000000");
    }

    #[test]
    fn test_block_download_gives_up_after_retries() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![0xAA; 10]));
        f.reply("A0501F017F000000");

        for _ in 0..MAX_BLOCK_RETRIES {
            f.tick();
            f.tick();
            f.reply("A2007F0000000000");
            assert_eq!(f.sdo.state(), SdoState::BlockDownload);
        }
        f.tick();
        f.tick();
        f.reply("A2007F0000000000");

        assert_eq!(f.last_sent(), "80501F0103000405");
        assert_eq!(
            f.od.error(&f.id(0x1F50, 1)),
            Some(AbortCode::INVALID_SEQUENCE_NUMBER)
        );
    }

    #[test]
    fn test_block_download_invalid_block_size() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![1]));
        f.reply("A0501F0100000000");
        assert_eq!(f.last_sent(), "80501F0102000405");
        assert_eq!(f.od.error(&f.id(0x1F50, 1)), Some(AbortCode::INVALID_BLOCK_SIZE));
    }

    #[test]
    fn test_block_download_follows_server_block_size() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![7; 30]));
        f.reply("A0501F0102000000");
        f.tick();
        f.tick();
        // Sub-block of 2 segments complete, waiting for the ack
        assert!(f.sdo.pacing_deadline().is_none());
        f.tick();
        assert_eq!(f.sent_count(), 3);

        f.reply("A202030000000000");
        f.tick();
        f.tick();
        f.tick();
        assert_eq!(f.last_sent(), hex::encode_upper(block_segment(3, true, &[7; 2])));
    }

    #[test]
    fn test_block_download_crc() {
        let payload: Vec<u8> = b"block with crc".to_vec();
        let crc = crc16(&payload);
        let mut f = Fixture::with_config(SdoConfig::new().with_crc(true));
        f.download(0x1F50, 1, Value::Bytes(payload));
        assert_eq!(f.last_sent(), "C6501F010E000000");
        f.reply("A4501F017F000000");
        f.serve_block_download(127);
        let end = &f.tx.last().unwrap().data;
        assert_eq!(end[0], 0xC1);
        assert_eq!(u16::from_le_bytes([end[1], end[2]]), crc);
    }

    #[test]
    fn test_pacing_waits_for_bus() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![1, 2]));
        f.reply("A0501F017F000000");

        f.tx.set_ready(false);
        f.tick();
        assert_eq!(f.sent_count(), 1);
        assert!(f.sdo.pacing_deadline().is_some());

        f.tx.set_ready(true);
        f.tick();
        assert_eq!(f.last_sent(), "8101020000000000");
    }

    #[test]
    fn test_poll_drives_pacing() {
        let mut f = Fixture::new();
        f.download(0x1F50, 1, Value::Bytes(vec![9; 8]));
        f.reply("A0501F017F000000");

        let later = Instant::now() + Duration::from_millis(500);
        f.sdo.poll(&mut f.od, &mut f.tx, later);
        assert_eq!(f.last_sent(), "0109090909090909");
        f.sdo.poll(&mut f.od, &mut f.tx, later + Duration::from_millis(200));
        assert_eq!(f.last_sent(), "8209000000000000");
        assert_eq!(f.sdo.next_deadline(), f.sdo.timeout_deadline());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SdoState::Free.to_string(), "FREE");
        assert_eq!(SdoState::BlockDownloadEnd.to_string(), "BLOCK_DOWNLOAD_END");
    }
}
