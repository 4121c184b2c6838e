//! Transfer requests and their protocol phase.
//!
//! A [`TransferRequest`] is one upload or one download queued on a node's
//! engine. While it waits in the queue its phase is [`Phase::Queued`]; once
//! dispatched the phase carries the state of the running exchange (toggle
//! bit, block sequence numbers, block buffer) so that nothing about an
//! exchange lives outside the request itself.

use crate::data_type::DataType;
use crate::frame::{BLOCK_MAX, SEGMENT_SIZE};
use crate::object_id::ObjectId;
use crate::value::Value;

/// Direction of a transfer, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read from the remote node.
    Upload,
    /// Write to the remote node.
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Progress of a block upload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct BlockUpload {
    /// Initiate response received and start sent.
    pub started: bool,
    /// Segments expected in the current block.
    pub blksize: u8,
    /// Last sequence number received in order.
    pub seqno: u8,
    /// Segments of the current block, committed on a good ack.
    pub block: Vec<u8>,
    /// A sequence gap was seen in the current block.
    pub error: bool,
    /// The segment flagged last was received in order.
    pub last_received: bool,
    /// CRC negotiated with the server.
    pub crc: bool,
}

/// Progress of a block download.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct BlockDownload {
    /// Initiate response received.
    pub initiated: bool,
    /// Segments per block, as granted by the server.
    pub blksize: u8,
    /// Last sequence number sent in the current block.
    pub seqno: u8,
    /// Offset of the first byte of the current block.
    pub block_start: usize,
    /// Consecutive blocks the server did not fully acknowledge.
    pub attempts: u8,
    /// Block sent, waiting for the server acknowledgement.
    pub awaiting_ack: bool,
    /// CRC negotiated with the server.
    pub crc: bool,
}

/// Protocol phase of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Initiate upload sent.
    Upload,
    /// Upload segment requested with `toggle`.
    UploadSegment { toggle: bool },
    /// Block upload initiated or streaming.
    BlockUpload(BlockUpload),
    /// Last block acknowledged, waiting for the end frame.
    BlockUploadEnd { crc: bool },
    /// Initiate download sent.
    Download { expedited: bool },
    /// Download segment sent with `toggle`.
    DownloadSegment { toggle: bool },
    /// Block download initiated or streaming.
    BlockDownload(BlockDownload),
    /// End of block download sent.
    BlockDownloadEnd,
}

/// One upload or download handled by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub(crate) object_id: ObjectId,
    pub(crate) direction: Direction,
    pub(crate) size: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) value: Option<Value>,
    pub(crate) offset: usize,
    pub(crate) phase: Phase,
}

impl TransferRequest {
    /// Creates an upload of unknown size.
    pub(crate) fn upload(object_id: ObjectId) -> Self {
        Self {
            object_id,
            direction: Direction::Upload,
            size: 0,
            data: Vec::new(),
            value: None,
            offset: 0,
            phase: Phase::Queued,
        }
    }

    /// Creates a download of the already encoded `data`.
    pub(crate) fn download(object_id: ObjectId, value: Value, data: Vec<u8>) -> Self {
        Self {
            object_id,
            direction: Direction::Download,
            size: data.len(),
            data,
            value: Some(value),
            offset: 0,
            phase: Phase::Queued,
        }
    }

    /// Entry the request reads or writes.
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Declared size in bytes (0 while unknown on uploads).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes accumulated (upload) or to send (download).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes still to transfer.
    pub fn remaining(&self) -> usize {
        match self.direction {
            Direction::Upload => self.size.saturating_sub(self.data.len()),
            Direction::Download => self.size.saturating_sub(self.offset),
        }
    }

    /// Returns whether the entry is moved by block transfer regardless of size.
    pub fn uses_block_transfer(&self) -> bool {
        self.object_id.data_type == DataType::Domain
    }

    /// Returns whether this request is an upload of the same entry as `other`.
    pub(crate) fn is_upload_of(&self, object_id: &ObjectId) -> bool {
        self.direction == Direction::Upload && self.object_id.same_object(object_id)
    }

    /// Takes the next download chunk (up to 7 bytes) and advances the offset.
    ///
    /// Returns the padded chunk, its length and whether it is the last one.
    pub(crate) fn next_chunk(&mut self) -> ([u8; SEGMENT_SIZE], u8, bool) {
        let start = self.offset.min(self.data.len());
        let end = (start + SEGMENT_SIZE).min(self.data.len());
        let mut chunk = [0u8; SEGMENT_SIZE];
        chunk[..end - start].copy_from_slice(&self.data[start..end]);
        self.offset = end;
        (chunk, (end - start) as u8, end >= self.size)
    }
}

/// Segments needed to move `remaining` bytes, clamped to `1..=max`.
pub(crate) fn block_size_for(remaining: usize, max: u8) -> u8 {
    let max = max.clamp(1, BLOCK_MAX);
    let segments = remaining.div_ceil(SEGMENT_SIZE);
    segments.clamp(1, usize::from(max)) as u8
}

/// Padding bytes in the final segment of a `size`-byte transfer.
pub(crate) fn final_padding(size: usize) -> u8 {
    match size % SEGMENT_SIZE {
        0 if size > 0 => 0,
        0 => SEGMENT_SIZE as u8,
        tail => (SEGMENT_SIZE - tail) as u8,
    }
}
