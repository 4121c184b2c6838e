//! SDO wire frames.
//!
//! Every SDO exchange is one CAN frame with an 8-byte payload. Byte 0 is the
//! command specifier: its top three bits select the command family and the
//! low bits carry phase flags. Initiate commands carry the index
//! (little-endian) in bytes 1-2 and the sub-index in byte 3; segment commands
//! carry up to 7 payload bytes in bytes 1-7.
//!
//! | Byte 0 bits 7-5 | Client request | Server response |
//! |-----------------|----------------|-----------------|
//! | 0 | download segment | upload segment |
//! | 1 | initiate download | download segment |
//! | 2 | initiate upload | initiate upload |
//! | 3 | upload segment | initiate download |
//! | 4 | abort | abort |
//! | 5 | block upload | block download |
//! | 6 | block download | block upload |
//!
//! Client requests are built with [`ClientRequest`]; server responses are
//! parsed with [`ServerResponse::parse`]. Segments received during a block
//! upload carry no command specifier and are parsed with
//! [`BlockSegment::parse`].
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{ClientRequest, ServerResponse};
//!
//! let request = ClientRequest::InitiateUpload { index: 0x1018, sub_index: 1 };
//! assert_eq!(request.to_bytes(), [0x40, 0x18, 0x10, 0x01, 0, 0, 0, 0]);
//!
//! let response = ServerResponse::parse(&[0x4F, 0x18, 0x10, 0x01, 0x2A, 0, 0, 0]).unwrap();
//! match response {
//!     ServerResponse::UploadInitiate { expedited, unused, data, .. } => {
//!         assert!(expedited);
//!         assert_eq!(unused, 3);
//!         assert_eq!(data[0], 0x2A);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use crate::abort::AbortCode;
use crate::error::{Result, SdoError};

/// Default COB-ID base of client-to-server SDO frames (added to the node id).
pub const SDO_CLIENT_TO_SERVER: u32 = 0x600;
/// Default COB-ID base of server-to-client SDO frames (added to the node id).
pub const SDO_SERVER_TO_CLIENT: u32 = 0x580;
/// Payload size of every SDO frame.
pub const SDO_FRAME_SIZE: usize = 8;
/// Payload bytes per segment.
pub const SEGMENT_SIZE: usize = 7;
/// Largest payload an expedited transfer can carry.
pub const EXPEDITED_MAX: usize = 4;
/// Protocol ceiling on segments per block.
pub const BLOCK_MAX: u8 = 127;

const CS_MASK: u8 = 0xE0;

const CCS_DOWNLOAD_SEGMENT: u8 = 0 << 5;
const CCS_DOWNLOAD_INITIATE: u8 = 1 << 5;
const CCS_UPLOAD_INITIATE: u8 = 2 << 5;
const CCS_UPLOAD_SEGMENT: u8 = 3 << 5;
const CS_ABORT: u8 = 4 << 5;
const CCS_BLOCK_UPLOAD: u8 = 5 << 5;
const CCS_BLOCK_DOWNLOAD: u8 = 6 << 5;

const SCS_UPLOAD_SEGMENT: u8 = 0 << 5;
const SCS_DOWNLOAD_SEGMENT: u8 = 1 << 5;
const SCS_UPLOAD_INITIATE: u8 = 2 << 5;
const SCS_DOWNLOAD_INITIATE: u8 = 3 << 5;
const SCS_BLOCK_DOWNLOAD: u8 = 5 << 5;
const SCS_BLOCK_UPLOAD: u8 = 6 << 5;

/// s: data set size is indicated.
const FLAG_SIZE: u8 = 0x01;
/// e: expedited transfer.
const FLAG_EXPEDITED: u8 = 0x02;
/// c: no more segments.
const FLAG_LAST: u8 = 0x01;
const FLAG_TOGGLE: u8 = 0x10;
/// cc/sc: CRC supported (block initiate).
const FLAG_CRC: u8 = 0x04;
/// s: size indicated (block initiate).
const FLAG_BLOCK_SIZE: u8 = 0x02;

const BLOCK_UPLOAD_CS_INITIATE: u8 = 0x00;
const BLOCK_UPLOAD_CS_END: u8 = 0x01;
const BLOCK_UPLOAD_CS_ACK: u8 = 0x02;
const BLOCK_UPLOAD_CS_START: u8 = 0x03;
const BLOCK_DOWNLOAD_CS_END: u8 = 0x01;

const BLOCK_SEQNO_MASK: u8 = 0x7F;
const BLOCK_LAST_SEGMENT: u8 = 0x80;

/// A CAN frame as exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// COB-ID.
    pub id: u32,
    /// Payload (8 bytes for well-formed SDO frames).
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Creates a frame.
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// A request sent by the SDO client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// Initiate upload (read) of an entry.
    InitiateUpload {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
    },
    /// Request the next upload segment.
    UploadSegment {
        /// Toggle bit.
        toggle: bool,
    },
    /// Initiate download carrying up to 4 bytes inline.
    InitiateDownloadExpedited {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Inline data.
        data: [u8; EXPEDITED_MAX],
        /// Number of meaningful bytes in `data` (1-4).
        len: u8,
    },
    /// Initiate a segmented download announcing its size.
    InitiateDownload {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Total size in bytes.
        size: u32,
    },
    /// One download segment.
    DownloadSegment {
        /// Toggle bit.
        toggle: bool,
        /// Segment data.
        data: [u8; SEGMENT_SIZE],
        /// Number of meaningful bytes in `data`.
        len: u8,
        /// Last segment of the transfer.
        last: bool,
    },
    /// Initiate a block upload.
    BlockUploadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Segments per block.
        blksize: u8,
        /// Protocol switch threshold (0 disables switching).
        pst: u8,
        /// Client supports CRC.
        crc: bool,
    },
    /// Start the block upload after the initiate response.
    BlockUploadStart,
    /// Acknowledge a received block.
    BlockUploadAck {
        /// Last sequence number received in order (0 requests a resend).
        ackseq: u8,
        /// Segments per block for the next block.
        blksize: u8,
    },
    /// Confirm the end of a block upload.
    BlockUploadEnd,
    /// Initiate a block download.
    BlockDownloadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Total size in bytes.
        size: u32,
        /// Client supports CRC.
        crc: bool,
    },
    /// One segment of a block download sub-block.
    BlockDownloadSegment {
        /// Sequence number (1-127).
        seqno: u8,
        /// Segment data.
        data: [u8; SEGMENT_SIZE],
        /// Last segment of the transfer.
        last: bool,
    },
    /// End a block download.
    BlockDownloadEnd {
        /// Bytes of the last segment that carry no data.
        unused: u8,
        /// CRC of the whole data set (0 when CRC is not in use).
        crc: u16,
    },
    /// Abort the transfer.
    Abort {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Abort reason.
        code: AbortCode,
    },
}

impl ClientRequest {
    /// Serializes the request to an 8-byte payload.
    pub fn to_bytes(&self) -> [u8; SDO_FRAME_SIZE] {
        let mut bytes = [0u8; SDO_FRAME_SIZE];
        match *self {
            ClientRequest::InitiateUpload { index, sub_index } => {
                bytes[0] = CCS_UPLOAD_INITIATE;
                put_mux(&mut bytes, index, sub_index);
            }
            ClientRequest::UploadSegment { toggle } => {
                bytes[0] = CCS_UPLOAD_SEGMENT | toggle_bit(toggle);
            }
            ClientRequest::InitiateDownloadExpedited {
                index,
                sub_index,
                data,
                len,
            } => {
                let unused = (EXPEDITED_MAX as u8).saturating_sub(len) & 0x03;
                bytes[0] = CCS_DOWNLOAD_INITIATE | (unused << 2) | FLAG_EXPEDITED | FLAG_SIZE;
                put_mux(&mut bytes, index, sub_index);
                bytes[4..8].copy_from_slice(&data);
            }
            ClientRequest::InitiateDownload {
                index,
                sub_index,
                size,
            } => {
                bytes[0] = CCS_DOWNLOAD_INITIATE | FLAG_SIZE;
                put_mux(&mut bytes, index, sub_index);
                bytes[4..8].copy_from_slice(&size.to_le_bytes());
            }
            ClientRequest::DownloadSegment {
                toggle,
                data,
                len,
                last,
            } => {
                let unused = (SEGMENT_SIZE as u8).saturating_sub(len) & 0x07;
                bytes[0] = CCS_DOWNLOAD_SEGMENT | toggle_bit(toggle) | (unused << 1);
                if last {
                    bytes[0] |= FLAG_LAST;
                }
                bytes[1..8].copy_from_slice(&data);
            }
            ClientRequest::BlockUploadInitiate {
                index,
                sub_index,
                blksize,
                pst,
                crc,
            } => {
                bytes[0] = CCS_BLOCK_UPLOAD | BLOCK_UPLOAD_CS_INITIATE | crc_flag(crc);
                put_mux(&mut bytes, index, sub_index);
                bytes[4] = blksize;
                bytes[5] = pst;
            }
            ClientRequest::BlockUploadStart => {
                bytes[0] = CCS_BLOCK_UPLOAD | BLOCK_UPLOAD_CS_START;
            }
            ClientRequest::BlockUploadAck { ackseq, blksize } => {
                bytes[0] = CCS_BLOCK_UPLOAD | BLOCK_UPLOAD_CS_ACK;
                bytes[1] = ackseq;
                bytes[2] = blksize;
            }
            ClientRequest::BlockUploadEnd => {
                bytes[0] = CCS_BLOCK_UPLOAD | BLOCK_UPLOAD_CS_END;
            }
            ClientRequest::BlockDownloadInitiate {
                index,
                sub_index,
                size,
                crc,
            } => {
                bytes[0] = CCS_BLOCK_DOWNLOAD | crc_flag(crc) | FLAG_BLOCK_SIZE;
                put_mux(&mut bytes, index, sub_index);
                bytes[4..8].copy_from_slice(&size.to_le_bytes());
            }
            ClientRequest::BlockDownloadSegment { seqno, data, last } => {
                bytes[0] = seqno & BLOCK_SEQNO_MASK;
                if last {
                    bytes[0] |= BLOCK_LAST_SEGMENT;
                }
                bytes[1..8].copy_from_slice(&data);
            }
            ClientRequest::BlockDownloadEnd { unused, crc } => {
                bytes[0] = CCS_BLOCK_DOWNLOAD | ((unused & 0x07) << 2) | BLOCK_DOWNLOAD_CS_END;
                bytes[1..3].copy_from_slice(&crc.to_le_bytes());
            }
            ClientRequest::Abort {
                index,
                sub_index,
                code,
            } => {
                bytes[0] = CS_ABORT;
                put_mux(&mut bytes, index, sub_index);
                bytes[4..8].copy_from_slice(&code.0.to_le_bytes());
            }
        }
        bytes
    }
}

/// A response received from the SDO server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerResponse {
    /// Initiate upload response.
    UploadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Data is inline (expedited).
        expedited: bool,
        /// Size (or byte count for expedited) is indicated.
        size_indicated: bool,
        /// Inline bytes that carry no data (expedited with size indicated).
        unused: u8,
        /// Bytes 4-7: inline data, or the little-endian total size.
        data: [u8; EXPEDITED_MAX],
    },
    /// Upload segment response.
    UploadSegment {
        /// Toggle bit.
        toggle: bool,
        /// Number of meaningful bytes in `data`.
        len: u8,
        /// No more segments follow.
        last: bool,
        /// Segment data.
        data: [u8; SEGMENT_SIZE],
    },
    /// Initiate download response.
    DownloadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
    },
    /// Download segment response.
    DownloadSegment {
        /// Toggle bit.
        toggle: bool,
    },
    /// Initiate block upload response.
    BlockUploadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Server supports CRC.
        crc: bool,
        /// Total size, when indicated.
        size: Option<u32>,
    },
    /// End of block upload.
    BlockUploadEnd {
        /// Bytes of the last segment that carry no data.
        unused: u8,
        /// CRC of the whole data set.
        crc: u16,
    },
    /// Initiate block download response.
    BlockDownloadInitiate {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Server supports CRC.
        crc: bool,
        /// Segments per block.
        blksize: u8,
    },
    /// Block download acknowledgement.
    BlockDownloadAck {
        /// Last sequence number received in order.
        ackseq: u8,
        /// Segments per block for the next block.
        blksize: u8,
    },
    /// End of block download response.
    BlockDownloadEnd,
    /// Abort transfer.
    Abort {
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
        /// Abort reason.
        code: AbortCode,
    },
}

impl ServerResponse {
    /// Parses an 8-byte server payload.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::InvalidFrame` if the payload is not 8 bytes long or
    /// the command specifier is unknown.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes = frame_bytes(data)?;
        let cmd = bytes[0];
        let index = u16::from_le_bytes([bytes[1], bytes[2]]);
        let sub_index = bytes[3];
        let tail = [bytes[4], bytes[5], bytes[6], bytes[7]];

        let response = match cmd & CS_MASK {
            SCS_UPLOAD_SEGMENT => {
                let mut data = [0u8; SEGMENT_SIZE];
                data.copy_from_slice(&bytes[1..8]);
                ServerResponse::UploadSegment {
                    toggle: cmd & FLAG_TOGGLE != 0,
                    len: SEGMENT_SIZE as u8 - ((cmd >> 1) & 0x07),
                    last: cmd & FLAG_LAST != 0,
                    data,
                }
            }
            SCS_DOWNLOAD_SEGMENT => ServerResponse::DownloadSegment {
                toggle: cmd & FLAG_TOGGLE != 0,
            },
            SCS_UPLOAD_INITIATE => ServerResponse::UploadInitiate {
                index,
                sub_index,
                expedited: cmd & FLAG_EXPEDITED != 0,
                size_indicated: cmd & FLAG_SIZE != 0,
                unused: (cmd >> 2) & 0x03,
                data: tail,
            },
            SCS_DOWNLOAD_INITIATE => ServerResponse::DownloadInitiate { index, sub_index },
            CS_ABORT => ServerResponse::Abort {
                index,
                sub_index,
                code: AbortCode(u32::from_le_bytes(tail)),
            },
            SCS_BLOCK_DOWNLOAD => match cmd & 0x03 {
                0 => ServerResponse::BlockDownloadInitiate {
                    index,
                    sub_index,
                    crc: cmd & FLAG_CRC != 0,
                    blksize: bytes[4],
                },
                1 => ServerResponse::BlockDownloadEnd,
                2 => ServerResponse::BlockDownloadAck {
                    ackseq: bytes[1],
                    blksize: bytes[2],
                },
                other => {
                    return Err(SdoError::invalid_frame(format!(
                        "unknown block download subcommand {}",
                        other
                    )))
                }
            },
            SCS_BLOCK_UPLOAD => {
                if cmd & 0x01 == 0 {
                    ServerResponse::BlockUploadInitiate {
                        index,
                        sub_index,
                        crc: cmd & FLAG_CRC != 0,
                        size: (cmd & FLAG_BLOCK_SIZE != 0).then(|| u32::from_le_bytes(tail)),
                    }
                } else {
                    ServerResponse::BlockUploadEnd {
                        unused: (cmd >> 2) & 0x07,
                        crc: u16::from_le_bytes([bytes[1], bytes[2]]),
                    }
                }
            }
            other => {
                return Err(SdoError::invalid_frame(format!(
                    "unknown server command specifier 0x{:02X}",
                    other
                )))
            }
        };
        Ok(response)
    }
}

/// A segment received during a block upload sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSegment {
    /// Sequence number within the block (1-127).
    pub seqno: u8,
    /// Last segment of the transfer.
    pub last: bool,
    /// Segment data (padding included on the last segment).
    pub data: [u8; SEGMENT_SIZE],
}

impl BlockSegment {
    /// Parses an 8-byte block segment.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::InvalidFrame` if the payload is not 8 bytes long.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes = frame_bytes(data)?;
        let mut segment = [0u8; SEGMENT_SIZE];
        segment.copy_from_slice(&bytes[1..8]);
        Ok(Self {
            seqno: bytes[0] & BLOCK_SEQNO_MASK,
            last: bytes[0] & BLOCK_LAST_SEGMENT != 0,
            data: segment,
        })
    }
}

/// Returns whether `data` is an abort frame (`0x80` command byte).
pub(crate) fn is_abort(data: &[u8]) -> bool {
    data.len() == SDO_FRAME_SIZE && data[0] == CS_ABORT
}

fn frame_bytes(data: &[u8]) -> Result<&[u8; SDO_FRAME_SIZE]> {
    data.try_into().map_err(|_| {
        SdoError::invalid_frame(format!(
            "expected {} bytes, got {}",
            SDO_FRAME_SIZE,
            data.len()
        ))
    })
}

fn put_mux(bytes: &mut [u8; SDO_FRAME_SIZE], index: u16, sub_index: u8) {
    bytes[1..3].copy_from_slice(&index.to_le_bytes());
    bytes[3] = sub_index;
}

fn toggle_bit(toggle: bool) -> u8 {
    if toggle {
        FLAG_TOGGLE
    } else {
        0
    }
}

fn crc_flag(crc: bool) -> u8 {
    if crc {
        FLAG_CRC
    } else {
        0
    }
}
