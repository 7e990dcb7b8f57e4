//! Byte-level framing for the inverter link.
//!
//! Outbound, every command frame is:
//! - start marker + command code + encoded parameters
//! - an optional byte-sum checksum (lowercase hex)
//! - an optional CRC-16 with reserved bytes escaped
//! - the terminator
//!
//! and is written as a sequence of 8-byte bursts, each flushed before the
//! next. Inbound, replies are delimiter-terminated lines.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use checksum::{crc16, frame_checksum, sum_checksum, RESERVED_BYTES};
pub use codec::{chunk_frame, decode_line, Frame, FrameConfig, LineCodec, CHUNK_SIZE};
pub use error::{FrameError, Result};
pub use reader::LineReader;
pub use writer::ChunkWriter;
