//! btrfs send stream decoding.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +--------------+     +--------------+
//! |    Header    | --> |   Command    | --> |  Normalizer  |
//! |  validation  |     |  dispatcher  |     |  (changes)   |
//! +--------------+     +--------------+     +--------------+
//!                             |
//!                       TLV attributes
//! ```
//!
//! Single forward pass over an `AsyncRead`: no seeking, no peeking. A
//! decode owns its change list until it returns, so decodes of different
//! snapshot pairs can run concurrently without coordination.

pub mod attr;
pub mod decoder;
pub mod protocol;

pub use attr::AttributeReader;
pub use decoder::{decode_send_stream, read_send_stream, DecodeStats, SendStreamDecoder};
pub use protocol::{
    encode_stream, Attribute, Command, CommandFrame, CommandHeader, StreamHeader, STREAM_MAGIC,
    STREAM_VERSION,
};
