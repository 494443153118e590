//! Burrow Protocol Definitions
//!
//! This crate defines the wire-level pieces of the burrow control plane:
//! the version handshake packets, the command envelope framing and the
//! value objects carried by admin commands.

pub mod codec;
pub mod handshake;
pub mod messages;
pub mod payload;
pub mod status;
pub mod version;

pub use codec::{CodecError, Envelope, EnvelopeCodec, EnvelopeKind};
pub use handshake::{HandshakeReply, HandshakeRequest};
pub use messages::*;
pub use payload::PayloadCodec;
pub use status::ReplyStatus;
pub use version::ProtocolVersion;

/// Maximum envelope frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the fixed envelope header that follows the length prefix
///
/// command_id (4) + serial (4) + kind (1) + status (4)
pub const ENVELOPE_HEADER_LEN: usize = 13;
