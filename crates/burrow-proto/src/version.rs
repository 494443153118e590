//! Protocol version packed into the 4-byte handshake request

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version announced during the handshake
///
/// Only `major` and `transport` take part in the compatibility check;
/// `minor` and `circuit` are informational and reserved for non-breaking
/// extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub transport: u8,
    pub circuit: u8,
}

impl ProtocolVersion {
    /// Version spoken by this build
    pub const CURRENT: ProtocolVersion = ProtocolVersion::new(1, 0, 1, 1);

    pub const fn new(major: u8, minor: u8, transport: u8, circuit: u8) -> Self {
        Self {
            major,
            minor,
            transport,
            circuit,
        }
    }

    /// Pack into a single value, most significant byte first:
    /// major, minor, transport, circuit
    pub const fn to_u32(self) -> u32 {
        ((self.major as u32) << 24)
            | ((self.minor as u32) << 16)
            | ((self.transport as u32) << 8)
            | (self.circuit as u32)
    }

    /// Unpack a packed version. Total: every input yields some version.
    pub const fn from_u32(packed: u32) -> Self {
        Self {
            major: (packed >> 24) as u8,
            minor: (packed >> 16) as u8,
            transport: (packed >> 8) as u8,
            circuit: packed as u8,
        }
    }

    /// Encode to the 4 bytes sent on the wire
    pub fn encode(self) -> [u8; 4] {
        self.to_u32().to_be_bytes()
    }

    /// Decode the 4 bytes received from the wire
    pub fn decode(bytes: [u8; 4]) -> Self {
        Self::from_u32(u32::from_be_bytes(bytes))
    }

    /// Two versions are compatible iff major and transport are equal
    pub fn is_compatible_with(&self, peer: &ProtocolVersion) -> bool {
        self.major == peer.major && self.transport == peer.transport
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.transport, self.circuit
        )
    }
}
