//! Fixed-size handshake packets
//!
//! Each packet owns the buffer that an in-flight read or write operates on.
//! The handshake engine moves the packet into the pending step and gets it
//! back when the I/O completes.

use crate::version::ProtocolVersion;

/// Version request sent by the initiating side (4 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    buf: [u8; Self::LEN],
}

impl HandshakeRequest {
    pub const LEN: usize = 4;

    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            buf: version.encode(),
        }
    }

    /// Zeroed packet, used as the target of a read
    pub fn empty() -> Self {
        Self {
            buf: [0; Self::LEN],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion::decode(self.buf)
    }
}

/// Single result byte sent back by the responding side
///
/// Nonzero means accepted, zero means rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    buf: [u8; Self::LEN],
}

impl HandshakeReply {
    pub const LEN: usize = 1;

    pub fn new(accepted: bool) -> Self {
        Self {
            buf: [accepted as u8],
        }
    }

    pub fn empty() -> Self {
        Self {
            buf: [0; Self::LEN],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn is_accepted(&self) -> bool {
        self.buf[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_version() {
        let request = HandshakeRequest::new(ProtocolVersion::new(2, 1, 5, 9));
        assert_eq!(request.as_bytes(), &[2, 1, 5, 9]);
        assert_eq!(request.version(), ProtocolVersion::new(2, 1, 5, 9));
    }

    #[test]
    fn test_request_read_target() {
        let mut request = HandshakeRequest::empty();
        request.buffer_mut().copy_from_slice(&[1, 0, 1, 1]);
        assert_eq!(request.version(), ProtocolVersion::new(1, 0, 1, 1));
    }

    #[test]
    fn test_reply_result_byte() {
        assert!(HandshakeReply::new(true).is_accepted());
        assert!(!HandshakeReply::new(false).is_accepted());
        assert!(!HandshakeReply::empty().is_accepted());

        // Any nonzero byte means accepted
        let mut reply = HandshakeReply::empty();
        reply.buffer_mut()[0] = 0x7f;
        assert!(reply.is_accepted());
    }
}
