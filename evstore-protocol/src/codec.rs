//! Stream encoder and decoder for packages.

use crate::error::ProtocolError;
use crate::package::Package;
use bytes::BytesMut;

/// Encodes packages into length-prefixed frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a package into a frame.
    pub fn encode_package(package: &Package) -> Result<BytesMut, ProtocolError> {
        package.encode()
    }
}

/// Accumulates bytes read from a socket and yields complete packages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next package from the buffer.
    pub fn decode_package(&mut self) -> Result<Option<Package>, ProtocolError> {
        Package::decode(&mut self.buffer)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
