//! Binary package framing.
//!
//! Frame layout (4-byte length prefix + 18-byte header + optional credentials + body):
//!
//! ```text
//! +-------------+---------+--------+----------------+
//! | length (LE) | command | flags  | correlation id |
//! |   4 bytes   | 1 byte  | 1 byte |    16 bytes    |
//! +-------------+---------+--------+----------------+
//! | login_len (LE u32) | login | pass_len (LE u32) | pass |   only if flags & 0x01
//! +--------------------+-------+-------------------+------+
//! | body (remaining bytes)                                |
//! +-------------------------------------------------------+
//! ```
//!
//! `length` counts every byte after the prefix and may not exceed
//! [`MAX_FRAME_SIZE`]. The correlation id is written in the mixed-endian
//! GUID layout used by the server.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed package header (command + flags + correlation id).
pub const PACKAGE_HEADER_SIZE: usize = 18;

/// Package flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageFlags(u8);

impl PackageFlags {
    /// Login and password follow the header.
    pub const AUTHENTICATED: u8 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_authenticated(mut self) -> Self {
        self.0 |= Self::AUTHENTICATED;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.0 & Self::AUTHENTICATED != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

/// Login and password sent inline with a package.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Command tag.
    pub command: Command,
    /// Joins a request to its response(s).
    pub correlation_id: Uuid,
    /// Per-package credentials, if any.
    pub credentials: Option<Credentials>,
    /// Command-specific body.
    pub body: Bytes,
}

impl Package {
    /// Creates a package with no credentials and an empty body.
    pub fn new(command: Command, correlation_id: Uuid) -> Self {
        Self {
            command,
            correlation_id,
            credentials: None,
            body: Bytes::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Creates a package whose body is the JSON encoding of `message`.
    pub fn from_json<T: Serialize>(
        command: Command,
        correlation_id: Uuid,
        message: &T,
    ) -> Result<Self, ProtocolError> {
        let body = serde_json::to_vec(message)?;
        Ok(Self::new(command, correlation_id).with_body(body))
    }

    /// Parses the body as a JSON message.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Interprets the body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn flags(&self) -> PackageFlags {
        match self.credentials {
            Some(_) => PackageFlags::new().with_authenticated(),
            None => PackageFlags::new(),
        }
    }

    /// Returns the number of bytes covered by the length prefix.
    pub fn frame_len(&self) -> usize {
        let credentials_len = self
            .credentials
            .as_ref()
            .map(|c| 8 + c.login.len() + c.password.len())
            .unwrap_or(0);
        PACKAGE_HEADER_SIZE + credentials_len + self.body.len()
    }

    /// Encodes the package, including its length prefix.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded package to `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let frame_len = self.frame_len();
        if frame_len > MAX_FRAME_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len as u64,
                max: MAX_FRAME_SIZE,
            });
        }

        buf.reserve(LENGTH_PREFIX_SIZE + frame_len);
        buf.put_u32_le(frame_len as u32);
        buf.put_u8(self.command.tag());
        buf.put_u8(self.flags().bits());
        buf.put_slice(&self.correlation_id.to_bytes_le());

        if let Some(ref credentials) = self.credentials {
            buf.put_u32_le(credentials.login.len() as u32);
            buf.put_slice(credentials.login.as_bytes());
            buf.put_u32_le(credentials.password.len() as u32);
            buf.put_slice(credentials.password.as_bytes());
        }

        buf.put_slice(&self.body);
        Ok(())
    }

    /// Decodes the next package from a stream buffer.
    ///
    /// Returns `Ok(Some(package))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// An oversized declared length is rejected before any of the frame
    /// is buffered or copied. Any other error leaves the buffer positioned
    /// at the next frame.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if declared > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: declared as u64,
                max: MAX_FRAME_SIZE,
            });
        }

        let frame_len = declared as usize;
        if buf.len() < LENGTH_PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let frame = buf.split_to(frame_len).freeze();
        Self::decode_frame(frame).map(Some)
    }

    /// Decodes one frame whose length prefix has already been stripped.
    pub fn decode_frame(mut frame: Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < PACKAGE_HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "{} bytes is shorter than the {}-byte header",
                frame.len(),
                PACKAGE_HEADER_SIZE
            )));
        }

        let command = Command::try_from(frame.get_u8())?;
        let flags = PackageFlags::from_bits(frame.get_u8());

        let mut id = [0u8; 16];
        frame.copy_to_slice(&mut id);
        let correlation_id = Uuid::from_bytes_le(id);

        let credentials = if flags.is_authenticated() {
            let login = read_string(&mut frame, "login")?;
            let password = read_string(&mut frame, "password")?;
            Some(Credentials { login, password })
        } else {
            None
        };

        Ok(Self {
            command,
            correlation_id,
            credentials,
            body: frame,
        })
    }
}

fn read_string(frame: &mut Bytes, field: &str) -> Result<String, ProtocolError> {
    if frame.remaining() < 4 {
        return Err(ProtocolError::MalformedFrame(format!(
            "truncated {} length",
            field
        )));
    }
    let len = frame.get_u32_le() as usize;
    if frame.remaining() < len {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} declares {} bytes, {} remain",
            field,
            len,
            frame.remaining()
        )));
    }
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_id() -> Uuid {
        Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap()
    }

    #[test]
    fn test_wire_layout_without_credentials() {
        let package = Package::new(Command::WriteEvents, sample_id()).with_body(&b"abc"[..]);
        let encoded = package.encode().unwrap();

        assert_eq!(encoded.len(), 4 + 18 + 3);
        assert_eq!(&encoded[0..4], &21u32.to_le_bytes());
        assert_eq!(encoded[4], 0x82);
        assert_eq!(encoded[5], 0x00);
        // GUID layout: first three groups little-endian, last two as-is
        assert_eq!(
            &encoded[6..22],
            &[
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert_eq!(&encoded[22..], b"abc");
    }

    #[test]
    fn test_wire_layout_with_credentials() {
        let package = Package::new(Command::ReadEvent, sample_id())
            .with_credentials(Some(Credentials::new("admin", "changeit")))
            .with_body(&b"{}"[..]);
        let encoded = package.encode().unwrap();

        let expected_len = 18 + 4 + 5 + 4 + 8 + 2;
        assert_eq!(&encoded[0..4], &(expected_len as u32).to_le_bytes());
        assert_eq!(encoded[5], PackageFlags::AUTHENTICATED);
        assert_eq!(&encoded[22..26], &5u32.to_le_bytes());
        assert_eq!(&encoded[26..31], b"admin");
        assert_eq!(&encoded[31..35], &8u32.to_le_bytes());
        assert_eq!(&encoded[35..43], b"changeit");
        assert_eq!(&encoded[43..], b"{}");
    }

    #[test]
    fn test_roundtrip_with_credentials() {
        let package = Package::new(Command::Authenticate, Uuid::new_v4())
            .with_credentials(Some(Credentials::new("ops", "secret")));
        let mut buf = package.encode().unwrap();
        let decoded = Package::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, package);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let package = Package::new(Command::Ping, Uuid::new_v4()).with_body(&b"payload"[..]);
        let encoded = package.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..3]);
        assert!(Package::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Package::decode(&mut buf).unwrap().is_none());
        // Nothing consumed while incomplete
        assert_eq!(buf.len(), encoded.len() - 1);
    }

    #[test]
    fn test_declared_length_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FRAME_SIZE + 1);
        buf.put_slice(&[0x01; 8]);

        let result = Package::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size, max })
                if size == MAX_FRAME_SIZE as u64 + 1 && max == MAX_FRAME_SIZE
        ));
        // Rejected from the prefix alone; nothing buffered or consumed
        assert_eq!(buf.len(), 12);
    }

    #[test]
    fn test_max_declared_length_waits_for_data() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FRAME_SIZE);
        assert!(Package::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_too_large() {
        let body = vec![0u8; MAX_FRAME_SIZE as usize - PACKAGE_HEADER_SIZE + 1];
        let package = Package::new(Command::WriteEvents, Uuid::new_v4()).with_body(body);
        let result = package.encode();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_at_limit() {
        let body = vec![7u8; MAX_FRAME_SIZE as usize - PACKAGE_HEADER_SIZE];
        let package = Package::new(Command::WriteEvents, Uuid::new_v4()).with_body(body);
        let mut buf = package.encode().unwrap();
        let decoded = Package::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body.len(), package.body.len());
    }

    #[test]
    fn test_unknown_command_consumes_frame() {
        let first = Package::new(Command::Ping, Uuid::new_v4());
        let second = Package::new(Command::Pong, Uuid::new_v4());

        let mut buf = first.encode().unwrap();
        buf[4] = 0x7E;
        buf.extend_from_slice(&second.encode().unwrap());

        let result = Package::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(0x7E))));

        let decoded = Package::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, second);
    }

    #[test]
    fn test_short_frame_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5);
        buf.put_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]);

        let result = Package::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_credentials() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(18 + 4 + 2);
        buf.put_u8(Command::ReadEvent.tag());
        buf.put_u8(PackageFlags::AUTHENTICATED);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32_le(10);
        buf.put_slice(b"ad");

        let result = Package::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_invalid_utf8_login() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(18 + 4 + 2 + 4);
        buf.put_u8(Command::ReadEvent.tag());
        buf.put_u8(PackageFlags::AUTHENTICATED);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32_le(2);
        buf.put_slice(&[0xFF, 0xFE]);
        buf.put_u32_le(0);

        let result = Package::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_multiple_packages_in_buffer() {
        let a = Package::new(Command::HeartbeatRequest, Uuid::new_v4());
        let b = Package::new(Command::WriteEventsCompleted, Uuid::new_v4()).with_body(&b"x"[..]);

        let mut buf = BytesMut::new();
        a.encode_to(&mut buf).unwrap();
        b.encode_to(&mut buf).unwrap();

        assert_eq!(Package::decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(Package::decode(&mut buf).unwrap().unwrap(), b);
        assert!(Package::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("admin", "changeit"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("changeit"));
    }

    #[test]
    fn test_json_body() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Probe {
            value: i64,
        }

        let package =
            Package::from_json(Command::WriteEvents, Uuid::new_v4(), &Probe { value: 3 }).unwrap();
        let parsed: Probe = package.body_json().unwrap();
        assert_eq!(parsed, Probe { value: 3 });
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        (0..Command::ALL.len()).prop_map(|i| Command::ALL[i])
    }

    fn arb_credentials() -> impl Strategy<Value = Option<Credentials>> {
        proptest::option::of(
            ("\\PC{0,32}", "\\PC{0,32}").prop_map(|(login, password)| Credentials {
                login,
                password,
            }),
        )
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            command in arb_command(),
            id in any::<u128>(),
            credentials in arb_credentials(),
            body in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let package = Package::new(command, Uuid::from_u128(id))
                .with_credentials(credentials)
                .with_body(body);

            let mut buf = package.encode().unwrap();
            let decoded = Package::decode(&mut buf).unwrap().unwrap();

            prop_assert_eq!(decoded, package);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_split_delivery_decodes_identically(
            body in proptest::collection::vec(any::<u8>(), 0..512),
            split in 0usize..600,
        ) {
            let package = Package::new(Command::StreamEventAppeared, Uuid::new_v4()).with_body(body);
            let encoded = package.encode().unwrap();
            let split = split.min(encoded.len());

            let mut buf = BytesMut::from(&encoded[..split]);
            if split < encoded.len() {
                prop_assert!(Package::decode(&mut buf).unwrap().is_none());
                buf.extend_from_slice(&encoded[split..]);
            }
            prop_assert_eq!(Package::decode(&mut buf).unwrap().unwrap(), package);
        }
    }
}
