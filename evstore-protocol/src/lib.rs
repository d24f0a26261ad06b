//! # evstore-protocol
//!
//! Wire protocol implementation for the evstore TCP interface.
//!
//! This crate provides:
//! - Length-prefixed package framing with optional inline credentials
//! - The closed set of protocol commands
//! - JSON message bodies for every command
//! - Server result codes and protocol errors

pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod package;

pub use codec::{Decoder, Encoder};
pub use command::Command;
pub use error::{OperationResult, ProtocolError};
pub use package::{Credentials, Package, PackageFlags, LENGTH_PREFIX_SIZE, PACKAGE_HEADER_SIZE};

/// Default TCP port of an evstore node.
pub const DEFAULT_PORT: u16 = 1113;

/// Maximum size of one frame, excluding its length prefix (64 MiB).
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;
