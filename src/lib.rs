//! Serverless peer-to-peer chat for a shared LAN broadcast domain.
//!
//! Peers discover each other with a broadcast hello, keep a roster of the
//! participants of a chat room (identified by a cleartext chat-ID), and
//! exchange short messages as single UDP datagrams. Everything after the
//! chat-ID envelope is encrypted with the SCEDA cipher under a 16-byte key
//! derived from a shared passphrase.

pub mod digest;
pub mod encodings;
mod errors;
pub mod host;
pub mod pdu;
pub mod sceda;

pub use self::encodings::Encoding;
pub use self::errors::ScError;
pub use self::host::{Host, HostConfig, HostHandle, HostNotification, PeerInfo, DEFAULT_PORT};
pub use self::pdu::{Pdu, PduType, MAX_PDU};
