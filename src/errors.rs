use std::io;
use thiserror::Error;

/// Kinds of failures raised while framing, parsing or decrypting PDUs,
/// or while talking to the socket.
#[derive(Error, Debug)]
pub enum ScError {
    /// Bad magic, unterminated chat-ID, short header, or a chat-ID that
    /// cannot be framed.
    #[error("malformed frame")]
    MalformedFrame,

    /// The three-letter type code is not one of the known PDU types.
    #[error("unknown PDU type")]
    UnknownType,

    /// The encoding name is not in the registry.
    #[error("unknown encoding")]
    UnknownEncoding,

    /// Ciphertext length is not a positive multiple of the block size, or
    /// the embedded length field is out of range (wrong key or IV).
    #[error("decryption failed")]
    DecryptFailed,

    /// I/O error on the UDP socket.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}
