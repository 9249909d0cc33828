//! Typed protocol data units and their binary framing.
//!
//! One PDU is one UDP datagram:
//!
//! ```text
//! [0x00][0x01][chat-ID bytes][0x00]   cleartext envelope
//! [IV: 8 bytes]                       cleartext, feeds decryption
//! [SCEDA( type(3) || encoding-name || 0x00 || payload )]
//! ```
//!
//! The chat-ID stays in the clear so a host can discard traffic for other
//! rooms without spending a decryption on it (see [`check_chat_id`]).

use bytes::{BufMut, BytesMut};

use crate::encodings::Encoding;
use crate::errors::ScError;
use crate::sceda;

/// Maximum size of a PDU datagram in bytes. Receivers accept up to this
/// and silently drop anything larger.
pub const MAX_PDU: usize = 4096;

const MAGIC: [u8; 2] = [0x00, 0x01];

/// The type of a PDU, carried as a three-letter code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PduType {
    /// `HLO` — broadcast discovery; payload is the sender's nickname.
    Hello,
    /// `ACK` — response to a hello; payload is the sender's nickname.
    Welcome,
    /// `LEV` — the sender is leaving; empty payload.
    Leave,
    /// `MSG` — a chat message.
    Message,
    /// `BAD` — rate-limited notification that a PDU failed to parse.
    Malformed,
    /// `CNF` — nickname conflict; payload is the rival's dotted-quad IP,
    /// `0.0.0.0` meaning the sender itself.
    Conflict,
}

impl PduType {
    /// The three-letter wire code.
    pub fn code(&self) -> &'static str {
        match self {
            PduType::Hello => "HLO",
            PduType::Welcome => "ACK",
            PduType::Leave => "LEV",
            PduType::Message => "MSG",
            PduType::Malformed => "BAD",
            PduType::Conflict => "CNF",
        }
    }

    /// Looks up a type by wire code; `None` for anything unknown.
    pub fn from_code(code: &[u8]) -> Option<PduType> {
        match code {
            b"HLO" => Some(PduType::Hello),
            b"ACK" => Some(PduType::Welcome),
            b"LEV" => Some(PduType::Leave),
            b"MSG" => Some(PduType::Message),
            b"BAD" => Some(PduType::Malformed),
            b"CNF" => Some(PduType::Conflict),
            _ => None,
        }
    }
}

/// One protocol data unit. The payload is opaque bytes whose meaning
/// depends on the type; its declared character encoding travels alongside
/// for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Pdu {
    pub chat_id: String,
    pub pdu_type: PduType,
    pub encoding: Encoding,
    pub payload: Vec<u8>,
}

impl Pdu {
    pub fn new(
        chat_id: impl Into<String>,
        pdu_type: PduType,
        encoding: Encoding,
        payload: Vec<u8>,
    ) -> Self {
        Pdu {
            chat_id: chat_id.into(),
            pdu_type,
            encoding,
            payload,
        }
    }

    /// Serializes and encrypts the PDU into one datagram, generating a
    /// fresh IV. Fails with [`ScError::MalformedFrame`] if the chat-ID
    /// embeds a NUL and so cannot be framed.
    pub fn to_bytes(&self, key: &[u8; sceda::KEY_LEN]) -> Result<Vec<u8>, ScError> {
        if self.chat_id.as_bytes().contains(&0) {
            return Err(ScError::MalformedFrame);
        }

        let mut clear =
            Vec::with_capacity(3 + self.encoding.name().len() + 1 + self.payload.len());
        clear.extend_from_slice(self.pdu_type.code().as_bytes());
        clear.extend_from_slice(self.encoding.name().as_bytes());
        clear.push(0);
        clear.extend_from_slice(&self.payload);

        let iv = sceda::generate_iv();
        let ciphertext = sceda::encrypt(&clear, key, &iv);

        let mut frame = BytesMut::with_capacity(
            MAGIC.len() + self.chat_id.len() + 1 + iv.len() + ciphertext.len(),
        );
        frame.put_slice(&MAGIC);
        frame.put_slice(self.chat_id.as_bytes());
        frame.put_u8(0);
        frame.put_slice(&iv);
        frame.put_slice(&ciphertext);
        Ok(frame.to_vec())
    }

    /// Parses and decrypts one datagram into a PDU.
    pub fn from_bytes(bytes: &[u8], key: &[u8; sceda::KEY_LEN]) -> Result<Pdu, ScError> {
        if bytes.len() < MAGIC.len() || bytes[..2] != MAGIC {
            return Err(ScError::MalformedFrame);
        }
        let rest = &bytes[2..];
        let id_end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ScError::MalformedFrame)?;
        let chat_id = std::str::from_utf8(&rest[..id_end])
            .map_err(|_| ScError::MalformedFrame)?
            .to_string();

        let body = &rest[id_end + 1..];
        if body.len() < sceda::IV_LEN {
            return Err(ScError::MalformedFrame);
        }
        let mut iv = [0u8; sceda::IV_LEN];
        iv.copy_from_slice(&body[..sceda::IV_LEN]);
        let clear = sceda::decrypt(&body[sceda::IV_LEN..], key, &iv)?;

        if clear.len() < 3 {
            return Err(ScError::MalformedFrame);
        }
        let pdu_type = PduType::from_code(&clear[..3]).ok_or(ScError::UnknownType)?;
        let name_end = clear[3..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| p + 3)
            .ok_or(ScError::MalformedFrame)?;
        let encoding = std::str::from_utf8(&clear[3..name_end])
            .ok()
            .and_then(Encoding::from_name)
            .ok_or(ScError::UnknownEncoding)?;

        Ok(Pdu {
            chat_id,
            pdu_type,
            encoding,
            payload: clear[name_end + 1..].to_vec(),
        })
    }
}

/// Checks the cleartext envelope of a raw datagram against a chat-ID
/// without decrypting anything: the magic, the ID bytes, and the NUL
/// terminator must all match.
pub fn check_chat_id(bytes: &[u8], chat_id: &str) -> bool {
    let id = chat_id.as_bytes();
    if bytes.len() < id.len() + 3 {
        return false;
    }
    bytes[..2] == MAGIC && &bytes[2..2 + id.len()] == id && bytes[2 + id.len()] == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x11; 16];

    fn round_trip(pdu: Pdu) {
        let bytes = pdu.to_bytes(&KEY).expect("serialize");
        let back = Pdu::from_bytes(&bytes, &KEY).expect("parse");
        assert_eq!(back, pdu);
    }

    #[test]
    fn round_trip_all_types() {
        for pdu_type in [
            PduType::Hello,
            PduType::Welcome,
            PduType::Leave,
            PduType::Message,
            PduType::Malformed,
            PduType::Conflict,
        ] {
            round_trip(Pdu::new("room", pdu_type, Encoding::Ascii, b"alice".to_vec()));
        }
    }

    #[test]
    fn round_trip_all_encodings() {
        for encoding in [
            Encoding::Ascii,
            Encoding::Utf7,
            Encoding::Utf8,
            Encoding::Utf16Le,
            Encoding::Utf16Be,
            Encoding::Utf32,
            Encoding::Latin1,
        ] {
            round_trip(Pdu::new(
                "room",
                PduType::Message,
                encoding,
                vec![0xC3, 0xA9],
            ));
        }
    }

    #[test]
    fn round_trip_empty_and_large_payloads() {
        round_trip(Pdu::new("room", PduType::Leave, Encoding::Ascii, Vec::new()));
        round_trip(Pdu::new(
            "a-rather-long-chat-room-identifier",
            PduType::Message,
            Encoding::Utf8,
            vec![0x42; 3800],
        ));
    }

    #[test]
    fn payload_bytes_pass_through_untouched() {
        let pdu = Pdu::new("room", PduType::Message, Encoding::Utf8, vec![0xC3, 0xA9]);
        let back = Pdu::from_bytes(&pdu.to_bytes(&KEY).unwrap(), &KEY).unwrap();
        assert_eq!(back.encoding, Encoding::Utf8);
        assert_eq!(back.payload, vec![0xC3, 0xA9]);
        assert_eq!(back.payload.len(), 2);
    }

    #[test]
    fn chat_id_with_nul_is_unframable() {
        let pdu = Pdu::new("ro\0om", PduType::Message, Encoding::Ascii, Vec::new());
        assert!(matches!(pdu.to_bytes(&KEY), Err(ScError::MalformedFrame)));
    }

    #[test]
    fn rejects_bad_magic_and_garbage() {
        let pdu = Pdu::new("room", PduType::Message, Encoding::Ascii, b"hi".to_vec());
        let mut bytes = pdu.to_bytes(&KEY).unwrap();
        bytes[1] = 7;
        assert!(matches!(
            Pdu::from_bytes(&bytes, &KEY),
            Err(ScError::MalformedFrame)
        ));

        assert!(Pdu::from_bytes(&[], &KEY).is_err());
        assert!(Pdu::from_bytes(&[0x00], &KEY).is_err());
        assert!(Pdu::from_bytes(&[0xFF; 64], &KEY).is_err());
    }

    #[test]
    fn rejects_unterminated_chat_id() {
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(&[b'x'; 40]);
        assert!(matches!(
            Pdu::from_bytes(&bytes, &KEY),
            Err(ScError::MalformedFrame)
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let pdu = Pdu::new("room", PduType::Message, Encoding::Ascii, b"hi".to_vec());
        let bytes = pdu.to_bytes(&KEY).unwrap();
        // Cut into the ciphertext: no longer a whole number of blocks.
        assert!(Pdu::from_bytes(&bytes[..bytes.len() - 3], &KEY).is_err());
        // Cut into the IV.
        assert!(matches!(
            Pdu::from_bytes(&bytes[..10], &KEY),
            Err(ScError::MalformedFrame)
        ));
    }

    #[test]
    fn rejects_wrong_key() {
        let pdu = Pdu::new("room", PduType::Message, Encoding::Ascii, b"hi".to_vec());
        let bytes = pdu.to_bytes(&KEY).unwrap();
        let wrong = [0x22u8; 16];
        match Pdu::from_bytes(&bytes, &wrong) {
            Err(_) => {}
            Ok(other) => assert_ne!(other, pdu),
        }
    }

    #[test]
    fn rejects_unknown_type_code() {
        // Hand-build a frame whose decrypted body carries a bogus type.
        let mut clear = b"XYZ".to_vec();
        clear.extend_from_slice(b"us-ascii\0payload");
        let iv = [9u8; 8];
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(b"room\0");
        bytes.extend_from_slice(&iv);
        bytes.extend_from_slice(&sceda::encrypt(&clear, &KEY, &iv));
        assert!(matches!(
            Pdu::from_bytes(&bytes, &KEY),
            Err(ScError::UnknownType)
        ));
    }

    #[test]
    fn rejects_unknown_encoding_name() {
        let mut clear = b"MSG".to_vec();
        clear.extend_from_slice(b"utf-9\0payload");
        let iv = [9u8; 8];
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(b"room\0");
        bytes.extend_from_slice(&iv);
        bytes.extend_from_slice(&sceda::encrypt(&clear, &KEY, &iv));
        assert!(matches!(
            Pdu::from_bytes(&bytes, &KEY),
            Err(ScError::UnknownEncoding)
        ));
    }

    #[test]
    fn prefilter_agrees_with_parsing() {
        let pdu = Pdu::new("room", PduType::Message, Encoding::Ascii, b"hi".to_vec());
        let bytes = pdu.to_bytes(&KEY).unwrap();

        assert!(check_chat_id(&bytes, "room"));
        assert!(!check_chat_id(&bytes, "roomy"));
        assert!(!check_chat_id(&bytes, "roo"));
        assert!(!check_chat_id(&bytes, "other"));
        assert!(!check_chat_id(&[], "room"));
        assert!(!check_chat_id(&[0xFF; 32], "room"));

        assert_eq!(Pdu::from_bytes(&bytes, &KEY).unwrap().chat_id, "room");
    }
}
