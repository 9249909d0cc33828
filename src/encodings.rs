//! The closed set of payload encodings carried on the wire by name.
//!
//! The protocol never converts payload bytes itself; the encoding tag is
//! transported so the presentation layer can decode. Names are matched
//! case-insensitively against a fixed alias table; anything else is
//! rejected at the codec boundary.

use std::fmt;

/// A payload encoding known to the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf7,
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32,
    Latin1,
}

impl Encoding {
    /// The canonical name used when serializing a PDU.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Ascii => "us-ascii",
            Encoding::Utf7 => "utf-7",
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16",
            Encoding::Utf16Be => "utf-16be",
            Encoding::Utf32 => "utf-32",
            Encoding::Latin1 => "iso-8859-1",
        }
    }

    /// Looks up an encoding by textual name, case-insensitively.
    /// Returns `None` for anything outside the registry.
    pub fn from_name(name: &str) -> Option<Encoding> {
        match name.to_ascii_lowercase().as_str() {
            "us-ascii" | "ascii" => Some(Encoding::Ascii),
            "utf-7" => Some(Encoding::Utf7),
            "utf-8" => Some(Encoding::Utf8),
            "utf-16" | "utf-16le" => Some(Encoding::Utf16Le),
            "utf-16be" => Some(Encoding::Utf16Be),
            "utf-32" => Some(Encoding::Utf32),
            "cp819" | "csisolatin1" | "ibm819" | "iso-8859-1" | "iso-ir-100" | "l1" | "latin1" => {
                Some(Encoding::Latin1)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
