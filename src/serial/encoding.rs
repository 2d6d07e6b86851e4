//! # Encoding Module
//!
//! This module converts between the raw bytes of a serial port and text.
//! Received bytes are decoded with a streaming decoder so a multi-byte
//! character split across two reads is reassembled instead of being replaced.

use std::fmt;

use encoding_rs::{CoderResult, Decoder, Encoding, GBK, UTF_8, UTF_16LE, WINDOWS_1252};
use log::debug;
use serde::{Deserialize, Serialize};

/// text encoding of the serial stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// utf8 text
    #[default]
    Utf8,
    /// single byte text (windows-1252, a superset of ascii)
    Latin1,
    /// gbk text
    Gbk,
    /// utf16 little endian text
    Utf16Le,
}

impl TextEncoding {
    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Latin1 => WINDOWS_1252,
            TextEncoding::Gbk => GBK,
            TextEncoding::Utf16Le => UTF_16LE,
        }
    }

    /// Creates a streaming decoder for this encoding.
    pub fn decoder(self) -> ChunkDecoder {
        ChunkDecoder {
            decoder: self.encoding().new_decoder_without_bom_handling(),
            encoding: self,
        }
    }

    /// Encodes text to bytes for writing to the port.
    ///
    /// # Examples
    ///
    /// ```
    /// use serial_lines::serial::encoding::TextEncoding;
    ///
    /// assert_eq!(TextEncoding::Utf8.encode("Hello"), vec![72, 101, 108, 108, 111]);
    /// assert_eq!(TextEncoding::Utf16Le.encode("A"), vec![0x41, 0x00]);
    /// ```
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            // encoding_rs only encodes to utf8 compatible targets
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            _ => {
                let (encoded, _, unmappable) = self.encoding().encode(text);
                if unmappable {
                    debug!("{self} cannot represent every character of {text:?}");
                }
                encoded.into_owned()
            }
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "UTF-8"),
            TextEncoding::Latin1 => write!(f, "Latin-1"),
            TextEncoding::Gbk => write!(f, "GBK"),
            TextEncoding::Utf16Le => write!(f, "UTF-16LE"),
        }
    }
}

/// Streaming byte to text decoder.
pub struct ChunkDecoder {
    decoder: Decoder,
    encoding: TextEncoding,
}

impl ChunkDecoder {
    /// Decodes the next chunk of the stream.
    ///
    /// Bytes of an incomplete trailing character are held back until the
    /// following chunk. Malformed sequences become U+FFFD.
    ///
    /// # Examples
    ///
    /// ```
    /// use serial_lines::serial::encoding::TextEncoding;
    ///
    /// let mut decoder = TextEncoding::Utf8.decoder();
    /// let bytes = "é".as_bytes();
    /// assert_eq!(decoder.decode(&bytes[..1]), "");
    /// assert_eq!(decoder.decode(&bytes[1..]), "é");
    /// ```
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut text = String::new();
        let mut remaining = bytes;
        let mut replaced = false;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(remaining.len())
                .unwrap_or(remaining.len() * 3 + 16);
            text.reserve(needed);
            let (result, read, had_errors) =
                self.decoder.decode_to_string(remaining, &mut text, false);
            replaced |= had_errors;
            remaining = &remaining[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        if replaced {
            debug!(
                "malformed {} input replaced: {}",
                self.encoding,
                hex::encode(bytes)
            );
        }
        text
    }
}
