//! # Serial Lines
//!
//! A serial port line reader built for the Bevy game engine.
//!
//! This crate opens a serial device, polls it once per frame and republishes
//! what it receives to any system in the app as raw data, completed lines and
//! per-line values.
//!
//! ## Features
//!
//! - **Plugin Architecture**: one [`SerialLinesPlugin`](serial::SerialLinesPlugin)
//!   shares a single port with every listener through Bevy messages.
//! - **Incremental Tokenizer**: lines split correctly whatever the chunking of
//!   the byte stream, with bounded history for later draining.
//! - **Async Serial Communication**: non-blocking port I/O on a Tokio runtime.
//! - **Text Encodings**: UTF-8, Latin-1, GBK and UTF-16LE streams.
//!
//! ## Architecture
//!
//! - [`tokenizer`]: line and value tokenization, independent of Bevy
//! - [`serial`]: port I/O and the Bevy plugin
//! - [`config`]: RON configuration
//! - [`error`]: custom error types

pub mod config;
pub mod error;
pub mod serial;
pub mod tokenizer;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::SerialLinesConfig;
    pub use crate::error::*;
    pub use crate::serial::{
        SerialData, SerialLine, SerialLines, SerialLinesPlugin, SerialValues, SerialWrite,
    };
    pub use crate::tokenizer::{IngestResult, StreamLineTokenizer, TokenEvent, TokenizerSettings};
}
