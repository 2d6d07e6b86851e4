//! # Source Module
//!
//! The byte source is the collaborator that owns the transport. The frame
//! loop polls it once per frame through [`SerialPump`], which decodes every
//! available chunk and feeds it to the shared tokenizer.

use std::sync::Arc;

use log::{error, info};
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::encoding::{ChunkDecoder, TextEncoding};
use super::port::{PortChannelData, State};
use crate::error::{Result, SerialLinesError};
use crate::tokenizer::{StreamLineTokenizer, TokenEvent};

/// Non-blocking supplier of received bytes, in arrival order.
#[cfg_attr(test, automock)]
pub trait ByteSource: Send {
    /// Returns the next chunk, `Ok(None)` when nothing is available right
    /// now, or an error once the source is permanently gone.
    fn poll_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// [`ByteSource`] fed by the port reader task.
pub struct ChannelSource {
    rx: mpsc::Receiver<PortChannelData>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<PortChannelData>) -> Self {
        ChannelSource { rx }
    }
}

impl ByteSource for ChannelSource {
    fn poll_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(PortChannelData::Read(bytes)) => Ok(Some(bytes)),
            Ok(PortChannelData::Error(e)) => Err(SerialLinesError::port_read(e)),
            Ok(PortChannelData::Closed) => Err(SerialLinesError::port_read("end of stream")),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SerialLinesError::channel("reader task stopped")),
        }
    }
}

/// Everything received during one poll.
#[derive(Clone, Debug, Default)]
pub struct Received {
    /// decoded chunks, as they arrived
    pub data: Vec<String>,
    /// line and value events, in completion order
    pub events: Vec<TokenEvent>,
    /// remembered lines evicted while ingesting
    pub evicted: usize,
}

impl Received {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Moves bytes from a [`ByteSource`] through the decoder into the tokenizer.
pub struct SerialPump {
    source: Option<Box<dyn ByteSource>>,
    decoder: ChunkDecoder,
    tokenizer: Arc<StreamLineTokenizer>,
    detect_lines: bool,
    state: State,
}

impl SerialPump {
    /// pump initialization
    pub fn new(
        source: Box<dyn ByteSource>,
        encoding: TextEncoding,
        tokenizer: Arc<StreamLineTokenizer>,
        detect_lines: bool,
    ) -> Self {
        SerialPump {
            source: Some(source),
            decoder: encoding.decoder(),
            tokenizer,
            detect_lines,
            state: State::Ready,
        }
    }

    /// pump without a source, used when no port could be opened
    pub fn disconnected(encoding: TextEncoding, tokenizer: Arc<StreamLineTokenizer>) -> Self {
        SerialPump {
            source: None,
            decoder: encoding.decoder(),
            tokenizer,
            detect_lines: false,
            state: State::Close,
        }
    }

    /// get state
    pub fn state(&self) -> State {
        self.state
    }

    /// Drains every chunk the source has available.
    ///
    /// A failing source is logged and dropped; the pump then reports
    /// [`State::Error`] and stays idle.
    pub fn poll(&mut self) -> Received {
        let mut received = Received::default();
        let Some(source) = self.source.as_mut() else {
            return received;
        };

        let mut lost = false;
        loop {
            match source.poll_chunk() {
                Ok(Some(bytes)) => {
                    let text = self.decoder.decode(&bytes);
                    if text.is_empty() {
                        continue;
                    }
                    if self.detect_lines {
                        let result = self.tokenizer.ingest(&text);
                        received.events.extend(result.events);
                        received.evicted += result.evicted;
                    }
                    received.data.push(text);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Serial source lost: {e}");
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.source = None;
            self.state.error();
        }
        received
    }

    /// Drops the source.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            info!("closing serial source");
        }
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenizerSettings;
    use mockall::Sequence;

    fn tokenizer(settings: TokenizerSettings) -> Arc<StreamLineTokenizer> {
        Arc::new(StreamLineTokenizer::new(settings).unwrap())
    }

    fn mock_source(chunks: Vec<Result<Option<Vec<u8>>>>) -> MockByteSource {
        let mut source = MockByteSource::new();
        let mut seq = Sequence::new();
        for chunk in chunks {
            source
                .expect_poll_chunk()
                .times(1)
                .in_sequence(&mut seq)
                .return_once(move || chunk);
        }
        source
    }

    #[test]
    fn test_poll_drains_all_available_chunks() {
        let source = mock_source(vec![
            Ok(Some(b"12\t3".to_vec())),
            Ok(Some(b"4\n5".to_vec())),
            Ok(None),
        ]);
        let tokenizer = tokenizer(TokenizerSettings::new().split_values('\t'));
        let mut pump = SerialPump::new(
            Box::new(source),
            TextEncoding::Utf8,
            Arc::clone(&tokenizer),
            true,
        );

        let received = pump.poll();
        assert_eq!(received.data, vec!["12\t3", "4\n5"]);
        assert_eq!(
            received.events,
            vec![
                TokenEvent::Line("12\t34".to_string()),
                TokenEvent::Values(vec!["12".to_string(), "34".to_string()]),
            ]
        );
        assert_eq!(tokenizer.pending_len(), 1);
        assert!(pump.state().is_open());
    }

    #[test]
    fn test_poll_without_line_detection_skips_tokenizer() {
        let source = mock_source(vec![Ok(Some(b"raw\n".to_vec())), Ok(None)]);
        let tokenizer = tokenizer(TokenizerSettings::new());
        let mut pump = SerialPump::new(
            Box::new(source),
            TextEncoding::Utf8,
            Arc::clone(&tokenizer),
            false,
        );

        let received = pump.poll();
        assert_eq!(received.data, vec!["raw\n"]);
        assert!(received.events.is_empty());
        assert_eq!(tokenizer.pending_len(), 0);
    }

    #[test]
    fn test_poll_keeps_data_received_before_source_loss() {
        let source = mock_source(vec![
            Ok(Some(b"last\n".to_vec())),
            Err(SerialLinesError::port_read("device removed")),
        ]);
        let mut pump = SerialPump::new(
            Box::new(source),
            TextEncoding::Utf8,
            tokenizer(TokenizerSettings::new()),
            true,
        );

        let received = pump.poll();
        assert_eq!(received.events, vec![TokenEvent::Line("last".to_string())]);
        assert!(pump.state().is_error());

        // the lost source is never polled again
        assert!(pump.poll().is_empty());
    }

    #[test]
    fn test_poll_holds_back_split_character() {
        let bytes = "é\n".as_bytes().to_vec();
        let source = mock_source(vec![
            Ok(Some(bytes[..1].to_vec())),
            Ok(Some(bytes[1..].to_vec())),
            Ok(None),
        ]);
        let mut pump = SerialPump::new(
            Box::new(source),
            TextEncoding::Utf8,
            tokenizer(TokenizerSettings::new()),
            true,
        );

        let received = pump.poll();
        assert_eq!(received.data, vec!["é\n"]);
        assert_eq!(received.events, vec![TokenEvent::Line("é".to_string())]);
    }

    #[test]
    fn test_channel_source() {
        let (tx, rx) = mpsc::channel(4);
        let mut source = ChannelSource::new(rx);
        assert!(matches!(source.poll_chunk(), Ok(None)));

        tx.try_send(PortChannelData::Read(b"ok".to_vec())).unwrap();
        assert_eq!(source.poll_chunk().unwrap(), Some(b"ok".to_vec()));

        tx.try_send(PortChannelData::Error("broken pipe".into())).unwrap();
        assert!(matches!(source.poll_chunk(), Err(SerialLinesError::PortRead(_))));

        drop(tx);
        assert!(matches!(source.poll_chunk(), Err(SerialLinesError::Channel(_))));
    }

    #[test]
    fn test_disconnected_pump_is_idle() {
        let mut pump =
            SerialPump::disconnected(TextEncoding::Utf8, tokenizer(TokenizerSettings::new()));
        assert!(pump.poll().is_empty());
        assert!(pump.state().is_close());
    }
}
