//! # Serial Module
//!
//! Bevy integration: one serial connection per app, polled once per frame,
//! republished to every interested system as typed messages.
//!
//! - [`SerialData`]: every decoded chunk (`notify_data`)
//! - [`SerialLine`]: every completed line (`notify_lines`)
//! - [`SerialValues`]: the values of every completed line (`notify_values`)
//! - [`SerialWrite`]: text to send to the port
//!
//! Remembered lines (`remember_lines > 0`) are drained from the
//! [`SerialLines`] resource with [`SerialLines::drain_all`] and
//! [`SerialLines::drain_last`].

pub mod encoding;
pub mod port;
pub mod source;

use std::sync::{Arc, Mutex, PoisonError};

use bevy::app::AppExit;
use bevy::prelude::*;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use regex::Regex;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SerialLinesConfig;
use crate::error::{Result, SerialLinesError};
use crate::tokenizer::{StreamLineTokenizer, TokenEvent, TokenizerSettings};
use encoding::TextEncoding;
use port::{CHANNEL_CAPACITY, State};
use source::{ByteSource, ChannelSource, SerialPump};

/// A decoded chunk of received data.
#[derive(Message, Clone, Debug)]
pub struct SerialData {
    pub text: String,
}

/// A completed line, terminator stripped.
#[derive(Message, Clone, Debug)]
pub struct SerialLine {
    pub line: String,
    pub received_at: DateTime<Local>,
}

/// The values of a completed line.
#[derive(Message, Clone, Debug)]
pub struct SerialValues {
    pub values: Vec<String>,
}

impl SerialValues {
    /// get value of a column
    pub fn value(&self, column: usize) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// Text to write to the serial port.
#[derive(Message, Clone, Debug)]
pub struct SerialWrite {
    pub text: String,
}

impl SerialWrite {
    pub fn new(text: impl Into<String>) -> Self {
        SerialWrite { text: text.into() }
    }
}

/// Validated plugin settings.
#[derive(Resource, Clone, Debug)]
pub struct SerialLinesSettings {
    pub config: SerialLinesConfig,
    pub tokenizer: TokenizerSettings,
    pub port_pattern: Regex,
}

impl SerialLinesSettings {
    pub fn new(config: SerialLinesConfig) -> Result<Self> {
        let tokenizer = config.tokenizer_settings()?;
        let port_pattern = config.port_pattern()?;
        // checked here so a bad baud rate fails before startup
        config.port_settings("")?;
        Ok(SerialLinesSettings {
            config,
            tokenizer,
            port_pattern,
        })
    }
}

/// The serial connection shared by all listeners.
#[derive(Resource)]
pub struct SerialLines {
    port_name: Option<String>,
    encoding: TextEncoding,
    tokenizer: Arc<StreamLineTokenizer>,
    pump: Mutex<SerialPump>,
    writer: Option<mpsc::Sender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

impl SerialLines {
    /// Discovers and opens the configured port and starts its reader and
    /// writer tasks.
    pub fn open(settings: &SerialLinesSettings) -> Result<Self> {
        let config = &settings.config;
        let port_name = match &config.port_name {
            Some(name) => name.clone(),
            None => port::discover_port_name(
                &settings.port_pattern,
                config.fallback_port.as_deref(),
            )
            .ok_or_else(|| SerialLinesError::port_not_found(&config.port_pattern))?,
        };
        let port_settings = config.port_settings(&port_name)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("serial-lines")
            .enable_all()
            .build()?;

        let stream = {
            let _guard = runtime.enter();
            port::open_port(&port_settings)?
        };
        let (reader, writer) = tokio::io::split(stream);
        let (read_tx, read_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let tasks = vec![
            runtime.spawn(port::read_port(reader, read_tx)),
            runtime.spawn(port::write_port(writer, write_rx)),
        ];

        let mut lines = Self::from_source(settings, Box::new(ChannelSource::new(read_rx)))?
            .with_writer(write_tx);
        lines.port_name = Some(port_name);
        lines.tasks = tasks;
        lines.runtime = Some(runtime);
        Ok(lines)
    }

    /// Connection over an arbitrary byte source, without a writer.
    pub fn from_source(settings: &SerialLinesSettings, source: Box<dyn ByteSource>) -> Result<Self> {
        let tokenizer = Arc::new(StreamLineTokenizer::new(settings.tokenizer)?);
        let encoding = settings.config.encoding;
        let pump = SerialPump::new(
            source,
            encoding,
            Arc::clone(&tokenizer),
            settings.config.detect_lines(),
        );
        Ok(SerialLines {
            port_name: None,
            encoding,
            tokenizer,
            pump: Mutex::new(pump),
            writer: None,
            tasks: Vec::new(),
            runtime: None,
        })
    }

    /// Connection that never receives anything.
    pub fn disconnected(settings: &SerialLinesSettings) -> Result<Self> {
        let tokenizer = Arc::new(StreamLineTokenizer::new(settings.tokenizer)?);
        let pump = SerialPump::disconnected(settings.config.encoding, Arc::clone(&tokenizer));
        Ok(SerialLines {
            port_name: None,
            encoding: settings.config.encoding,
            tokenizer,
            pump: Mutex::new(pump),
            writer: None,
            tasks: Vec::new(),
            runtime: None,
        })
    }

    /// attach the queue feeding the port writer
    #[must_use]
    pub fn with_writer(mut self, writer: mpsc::Sender<Vec<u8>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// get port name
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// get state
    pub fn state(&self) -> State {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner).state()
    }

    /// is serial port open
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// get tokenizer
    pub fn tokenizer(&self) -> &StreamLineTokenizer {
        &self.tokenizer
    }

    /// Returns all remembered lines, clearing them unless `keep` is set.
    pub fn drain_all(&self, keep: bool) -> Vec<String> {
        self.tokenizer.drain_all(keep)
    }

    /// Returns the last remembered line or an empty string, clearing all
    /// remembered lines unless `keep` is set.
    pub fn drain_last(&self, keep: bool) -> String {
        self.tokenizer.drain_last(keep)
    }

    /// get number of remembered lines
    pub fn lines_count(&self) -> usize {
        self.tokenizer.lines_count()
    }

    /// Queues text for the port writer without blocking.
    pub fn write(&self, text: &str) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Err(SerialLinesError::port_write("serial port is not open"));
        };
        writer
            .try_send(self.encoding.encode(text))
            .map_err(|e| SerialLinesError::channel(e.to_string()))
    }

    fn poll(&mut self) -> source::Received {
        self.pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .poll()
    }

    /// Stops the port tasks and releases the port.
    pub fn close(&mut self) {
        self.pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        self.writer = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            info!("closing serial port {}", self.port_name.as_deref().unwrap_or_default());
            runtime.shutdown_background();
        }
    }
}

impl Drop for SerialLines {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serial lines plugin.
pub struct SerialLinesPlugin {
    settings: SerialLinesSettings,
}

impl SerialLinesPlugin {
    /// Validates the configuration.
    pub fn new(config: SerialLinesConfig) -> Result<Self> {
        Ok(SerialLinesPlugin {
            settings: SerialLinesSettings::new(config)?,
        })
    }
}

impl Plugin for SerialLinesPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<SerialData>()
            .add_message::<SerialLine>()
            .add_message::<SerialValues>()
            .add_message::<SerialWrite>()
            .insert_resource(self.settings.clone())
            .add_systems(Startup, open_serial)
            .add_systems(Update, (poll_serial, write_serial).chain())
            .add_systems(Last, close_serial_on_exit);
    }
}

/// System: open the serial port unless a connection was installed already.
pub fn open_serial(
    mut commands: Commands,
    settings: Res<SerialLinesSettings>,
    existing: Option<Res<SerialLines>>,
) {
    if existing.is_some() {
        return;
    }
    let lines = match SerialLines::open(&settings) {
        Ok(lines) => lines,
        Err(e) => {
            error!("Error: {e}");
            match SerialLines::disconnected(&settings) {
                Ok(lines) => lines,
                Err(e) => {
                    error!("Error: {e}");
                    return;
                }
            }
        }
    };
    commands.insert_resource(lines);
}

/// System: poll the port and publish what arrived.
pub fn poll_serial(
    serial: Option<ResMut<SerialLines>>,
    settings: Res<SerialLinesSettings>,
    mut data_writer: MessageWriter<SerialData>,
    mut line_writer: MessageWriter<SerialLine>,
    mut values_writer: MessageWriter<SerialValues>,
) {
    let Some(mut serial) = serial else {
        return;
    };
    let received = serial.poll();
    if received.is_empty() {
        return;
    }

    let config = &settings.config;
    if config.notify_data {
        data_writer.write_batch(received.data.into_iter().map(|text| SerialData { text }));
    }

    let received_at = Local::now();
    for event in received.events {
        match event {
            TokenEvent::Line(line) if config.notify_lines => {
                line_writer.write(SerialLine { line, received_at });
            }
            TokenEvent::Values(values) if config.notify_values => {
                values_writer.write(SerialValues { values });
            }
            _ => {}
        }
    }

    if received.evicted > 0 {
        warn!(
            "Serial removing {} lines from lines buffer ({} so far). Either consume lines before they are lost or set remember_lines to 0.",
            received.evicted,
            serial.tokenizer().evicted_total()
        );
    }
}

/// System: forward write requests to the port.
pub fn write_serial(serial: Option<Res<SerialLines>>, mut requests: MessageReader<SerialWrite>) {
    let Some(serial) = serial else {
        requests.clear();
        return;
    };
    for request in requests.read() {
        if let Err(e) = serial.write(&request.text) {
            error!("Failed to write {:?}: {e}", request.text);
        }
    }
}

/// System: close the port when the app exits.
pub fn close_serial_on_exit(serial: Option<ResMut<SerialLines>>, mut exit: MessageReader<AppExit>) {
    if exit.is_empty() {
        return;
    }
    exit.clear();
    if let Some(mut serial) = serial {
        serial.close();
    }
}
