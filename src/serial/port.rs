use log::{error, info, trace, warn};
use regex::Regex;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialStream, StopBits,
    available_ports,
};

use crate::error::{Result, SerialLinesError};

/// serial port baud rate
pub const COMMON_BAUD_RATES: &[u32] = &[
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000,
    1500000, 2000000,
];

/// default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// default port name pattern, usb serial adapters
#[cfg(not(windows))]
pub const DEFAULT_PORT_PATTERN: &str = r"^/dev/(tty\.usb|ttyUSB|cu\.usb)";
/// default port name pattern, com ports
#[cfg(windows)]
pub const DEFAULT_PORT_PATTERN: &str = r"^COM\d+$";

/// default port used when discovery finds nothing
#[cfg(not(windows))]
pub const DEFAULT_FALLBACK_PORT: Option<&str> = None;
/// default port used when discovery finds nothing
#[cfg(windows)]
pub const DEFAULT_FALLBACK_PORT: Option<&str> = Some("COM3");

/// read buffer size of the reader task
pub const READ_BUFFER_SIZE: usize = 1024;

/// channel capacity between the port tasks and the frame loop
pub const CHANNEL_CAPACITY: usize = 100;

/// serial port settings
#[derive(Clone, Debug)]
pub struct PortSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub timeout: Duration,
    /// assert DTR after opening, some boards only transmit with it set
    pub dtr: bool,
    /// drop bytes the OS buffered before the port was opened
    pub discard_input: bool,
}

/// serial port settings implementation
impl PortSettings {
    /// serial port settings initialization
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        PortSettings {
            port_name: port_name.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(10),
            dtr: false,
            discard_input: true,
        }
    }
}

impl fmt::Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} baud {}/{}/{}",
            self.port_name, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// serial port state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// serial port is ready
    Ready,
    /// serial port is closed
    Close,
    /// serial port is lost
    Error,
}

impl State {
    /// serial port is open
    pub fn is_open(&self) -> bool {
        matches!(self, State::Ready)
    }

    /// serial port is close
    pub fn is_close(&self) -> bool {
        matches!(self, State::Close)
    }

    /// is error
    pub fn is_error(&self) -> bool {
        matches!(self, State::Error)
    }

    /// open serial port
    pub fn open(&mut self) {
        *self = State::Ready;
    }

    /// close serial port
    pub fn close(&mut self) {
        *self = State::Close;
    }

    /// set error
    pub fn error(&mut self) {
        *self = State::Error;
    }
}

/// serial port data, sent from the reader task to the frame loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortChannelData {
    /// bytes read from the port
    Read(Vec<u8>),
    /// the port failed and the reader stopped
    Error(String),
    /// the port reached end of stream
    Closed,
}

/// Returns the first candidate matching `pattern`.
pub fn select_port_name(candidates: &[String], pattern: &Regex) -> Option<String> {
    candidates.iter().find(|name| pattern.is_match(name)).cloned()
}

/// Finds the port to open.
///
/// Asks the OS for its serial ports; on Unix, when none are reported, the
/// entries of `/dev/` are searched instead. Falls back to `fallback` when
/// nothing matches `pattern`.
pub fn discover_port_name(pattern: &Regex, fallback: Option<&str>) -> Option<String> {
    #[allow(unused_mut)]
    let mut port_names: Vec<String> = match available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            info!("Error listing ports: {e}");
            Vec::new()
        }
    };

    #[cfg(unix)]
    if port_names.is_empty() {
        port_names = list_dev_entries();
    }

    select_port_name(&port_names, pattern).or_else(|| fallback.map(str::to_owned))
}

#[cfg(unix)]
fn list_dev_entries() -> Vec<String> {
    match std::fs::read_dir("/dev/") {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(e) => {
            warn!("Error listing /dev/: {e}");
            Vec::new()
        }
    }
}

/// Opens the serial port. Must be called from within a tokio runtime.
pub fn open_port(settings: &PortSettings) -> Result<SerialStream> {
    let mut stream = tokio_serial::new(settings.port_name.as_str(), settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .timeout(settings.timeout)
        .open_native_async()
        .map_err(|e| {
            error!("无法打开串口 {}: {}", settings.port_name, e);
            SerialLinesError::port_open(&settings.port_name, e.to_string())
        })?;

    if settings.discard_input {
        stream
            .clear(ClearBuffer::Input)
            .map_err(|e| SerialLinesError::serial_port(e.to_string()))?;
    }
    if settings.dtr {
        stream
            .write_data_terminal_ready(true)
            .map_err(|e| SerialLinesError::serial_port(e.to_string()))?;
    }

    info!("成功打开串口: {settings}");
    Ok(stream)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Reads the port until it fails or ends, forwarding every read.
///
/// Timeouts and interruptions are retried; any other error is forwarded as
/// [`PortChannelData::Error`] and ends the task.
pub async fn read_port<R>(mut port: R, tx: mpsc::Sender<PortChannelData>)
where
    R: AsyncRead + Unpin,
{
    info!("Read port");
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        match port.read(&mut buffer[..]).await {
            Ok(0) => {
                info!("serial port reached end of stream");
                let _ = tx.send(PortChannelData::Closed).await;
                break;
            }
            Ok(n) => {
                trace!("rx {}", hex::encode(&buffer[..n]));
                if tx.send(PortChannelData::Read(buffer[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                error!("System exception in serial read: {e}");
                let _ = tx.send(PortChannelData::Error(e.to_string())).await;
                break;
            }
        }
    }
}

/// Writes every queued buffer to the port until the queue closes or a write
/// fails.
pub async fn write_port<W>(mut port: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    info!("write port");
    while let Some(data) = rx.recv().await {
        trace!("tx {}", hex::encode(&data));
        if let Err(e) = port.write_all(&data).await {
            error!("System exception in serial write: {e}");
            break;
        }
        if let Err(e) = port.flush().await {
            error!("System exception in serial flush: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_select_first_usb_port() {
        let pattern = Regex::new(r"^/dev/(tty\.usb|ttyUSB|cu\.usb)").unwrap();
        let candidates = names(&["/dev/tty0", "/dev/ttyS0", "/dev/ttyUSB1", "/dev/ttyUSB0"]);
        assert_eq!(
            select_port_name(&candidates, &pattern),
            Some("/dev/ttyUSB1".to_string())
        );
    }

    #[test]
    fn test_select_mac_usb_port() {
        let pattern = Regex::new(r"^/dev/(tty\.usb|ttyUSB|cu\.usb)").unwrap();
        let candidates = names(&["/dev/tty.Bluetooth", "/dev/tty.usbmodem1411"]);
        assert_eq!(
            select_port_name(&candidates, &pattern),
            Some("/dev/tty.usbmodem1411".to_string())
        );
    }

    #[test]
    fn test_select_no_match() {
        let pattern = Regex::new(r"^COM\d+$").unwrap();
        assert_eq!(select_port_name(&names(&["/dev/ttyS0"]), &pattern), None);
    }

    #[test]
    fn test_discover_uses_fallback() {
        let pattern = Regex::new(r"^no-such-port-\d{12}$").unwrap();
        assert_eq!(
            discover_port_name(&pattern, Some("COM3")),
            Some("COM3".to_string())
        );
        assert_eq!(discover_port_name(&pattern, None), None);
    }

    #[test]
    fn test_state_transitions() {
        let mut state = State::Close;
        assert!(state.is_close());
        state.open();
        assert!(state.is_open());
        state.error();
        assert!(state.is_error());
    }

    #[test]
    fn test_port_settings_display() {
        let settings = PortSettings::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE);
        let text = settings.to_string();
        assert!(text.contains("/dev/ttyUSB0"));
        assert!(text.contains("9600"));
    }

    #[tokio::test]
    async fn test_read_port_forwards_chunks_then_closes() {
        let (mut device, port) = duplex(64);
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_port(port, tx));

        device.write_all(b"a\nb").await.unwrap();
        assert_eq!(rx.recv().await, Some(PortChannelData::Read(b"a\nb".to_vec())));

        drop(device);
        assert_eq!(rx.recv().await, Some(PortChannelData::Closed));
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_port_writes_queued_data() {
        let (mut device, port) = duplex(64);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let writer = tokio::spawn(write_port(port, rx));

        tx.send(b"ping\n".to_vec()).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut received = Vec::new();
        device.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping\n");
    }
}
