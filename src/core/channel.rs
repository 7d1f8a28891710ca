//! Physical channel layer
//!
//! A [`Channel`] is a line-oriented, exclusively-owned handle to the
//! device: newline-terminated text out, one text line in per read.
//! The shipped implementation wraps a blocking serial port driven with
//! a short read timeout; tests substitute scripted channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How long a single blocking serial read may stall the async caller.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Channel error types.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Opening the port failed.
    #[error("failed to open channel: {0}")]
    OpenFailed(String),

    /// The named port does not exist.
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// Insufficient permissions for the port.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation attempted on a closed channel.
    #[error("channel not open")]
    NotOpen,

    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Line-oriented channel to the device.
///
/// Single-owner discipline: exactly one task holds the channel and is
/// the only one permitted to read or write it.
#[async_trait]
pub trait Channel: Send {
    /// Open the underlying port.
    async fn open(&mut self) -> Result<(), ChannelError>;

    /// Close the underlying port. Idempotent.
    async fn close(&mut self);

    /// Check whether the channel is open.
    fn is_open(&self) -> bool;

    /// Write one command followed by a newline.
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;

    /// Read one line within `timeout`.
    ///
    /// Returns `Ok(None)` when no complete line arrived in the window.
    /// Trailing CR/LF is stripped.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ChannelError>;

    /// Discard any buffered input.
    fn clear_input(&mut self);

    /// Human-readable description of the endpoint.
    fn connection_info(&self) -> String;
}

/// Factory producing fresh channels for each monitor connection cycle.
pub trait ChannelFactory: Send + Sync {
    /// Create an unopened channel.
    fn create(&self) -> Box<dyn Channel>;
}

/// Serial port parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial channel configuration.
///
/// Passed explicitly into the monitor at construction; there are no
/// process-wide port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialChannelConfig {
    /// Port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// Parity.
    pub parity: SerialParity,
}

impl SerialChannelConfig {
    /// Create a configuration with 8N1 framing.
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        }
    }

    /// Set data bits.
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits.
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity.
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }
}

impl Default for SerialChannelConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115_200)
    }
}

impl ChannelFactory for SerialChannelConfig {
    fn create(&self) -> Box<dyn Channel> {
        Box::new(SerialChannel::new(self.clone()))
    }
}

/// Serial port channel.
pub struct SerialChannel {
    config: SerialChannelConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
    read_buf: Vec<u8>,
}

impl SerialChannel {
    /// Create an unopened serial channel.
    pub fn new(config: SerialChannelConfig) -> Self {
        Self {
            config,
            port: None,
            read_buf: Vec::with_capacity(256),
        }
    }

    /// Take the first complete line out of the read buffer, if any.
    fn take_buffered_line(&mut self) -> Option<String> {
        let end = self.read_buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.read_buf.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Channel for SerialChannel {
    async fn open(&mut self) -> Result<(), ChannelError> {
        let data_bits = match self.config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match self.config.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let parity = match self.config.parity {
            SerialParity::Odd => serialport::Parity::Odd,
            SerialParity::Even => serialport::Parity::Even,
            SerialParity::None => serialport::Parity::None,
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    ChannelError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    ChannelError::PermissionDenied(self.config.port.clone())
                }
                _ => ChannelError::OpenFailed(e.to_string()),
            })?;

        self.port = Some(port);
        self.read_buf.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.port = None;
        self.read_buf.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let port = self.port.as_mut().ok_or(ChannelError::NotOpen)?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ChannelError> {
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            {
                let port = self.port.as_mut().ok_or(ChannelError::NotOpen)?;
                match port.read(&mut chunk) {
                    Ok(0) => {}
                    Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(ChannelError::Io(e)),
                }
            }
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            // Yield so the blocking read slices cooperate with the runtime.
            tokio::task::yield_now().await;
        }
    }

    fn clear_input(&mut self) {
        self.read_buf.clear();
        if let Some(port) = self.port.as_mut() {
            let _ = port.clear(serialport::ClearBuffer::Input);
        }
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = SerialChannelConfig::new("/dev/ttyACM1", 9600)
            .data_bits(7)
            .stop_bits(2)
            .parity(SerialParity::Even);
        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, 7);
        assert_eq!(config.stop_bits, 2);
        assert_eq!(config.parity, SerialParity::Even);
    }

    #[test]
    fn buffered_line_extraction() {
        let mut channel = SerialChannel::new(SerialChannelConfig::default());
        channel.read_buf.extend_from_slice(b"[time_tick+ok]\r\npartial");
        assert_eq!(
            channel.take_buffered_line().as_deref(),
            Some("[time_tick+ok]")
        );
        assert_eq!(channel.take_buffered_line(), None);
        assert_eq!(channel.read_buf, b"partial");
    }

    #[tokio::test]
    async fn closed_channel_rejects_writes() {
        let mut channel = SerialChannel::new(SerialChannelConfig::default());
        assert!(matches!(
            channel.write_line("time_tick").await,
            Err(ChannelError::NotOpen)
        ));
    }
}
