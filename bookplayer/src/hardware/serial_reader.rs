//! Serial 125 kHz RFID reader
//!
//! The reader streams one 14-byte ASCII frame per detection while a tag is in
//! the field:
//!
//! ```text
//! 0x02 | 10 hex chars (5 data bytes) | 2 hex chars (checksum) | 0x03
//! ```
//!
//! The checksum is the XOR of the five data bytes. The port is opened in raw
//! mode at the configured baud rate (8N1, no flow control), and every read
//! carries the port's own timeout so a blocked read never outlives the
//! attempt that started it.

use super::card_reader::CardReader;
use async_trait::async_trait;
use bookplayer_common::{CardId, Error, Result};
use serialport::SerialPort;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const FRAME_LEN: usize = 14;

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode one complete frame into the tag's data bytes
///
/// Returns `None` for malformed frames (wrong framing, any non-hex payload
/// byte) or checksum mismatches.
pub fn decode_frame(frame: &[u8]) -> Option<[u8; 5]> {
    if frame.len() != FRAME_LEN || frame[0] != STX || frame[FRAME_LEN - 1] != ETX {
        return None;
    }

    let mut bytes = [0u8; 6];
    for (byte, pair) in bytes.iter_mut().zip(frame[1..FRAME_LEN - 1].chunks_exact(2)) {
        *byte = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
    }

    let (data, checksum) = bytes.split_at(5);
    let computed = data.iter().fold(0u8, |acc, b| acc ^ b);
    if computed != checksum[0] {
        return None;
    }

    let mut out = [0u8; 5];
    out.copy_from_slice(data);
    Some(out)
}

/// Incremental frame assembler
///
/// Bytes outside an STX..ETX window are discarded, so the reader resyncs on
/// the next frame after line noise.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Feed bytes, returning every valid tag completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<[u8; 5]> {
        let mut tags = Vec::new();
        for &b in bytes {
            if b == STX {
                self.buf.clear();
                self.buf.push(b);
                continue;
            }
            if self.buf.is_empty() {
                continue;
            }

            self.buf.push(b);
            if b == ETX || self.buf.len() >= FRAME_LEN {
                match decode_frame(&self.buf) {
                    Some(tag) => tags.push(tag),
                    None => warn!("Discarding invalid RFID frame ({} bytes)", self.buf.len()),
                }
                self.buf.clear();
            }
        }
        tags
    }
}

/// Byte source whose reads give up after a settable timeout
trait TimedSource: Read {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl TimedSource for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Read until a valid tag arrives or `timeout` elapses
///
/// `Ok(None)` means no tag in time. An end-of-file read means the device went
/// away and is reported as an error.
fn read_tag<S: TimedSource + ?Sized>(
    source: &mut S,
    assembler: &mut FrameAssembler,
    timeout: Duration,
) -> io::Result<Option<[u8; 5]>> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; 64];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        source.set_read_timeout(remaining)?;

        match source.read(&mut chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "RFID reader closed",
                ))
            }
            Ok(n) => {
                if let Some(tag) = assembler.feed(&chunk[..n]).pop() {
                    return Ok(Some(tag));
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn open_port(path: &Path, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(path.to_string_lossy(), baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| {
            Error::HardwareTransient(format!("Cannot open RFID reader {:?}: {}", path, e))
        })?;
    info!("Opened RFID reader {:?} at {} baud", path, baud_rate);
    Ok(port)
}

/// Card reader on a serial port
///
/// The port is opened on the first read and reopened after any failure. Each
/// attempt runs on the blocking pool and is bounded by the read timeout.
pub struct SerialCardReader {
    path: PathBuf,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    assembler: FrameAssembler,
}

impl std::fmt::Debug for SerialCardReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialCardReader")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialCardReader {
    pub fn new(path: &Path, baud_rate: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            baud_rate,
            port: None,
            assembler: FrameAssembler::default(),
        }
    }
}

#[async_trait]
impl CardReader for SerialCardReader {
    async fn read_once(&mut self, timeout: Duration) -> Result<Option<CardId>> {
        let port = self.port.take();
        let mut assembler = std::mem::take(&mut self.assembler);
        let path = self.path.clone();
        let baud_rate = self.baud_rate;

        let (port, assembler, outcome) = tokio::task::spawn_blocking(move || {
            let mut port = match port {
                Some(port) => port,
                None => match open_port(&path, baud_rate, timeout) {
                    Ok(port) => port,
                    Err(e) => return (None, assembler, Err(e)),
                },
            };
            match read_tag(&mut port, &mut assembler, timeout) {
                Ok(tag) => (Some(port), assembler, Ok(tag)),
                // Drop the port; the next attempt reopens it
                Err(e) => (
                    None,
                    assembler,
                    Err(Error::HardwareTransient(format!("RFID read failed: {}", e))),
                ),
            }
        })
        .await
        .map_err(|e| Error::HardwareTransient(format!("RFID read task failed: {}", e)))?;

        self.port = port;
        self.assembler = assembler;

        let tag = outcome?;
        Ok(tag.map(|tag| {
            let id = CardId::from_uid(&tag);
            debug!("Read card {}", id);
            id
        }))
    }
}
