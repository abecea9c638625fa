//! Music Player Daemon backend
//!
//! Speaks the MPD text protocol over TCP:
//! - the server greets with `OK MPD <version>`
//! - each command is one line; the reply is `key: value` lines terminated by
//!   `OK`, or a single `ACK [code@index] {command} message` line
//!
//! Every command is bounded by the configured timeout. An I/O failure or
//! timeout drops the connection; the next command reconnects.

use super::backend::{PlaybackBackend, PlaybackStatus};
use async_trait::async_trait;
use bookplayer_common::{Error, PlayerState, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// MPD error code for a missing song, directory or file
const ACK_ERROR_NO_EXIST: u32 = 50;

type Pairs = Vec<(String, String)>;

/// Parsed `ACK` reply
#[derive(Debug, Clone, PartialEq)]
struct Ack {
    code: u32,
    message: String,
}

impl Ack {
    fn parse(line: &str) -> Self {
        let code = line
            .strip_prefix("ACK [")
            .and_then(|rest| rest.split_once('@'))
            .and_then(|(code, _)| code.parse().ok())
            .unwrap_or(0);
        let message = line
            .split_once("} ")
            .map(|(_, msg)| msg.to_string())
            .unwrap_or_else(|| line.to_string());
        Self { code, message }
    }

    fn into_error(self, command: &str) -> Error {
        if self.code == ACK_ERROR_NO_EXIST {
            Error::UnresolvedReference(format!("MPD {}: {}", command, self.message))
        } else {
            Error::Protocol(format!("MPD {} [{}]: {}", command, self.code, self.message))
        }
    }
}

enum Reply {
    Ok(Pairs),
    Ack(Ack),
}

/// Quote a command argument
pub fn quote_arg(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Sort key of an audio file by its part number
///
/// `Chapter 12_3.mp3` sorts as part 12, sub-part 3. Files without a part
/// number sort after all numbered files.
pub fn part_sort_key(file: &str) -> (u64, u64) {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"(.+ )?(\d+)(_(\d+))?\.mp3").ok());

    pattern
        .as_ref()
        .and_then(|re| re.captures(file))
        .and_then(|caps| {
            let part = caps.get(2)?.as_str().parse().ok()?;
            let sub = match caps.get(4) {
                Some(m) => m.as_str().parse().ok()?,
                None => 0,
            };
            Some((part, sub))
        })
        .unwrap_or((u64::MAX, u64::MAX))
}

/// Order audio files for the playback queue
pub fn sort_parts(files: &mut [String]) {
    files.sort_by(|a, b| part_sort_key(a).cmp(&part_sort_key(b)).then_with(|| a.cmp(b)));
}

fn field<'a>(pairs: &'a Pairs, key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Build a [`PlaybackStatus`] from a `status` reply
fn parse_status(pairs: &Pairs) -> Result<PlaybackStatus> {
    let state = match field(pairs, "state") {
        Some("play") => PlayerState::Playing,
        Some("pause") => PlayerState::Paused,
        Some("stop") => PlayerState::Stopped,
        other => {
            return Err(Error::Protocol(format!("Unexpected MPD state: {:?}", other)));
        }
    };

    // Older servers only report "time: elapsed:total"
    let legacy_time = field(pairs, "time").and_then(|t| t.split_once(':'));

    let position_secs = field(pairs, "elapsed")
        .and_then(|v| v.parse::<f64>().ok())
        .or_else(|| legacy_time.and_then(|(e, _)| e.parse().ok()))
        .unwrap_or(0.0);
    let duration_secs = field(pairs, "duration")
        .and_then(|v| v.parse::<f64>().ok())
        .or_else(|| legacy_time.and_then(|(_, t)| t.parse().ok()));

    Ok(PlaybackStatus {
        state,
        position_secs,
        track: field(pairs, "song").and_then(|v| v.parse().ok()),
        track_count: field(pairs, "playlistlength")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        duration_secs,
        // -1 when the server has no mixer
        volume: field(pairs, "volume").and_then(|v| v.parse::<u8>().ok()),
    })
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        let mut reader = BufReader::new(read);

        let mut greeting = String::new();
        reader.read_line(&mut greeting).await?;
        if !greeting.starts_with("OK MPD ") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected greeting {:?}", greeting.trim()),
            ));
        }
        info!("Connected to {} ({})", addr, greeting.trim());

        Ok(Self { reader, writer })
    }

    async fn exchange(&mut self, line: &str) -> std::io::Result<Reply> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let mut pairs = Vec::new();
        loop {
            let mut buf = String::new();
            if self.reader.read_line(&mut buf).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                ));
            }

            let text = buf.trim_end_matches(&['\r', '\n'][..]);
            if text == "OK" {
                return Ok(Reply::Ok(pairs));
            }
            if text.starts_with("ACK ") {
                return Ok(Reply::Ack(Ack::parse(text)));
            }
            if let Some((key, value)) = text.split_once(": ") {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
}

/// [`PlaybackBackend`] talking to a Music Player Daemon
pub struct MpdBackend {
    addr: String,
    command_timeout: Duration,
    conn: Option<Connection>,
}

impl std::fmt::Debug for MpdBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdBackend")
            .field("addr", &self.addr)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl MpdBackend {
    /// Create a backend; the connection is opened by the first command
    pub fn new(host: &str, port: u16, command_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            command_timeout,
            conn: None,
        }
    }

    /// Open the connection now and verify the greeting
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let conn = timeout(self.command_timeout, Connection::open(&self.addr))
                .await
                .map_err(|_| {
                    Error::HardwareTransient(format!("Connecting to MPD at {} timed out", self.addr))
                })?
                .map_err(|e| {
                    Error::HardwareTransient(format!("Cannot connect to MPD at {}: {}", self.addr, e))
                })?;
            self.conn = Some(conn);
        }
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<Pairs> {
        let verb = line.split_whitespace().next().unwrap_or(line).to_string();
        match self.request(line).await? {
            Reply::Ok(pairs) => Ok(pairs),
            Reply::Ack(ack) => Err(ack.into_error(&verb)),
        }
    }

    async fn request(&mut self, line: &str) -> Result<Reply> {
        self.connect().await?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::HardwareTransient("MPD not connected".to_string()))?;

        debug!("MPD > {}", line);
        match timeout(self.command_timeout, conn.exchange(line)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                self.conn = None;
                Err(Error::HardwareTransient(format!("MPD connection lost: {}", e)))
            }
            Err(_) => {
                self.conn = None;
                Err(Error::HardwareTransient(format!("MPD command timed out: {}", line)))
            }
        }
    }
}

#[async_trait]
impl PlaybackBackend for MpdBackend {
    async fn update_library(&mut self) -> Result<()> {
        let pairs = self.command("update").await?;
        match field(&pairs, "updating_db") {
            Some(job) => info!("MPD library update started (job {})", job),
            None => info!("MPD library update requested"),
        }
        Ok(())
    }

    async fn load(&mut self, path: &str) -> Result<u32> {
        let listing = self.command(&format!("listall {}", quote_arg(path))).await?;
        let mut files: Vec<String> = listing
            .into_iter()
            .filter(|(k, _)| k == "file")
            .map(|(_, v)| v)
            .collect();
        if files.is_empty() {
            return Err(Error::UnresolvedReference(format!(
                "No playable tracks under {}",
                path
            )));
        }
        sort_parts(&mut files);

        self.command("clear").await?;
        for file in &files {
            self.command(&format!("add {}", quote_arg(file))).await?;
        }
        info!("Queued {} tracks from {}", files.len(), path);

        Ok(files.len() as u32)
    }

    async fn play(&mut self) -> Result<()> {
        self.command("play").await.map(|_| ())
    }

    async fn pause(&mut self) -> Result<()> {
        self.command("pause 1").await.map(|_| ())
    }

    async fn resume(&mut self) -> Result<()> {
        self.command("pause 0").await.map(|_| ())
    }

    async fn stop(&mut self) -> Result<()> {
        self.command("stop").await.map(|_| ())
    }

    async fn seek(&mut self, track: u32, position_secs: f64) -> Result<()> {
        self.command(&format!("seek {} {:.3}", track, position_secs.max(0.0)))
            .await
            .map(|_| ())
    }

    async fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.command(&format!("setvol {}", volume.min(100)))
            .await
            .map(|_| ())
    }

    async fn track_duration(&mut self, track: u32) -> Result<Option<f64>> {
        let line = format!("playlistinfo {}", track);
        match self.request(&line).await? {
            Reply::Ok(pairs) => Ok(field(&pairs, "duration")
                .and_then(|v| v.parse::<f64>().ok())
                .or_else(|| field(&pairs, "Time").and_then(|v| v.parse::<f64>().ok()))),
            Reply::Ack(ack) => {
                debug!("No duration for track {}: {}", track, ack.message);
                Ok(None)
            }
        }
    }

    async fn status(&mut self) -> Result<PlaybackStatus> {
        let pairs = self.command("status").await?;
        parse_status(&pairs)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.writer.write_all(b"close\n").await {
                warn!("Error closing MPD connection: {}", e);
            }
        }
        Ok(())
    }
}
