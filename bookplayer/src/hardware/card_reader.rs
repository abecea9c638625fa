//! Card reader interface and in-memory substitute

use async_trait::async_trait;
use bookplayer_common::{CardId, Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A device that reports the card currently on the reader
#[async_trait]
pub trait CardReader: Send {
    /// Attempt one read bounded by `timeout`
    ///
    /// `Ok(None)` means no card was seen within the timeout.
    async fn read_once(&mut self, timeout: Duration) -> Result<Option<CardId>>;
}

/// Scripted outcome of one [`MemoryCardReader`] read
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Card(CardId),
    Empty,
    Fault(String),
}

/// Card reader replaying a script
///
/// Once the script is exhausted every read sleeps for the timeout and reports
/// an empty reader, like real hardware with nothing on it. The script handle
/// can be cloned to append reads while the producer is running.
#[derive(Debug, Clone, Default)]
pub struct MemoryCardReader {
    script: Arc<Mutex<VecDeque<ScriptedRead>>>,
    reads: Arc<Mutex<usize>>,
}

impl MemoryCardReader {
    pub fn new(script: impl IntoIterator<Item = ScriptedRead>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            reads: Arc::new(Mutex::new(0)),
        }
    }

    pub fn push(&self, read: ScriptedRead) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(read);
    }

    /// Number of read attempts made so far
    pub fn read_count(&self) -> usize {
        *self.reads.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CardReader for MemoryCardReader {
    async fn read_once(&mut self, timeout: Duration) -> Result<Option<CardId>> {
        *self.reads.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(ScriptedRead::Card(id)) => Ok(Some(id)),
            Some(ScriptedRead::Empty) => Ok(None),
            Some(ScriptedRead::Fault(msg)) => Err(Error::HardwareTransient(msg)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}
