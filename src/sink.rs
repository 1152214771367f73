//! Consumers for encoded stills.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{dispatch::Consumer, lock};

/// Writes `<dir>/<callee>-<NNN>.jpeg`, numbering each session separately.
pub struct FileSink {
    dir: PathBuf,
    counters: Mutex<HashMap<String, u32>>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files written for `callee_id`.
    pub fn count(&self, callee_id: &str) -> u32 {
        lock(&self.counters).get(callee_id).copied().unwrap_or(0)
    }
}

impl Consumer for FileSink {
    fn on_consume(&self, callee_id: &str, data: Bytes) {
        // the counter lock also orders writes within a session
        let mut counters = lock(&self.counters);
        let count = counters.entry(callee_id.to_string()).or_insert(0);
        let path = self
            .dir
            .join(format!("{}-{:03}.jpeg", sanitize(callee_id), *count));

        match std::fs::write(&path, &data) {
            Ok(()) => {
                log::info!("{} bytes written to '{}'", data.len(), path.display());
                *count += 1;
            }
            Err(e) => {
                log::error!("write '{}' error: {}", path.display(), e);
            }
        }
    }
}

fn sanitize(callee_id: &str) -> String {
    let name: String = callee_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.as_str() {
        "" => "unknown".to_string(),
        "." | ".." => name.replace('.', "_"),
        _ => name,
    }
}

/// Forwards stills into a bounded channel for async consumers. Stills are
/// dropped while the channel is full.
pub struct ChannelSink {
    tx: mpsc::Sender<(String, Bytes)>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, ReceiverStream<(String, Bytes)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }
}

impl Consumer for ChannelSink {
    fn on_consume(&self, callee_id: &str, data: Bytes) {
        match self.tx.try_send((callee_id.to_string(), data)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full((callee_id, data))) => {
                log::debug!("channel full, dropped {} bytes for {}", data.len(), callee_id);
            }
            Err(mpsc::error::TrySendError::Closed((callee_id, _))) => {
                log::debug!("channel closed, dropped still for {}", callee_id);
            }
        }
    }
}
