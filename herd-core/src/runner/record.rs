use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::mpsc;

use super::config::Context;

/// Capacity of every record channel. Throughput is governed by step latency,
/// not queue depth, so the buffers stay small.
pub(crate) const RECORD_BUFFER: usize = 32;

/// Wall-clock Unix time in milliseconds. A pre-epoch clock reads as 0.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One step invocation by one virtual user.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub name: Arc<str>,
    /// Virtual user id.
    pub id: u64,
    /// Wall-clock milliseconds at dispatch.
    pub start: u64,
    /// Wall-clock milliseconds at completion or deadline expiry.
    pub end: u64,
    pub result: bool,
    pub context_before: Context,
    pub context_after: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// One scenario execution (walk) by one virtual user.
///
/// `start`/`end` mirror the first request's start and the last request's end;
/// `requests` is never empty.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub name: Arc<str>,
    pub id: u64,
    pub start: u64,
    pub end: u64,
    pub requests: Vec<RequestRecord>,
}

/// Consumer side of a running simulation.
///
/// Records arrive unordered across users; within one record the requests are
/// in execution order. The stream ends after every user loop has finished and
/// the simulation post-hook has run.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<ScenarioRecord>,
}

impl RecordStream {
    pub(crate) fn new(rx: mpsc::Receiver<ScenarioRecord>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<ScenarioRecord> {
        self.rx.recv().await
    }

    /// Receives until the stream closes.
    pub async fn drain(mut self) -> Vec<ScenarioRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.rx.recv().await {
            records.push(record);
        }
        records
    }

    pub fn into_inner(self) -> mpsc::Receiver<ScenarioRecord> {
        self.rx
    }
}
