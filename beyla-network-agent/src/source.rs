//! Flow batch producers feeding the exporter channel

use anyhow::{Context, Result};
use async_trait::async_trait;
use beyla_network_common::FlowRecord;
use serde::Deserialize;
use std::io::BufRead;
use std::thread;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lines buffered between the reader thread and the async side
const LINE_BUFFER: usize = 256;

/// Anything that yields batches of flow records
#[async_trait]
pub trait FlowSource: Send {
    /// Next batch, or `None` once the source is exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<FlowRecord>>>;

    fn name(&self) -> &str;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Line {
    Batch(Vec<FlowRecord>),
    Single(FlowRecord),
}

/// Parses one NDJSON line: an array is a batch, an object a single record.
/// Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<serde_json::Result<Vec<FlowRecord>>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    Some(serde_json::from_str::<Line>(line).map(|parsed| match parsed {
        Line::Batch(batch) => batch,
        Line::Single(record) => vec![record],
    }))
}

#[derive(Default)]
struct LineDecoder {
    line_no: u64,
    skipped: u64,
}

impl LineDecoder {
    fn decode(&mut self, line: &str) -> Option<Vec<FlowRecord>> {
        self.line_no += 1;
        match parse_line(line)? {
            Ok(batch) => Some(batch),
            Err(e) => {
                self.skipped += 1;
                warn!(line = self.line_no, error = %e, "skipping malformed flow line");
                None
            }
        }
    }
}

/// Newline-delimited JSON flows from an async reader
pub struct NdjsonSource<R> {
    lines: Lines<R>,
    decoder: LineDecoder,
}

impl<R: AsyncBufRead + Unpin + Send> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            decoder: LineDecoder::default(),
        }
    }

    /// Lines dropped because they were not valid flow JSON
    pub fn skipped(&self) -> u64 {
        self.decoder.skipped
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FlowSource for NdjsonSource<R> {
    async fn next_batch(&mut self) -> Result<Option<Vec<FlowRecord>>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .context("Failed to read flow input")?;

            let Some(line) = line else {
                return Ok(None);
            };
            if let Some(batch) = self.decoder.decode(&line) {
                return Ok(Some(batch));
            }
        }
    }

    fn name(&self) -> &str {
        "ndjson"
    }
}

/// Newline-delimited JSON flows from a blocking reader such as stdin.
///
/// Reads happen on a detached OS thread, so a reader stuck on a quiet pipe
/// never holds up runtime shutdown. The thread exits at EOF, on a read error,
/// or on its next line once the source is dropped.
pub struct ThreadedNdjsonSource {
    lines: mpsc::Receiver<std::io::Result<String>>,
    decoder: LineDecoder,
}

impl ThreadedNdjsonSource {
    pub fn spawn<R: BufRead + Send + 'static>(reader: R) -> Result<Self> {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        thread::Builder::new()
            .name("flow-input".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            })
            .context("Failed to spawn flow input thread")?;

        Ok(Self {
            lines: rx,
            decoder: LineDecoder::default(),
        })
    }

    /// Lines dropped because they were not valid flow JSON
    pub fn skipped(&self) -> u64 {
        self.decoder.skipped
    }
}

#[async_trait]
impl FlowSource for ThreadedNdjsonSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<FlowRecord>>> {
        while let Some(line) = self.lines.recv().await {
            let line = line.context("Failed to read flow input")?;
            if let Some(batch) = self.decoder.decode(&line) {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &str {
        "ndjson"
    }
}

/// Pumps batches from `source` into `tx` until the source ends or the
/// receiver goes away. Returns the number of batches forwarded.
pub async fn forward<S: FlowSource>(mut source: S, tx: mpsc::Sender<Vec<FlowRecord>>) -> Result<u64> {
    info!(source = source.name(), "flow source started");
    let mut forwarded = 0;

    while let Some(batch) = source.next_batch().await? {
        if batch.is_empty() {
            continue;
        }
        if tx.send(batch).await.is_err() {
            debug!("flow receiver dropped, stopping source");
            break;
        }
        forwarded += 1;
    }

    info!(source = source.name(), batches = forwarded, "flow source finished");
    Ok(forwarded)
}
