//! Terminal stage: turns flow batches into counter observations
//!
//! Every record yields exactly one `add` call, in arrival order. Per-record
//! anomalies (missing or mistyped fields) are absorbed by the deriver and
//! never logged.

use crate::config::EnvironmentTags;
use crate::flows::derive_attributes;
use crate::metrics::counter::ConnectionCounter;
use beyla_network_common::FlowRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, Level};

pub struct FlowCollector<C> {
    counter: C,
    tags: EnvironmentTags,
    batches_received: AtomicU64,
    records_processed: AtomicU64,
    bytes_observed: AtomicU64,
}

impl<C: ConnectionCounter> FlowCollector<C> {
    pub fn new(counter: C, tags: EnvironmentTags) -> Self {
        Self {
            counter,
            tags,
            batches_received: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            bytes_observed: AtomicU64::new(0),
        }
    }

    /// Records one observation for a single flow
    pub fn process_record(&self, record: &FlowRecord) {
        let bytes = record.bytes();
        let attributes = derive_attributes(record, &self.tags);

        self.counter.add(bytes, attributes.as_slice());

        self.records_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_observed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records one observation per flow, in order
    pub fn process_batch(&self, batch: &[FlowRecord]) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);

        if tracing::enabled!(Level::DEBUG) {
            if let Ok(raw) = serde_json::to_string(batch) {
                debug!(records = batch.len(), batch = %raw, "received flow batch");
            }
        }

        for record in batch {
            self.process_record(record);
        }
    }

    /// Drains the channel until every sender is dropped
    pub async fn run(&self, mut rx: mpsc::Receiver<Vec<FlowRecord>>) {
        info!("flow collector started");

        while let Some(batch) = rx.recv().await {
            self.process_batch(&batch);
        }

        info!(
            batches = self.batches_received(),
            records = self.records_processed(),
            bytes = self.bytes_observed(),
            "flow channel closed, collector stopped"
        );
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_received.load(Ordering::Relaxed)
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_observed(&self) -> u64 {
        self.bytes_observed.load(Ordering::Relaxed)
    }

    pub fn tags(&self) -> &EnvironmentTags {
        &self.tags
    }
}
