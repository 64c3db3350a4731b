//! Single-writer capture slot.
//!
//! The writer half is handed to exactly one interceptor; any number of
//! readers may observe it. Reads never change the slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    /// Increases with every store; later captures always carry a larger seq.
    pub seq: u64,
    pub url: String,
    pub payload: Arc<Value>,
}

pub fn capture_slot() -> (SlotWriter, SlotReader) {
    let (tx, rx) = watch::channel(None);
    let parse_failures = Arc::new(AtomicU64::new(0));
    (
        SlotWriter {
            tx,
            seq: AtomicU64::new(0),
            parse_failures: parse_failures.clone(),
        },
        SlotReader { rx, parse_failures },
    )
}

#[derive(Debug)]
pub struct SlotWriter {
    tx: watch::Sender<Option<Captured>>,
    seq: AtomicU64,
    parse_failures: Arc<AtomicU64>,
}

impl SlotWriter {
    /// Overwrite the slot with a new capture and return its sequence number.
    pub fn store(&self, url: &str, payload: Value) -> u64 {
        let mut stored = 0;
        self.tx.send_modify(|slot| {
            stored = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = Some(Captured {
                seq: stored,
                url: url.to_string(),
                payload: Arc::new(payload),
            });
        });
        stored
    }

    /// Returns the new failure total.
    pub fn record_parse_failure(&self) -> u64 {
        self.parse_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.tx.send_replace(None);
    }
}

#[derive(Debug, Clone)]
pub struct SlotReader {
    rx: watch::Receiver<Option<Captured>>,
    parse_failures: Arc<AtomicU64>,
}

impl SlotReader {
    pub fn current(&self) -> Option<Captured> {
        self.rx.borrow().clone()
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::SeqCst)
    }
}

/// Anything a waiter can poll for a capture.
#[async_trait]
pub trait SlotSource: Send + Sync {
    async fn read_slot(&self) -> Result<Option<Captured>>;

    /// Push notifications, for sources living in this process.
    fn subscribe(&self) -> Option<watch::Receiver<Option<Captured>>> {
        None
    }
}

#[async_trait]
impl SlotSource for SlotReader {
    async fn read_slot(&self) -> Result<Option<Captured>> {
        Ok(self.current())
    }

    fn subscribe(&self) -> Option<watch::Receiver<Option<Captured>>> {
        Some(self.rx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slot_keeps_only_latest() {
        let (writer, reader) = capture_slot();
        assert!(reader.current().is_none());
        assert_eq!(writer.store("/a", json!(1)), 1);
        assert_eq!(writer.store("/b", json!(2)), 2);
        let c = reader.current().unwrap();
        assert_eq!(c.seq, 2);
        assert_eq!(c.url, "/b");
        assert_eq!(*c.payload, json!(2));
    }

    #[test]
    fn test_reads_do_not_consume() {
        let (writer, reader) = capture_slot();
        writer.store("/a", json!({"k": 1}));
        let other = reader.clone();
        assert_eq!(reader.current(), reader.current());
        assert_eq!(other.current(), reader.current());
    }

    #[test]
    fn test_reset_and_parse_failures() {
        let (writer, reader) = capture_slot();
        writer.store("/a", json!(1));
        writer.reset();
        assert!(reader.current().is_none());
        assert_eq!(writer.record_parse_failure(), 1);
        assert_eq!(writer.record_parse_failure(), 2);
        assert_eq!(reader.parse_failures(), 2);
        // seq keeps counting across resets
        assert_eq!(writer.store("/b", json!(2)), 2);
    }
}
