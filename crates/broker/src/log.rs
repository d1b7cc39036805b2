//! Ordered, replayable topics.
//!
//! [`LogBroker`] is the seam between the change-log machinery and whatever
//! durable log backs it. [`MemoryBroker`] keeps every topic in process and is
//! used by the standalone server and by tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard};
use snafu::ensure;
use tokio::sync::watch;

use crate::{
    error::{AppendSnafu, InvalidTopicSnafu, Result, TimeoutSnafu, TopicNotFoundSnafu},
    topic::TopicSpec,
};

/// One record as stored in a topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    /// Record key, `"<type>/<id>"` for envelopes.
    pub key: String,
    /// Payload. Empty for deletions.
    pub value: Vec<u8>,
    /// Record headers.
    pub headers: BTreeMap<String, Vec<u8>>,
}

impl LogRecord {
    /// Creates a record without headers.
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self { key: key.into(), value, headers: BTreeMap::new() }
    }

    /// Adds a header, replacing any previous value under `name`.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }
}

/// A record together with the offset the log assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Offset within the topic.
    pub offset: u64,
    /// The stored record.
    pub record: LogRecord,
}

/// A log of single-partition topics with per-group committed offsets.
///
/// Offsets are dense at append time and never reused. Compaction may leave
/// gaps; readers must not assume `offset + 1` exists.
pub trait LogBroker: Send + Sync + 'static {
    /// Creates a topic. Creating an existing topic is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidTopic`](crate::BrokerError::InvalidTopic) for
    /// malformed specs.
    fn create_topic(&self, spec: &TopicSpec) -> Result<()>;

    /// Deletes a topic and every offset committed on it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TopicNotFound`](crate::BrokerError::TopicNotFound) if the
    /// topic does not exist.
    fn delete_topic(&self, topic: &str) -> Result<()>;

    /// Whether `topic` exists.
    fn topic_exists(&self, topic: &str) -> Result<bool>;

    /// Appends a batch atomically: either every record is stored, in order, or
    /// none is. Returns the offset assigned to the first record.
    fn append(&self, topic: &str, records: Vec<LogRecord>) -> Result<u64>;

    /// Reads up to `max` entries starting at `from`.
    fn read(&self, topic: &str, from: u64, max: usize) -> Result<Vec<LogEntry>>;

    /// Offset the next appended record will receive.
    fn end_offset(&self, topic: &str) -> Result<u64>;

    /// Records that `group` has processed everything before `offset`.
    fn commit_offset(&self, group: &str, topic: &str, offset: u64) -> Result<()>;

    /// Next offset `group` should read; 0 when nothing was committed yet.
    fn committed_offset(&self, group: &str, topic: &str) -> Result<u64>;

    /// Watches the end offset of `topic`.
    fn subscribe(&self, topic: &str) -> Result<watch::Receiver<u64>>;
}

struct TopicLog {
    spec: TopicSpec,
    records: BTreeMap<u64, LogRecord>,
    next_offset: u64,
    end: watch::Sender<u64>,
}

impl TopicLog {
    fn new(spec: TopicSpec) -> Self {
        let (end, _) = watch::channel(0);
        Self { spec, records: BTreeMap::new(), next_offset: 0, end }
    }
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, TopicLog>,
    committed: HashMap<(String, String), u64>,
    failing_appends: usize,
}

impl Inner {
    fn topic(&self, topic: &str) -> Result<&TopicLog> {
        self.topics.get(topic).ok_or_else(|| TopicNotFoundSnafu { topic }.build())
    }

    fn topic_mut(&mut self, topic: &str) -> Result<&mut TopicLog> {
        self.topics.get_mut(topic).ok_or_else(|| TopicNotFoundSnafu { topic }.build())
    }
}

/// In-process [`LogBroker`].
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    operation_timeout: Duration,
}

impl MemoryBroker {
    /// Default bound on lock acquisition.
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::with_operation_timeout(Self::DEFAULT_OPERATION_TIMEOUT)
    }

    /// Creates an empty broker whose calls give up after `operation_timeout`.
    #[must_use]
    pub fn with_operation_timeout(operation_timeout: Duration) -> Self {
        Self { inner: Mutex::new(Inner::default()), operation_timeout }
    }

    fn lock(&self, operation: &'static str, topic: &str) -> Result<MutexGuard<'_, Inner>> {
        self.inner.try_lock_for(self.operation_timeout).ok_or_else(|| {
            TimeoutSnafu {
                operation,
                topic,
                timeout_ms: u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .build()
        })
    }

    /// Rejects the next `count` appends as a whole.
    pub fn fail_next_appends(&self, count: usize) {
        self.inner.lock().failing_appends = count;
    }

    /// Topic spec as created.
    pub fn topic_spec(&self, topic: &str) -> Result<TopicSpec> {
        let inner = self.lock("describe", topic)?;
        Ok(inner.topic(topic)?.spec.clone())
    }

    /// Drops every record superseded by a later record with the same key.
    ///
    /// Only topics with a compacting cleanup policy are touched. Surviving
    /// records keep their offsets. Returns the number of dropped records.
    pub fn compact(&self, topic: &str) -> Result<usize> {
        let mut inner = self.lock("compact", topic)?;
        let log = inner.topic_mut(topic)?;
        if !log.spec.cleanup_policy.compacts() {
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let superseded: Vec<u64> = log
            .records
            .iter()
            .rev()
            .filter(|(_, record)| !seen.insert(record.key.clone()))
            .map(|(offset, _)| *offset)
            .collect();
        for offset in &superseded {
            log.records.remove(offset);
        }
        tracing::debug!(topic, dropped = superseded.len(), "compacted topic");
        Ok(superseded.len())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl LogBroker for MemoryBroker {
    fn create_topic(&self, spec: &TopicSpec) -> Result<()> {
        ensure!(
            !spec.name.is_empty(),
            InvalidTopicSnafu { topic: &spec.name, message: "topic name must not be empty" }
        );
        ensure!(
            spec.partitions == 1,
            InvalidTopicSnafu { topic: &spec.name, message: "topics must have exactly one partition" }
        );
        let mut inner = self.lock("create_topic", &spec.name)?;
        if inner.topics.contains_key(&spec.name) {
            return Ok(());
        }
        inner.topics.insert(spec.name.clone(), TopicLog::new(spec.clone()));
        tracing::info!(
            topic = %spec.name,
            replication_factor = spec.replication_factor,
            cleanup_policy = spec.cleanup_policy.as_str(),
            "created topic"
        );
        Ok(())
    }

    fn delete_topic(&self, topic: &str) -> Result<()> {
        let mut inner = self.lock("delete_topic", topic)?;
        ensure!(inner.topics.remove(topic).is_some(), TopicNotFoundSnafu { topic });
        inner.committed.retain(|(_, t), _| t != topic);
        tracing::info!(topic, "deleted topic");
        Ok(())
    }

    fn topic_exists(&self, topic: &str) -> Result<bool> {
        Ok(self.lock("describe", topic)?.topics.contains_key(topic))
    }

    fn append(&self, topic: &str, records: Vec<LogRecord>) -> Result<u64> {
        let mut inner = self.lock("append", topic)?;
        if inner.failing_appends > 0 {
            inner.failing_appends -= 1;
            return AppendSnafu { topic, message: "injected failure" }.fail();
        }
        let log = inner.topic_mut(topic)?;
        ensure!(
            records.iter().all(|record| !record.key.is_empty()),
            AppendSnafu { topic, message: "record key must not be empty" }
        );

        let first = log.next_offset;
        for record in records {
            log.records.insert(log.next_offset, record);
            log.next_offset += 1;
        }
        if log.next_offset != first {
            log.end.send_replace(log.next_offset);
        }
        Ok(first)
    }

    fn read(&self, topic: &str, from: u64, max: usize) -> Result<Vec<LogEntry>> {
        let inner = self.lock("read", topic)?;
        Ok(inner
            .topic(topic)?
            .records
            .range(from..)
            .take(max)
            .map(|(offset, record)| LogEntry { offset: *offset, record: record.clone() })
            .collect())
    }

    fn end_offset(&self, topic: &str) -> Result<u64> {
        Ok(self.lock("end_offset", topic)?.topic(topic)?.next_offset)
    }

    fn commit_offset(&self, group: &str, topic: &str, offset: u64) -> Result<()> {
        let mut inner = self.lock("commit_offset", topic)?;
        inner.topic(topic)?;
        inner.committed.insert((group.to_string(), topic.to_string()), offset);
        Ok(())
    }

    fn committed_offset(&self, group: &str, topic: &str) -> Result<u64> {
        let inner = self.lock("committed_offset", topic)?;
        inner.topic(topic)?;
        Ok(inner.committed.get(&(group.to_string(), topic.to_string())).copied().unwrap_or(0))
    }

    fn subscribe(&self, topic: &str) -> Result<watch::Receiver<u64>> {
        Ok(self.lock("subscribe", topic)?.topic(topic)?.end.subscribe())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_types::HasErrorCode;

    use super::*;
    use crate::{BrokerError, topic::CleanupPolicy};

    fn broker_with(topic: &str) -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.create_topic(&TopicSpec::new(topic, 1)).expect("create");
        broker
    }

    fn record(key: &str, value: &str) -> LogRecord {
        LogRecord::new(key, value.as_bytes().to_vec())
    }

    #[test]
    fn test_append_assigns_dense_offsets() {
        let broker = broker_with("t");
        assert_eq!(broker.append("t", vec![record("a/1", "x"), record("a/2", "y")]).unwrap(), 0);
        assert_eq!(broker.append("t", vec![record("a/3", "z")]).unwrap(), 2);
        assert_eq!(broker.end_offset("t").unwrap(), 3);

        let entries = broker.read("t", 1, 10).unwrap();
        let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
        assert_eq!(entries[0].record.key, "a/2");
    }

    #[test]
    fn test_read_respects_max() {
        let broker = broker_with("t");
        broker.append("t", (0..5).map(|i| record(&format!("a/{i}"), "v")).collect()).unwrap();
        assert_eq!(broker.read("t", 0, 2).unwrap().len(), 2);
        assert!(broker.read("t", 5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_create_topic_is_idempotent() {
        let broker = broker_with("t");
        broker.append("t", vec![record("a/1", "x")]).unwrap();
        broker.create_topic(&TopicSpec::new("t", 1)).unwrap();
        assert_eq!(broker.end_offset("t").unwrap(), 1);
    }

    #[test]
    fn test_unknown_topic() {
        let broker = MemoryBroker::new();
        let err = broker.append("missing", vec![record("a/1", "x")]).unwrap_err();
        assert!(matches!(err, BrokerError::TopicNotFound { .. }));
        assert!(!broker.topic_exists("missing").unwrap());
    }

    #[test]
    fn test_batch_with_empty_key_is_rejected_whole() {
        let broker = broker_with("t");
        let err = broker.append("t", vec![record("a/1", "x"), record("", "y")]).unwrap_err();
        assert!(matches!(err, BrokerError::Append { .. }));
        assert_eq!(broker.end_offset("t").unwrap(), 0);
    }

    #[test]
    fn test_injected_append_failures() {
        let broker = broker_with("t");
        broker.fail_next_appends(1);
        let err = broker.append("t", vec![record("a/1", "x")]).unwrap_err();
        assert!(err.is_retryable());
        broker.append("t", vec![record("a/1", "x")]).unwrap();
        assert_eq!(broker.end_offset("t").unwrap(), 1);
    }

    #[test]
    fn test_committed_offsets_per_group() {
        let broker = broker_with("t");
        assert_eq!(broker.committed_offset("g1", "t").unwrap(), 0);
        broker.commit_offset("g1", "t", 4).unwrap();
        assert_eq!(broker.committed_offset("g1", "t").unwrap(), 4);
        assert_eq!(broker.committed_offset("g2", "t").unwrap(), 0);
    }

    #[test]
    fn test_delete_topic_drops_offsets() {
        let broker = broker_with("t");
        broker.commit_offset("g", "t", 3).unwrap();
        broker.delete_topic("t").unwrap();
        assert!(broker.delete_topic("t").is_err());
        broker.create_topic(&TopicSpec::new("t", 1)).unwrap();
        assert_eq!(broker.committed_offset("g", "t").unwrap(), 0);
    }

    #[test]
    fn test_subscribe_tracks_end_offset() {
        let broker = broker_with("t");
        let mut rx = broker.subscribe("t").unwrap();
        assert_eq!(*rx.borrow_and_update(), 0);
        broker.append("t", vec![record("a/1", "x")]).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[test]
    fn test_compaction_keeps_latest_per_key() {
        let broker = MemoryBroker::new();
        let spec = TopicSpec { cleanup_policy: CleanupPolicy::Compact, ..TopicSpec::new("c", 1) };
        broker.create_topic(&spec).unwrap();
        broker
            .append("c", vec![record("g/1", "0"), record("g/2", "0"), record("g/1", "1")])
            .unwrap();

        assert_eq!(broker.compact("c").unwrap(), 1);
        let entries = broker.read("c", 0, 10).unwrap();
        let kept: Vec<(u64, &str)> = entries.iter().map(|e| (e.offset, e.record.key.as_str())).collect();
        assert_eq!(kept, vec![(1, "g/2"), (2, "g/1")]);
        assert_eq!(broker.end_offset("c").unwrap(), 3);
    }

    #[test]
    fn test_compaction_ignores_delete_policy() {
        let broker = broker_with("t");
        broker.append("t", vec![record("g/1", "0"), record("g/1", "1")]).unwrap();
        assert_eq!(broker.compact("t").unwrap(), 0);
        assert_eq!(broker.read("t", 0, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_lock_timeout() {
        let broker = MemoryBroker::with_operation_timeout(Duration::from_millis(10));
        broker.create_topic(&TopicSpec::new("t", 1)).unwrap();
        let _held = broker.inner.lock();
        let err = broker.end_offset("t").unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { operation: "end_offset", .. }));
    }

    #[test]
    fn test_rejects_multi_partition_spec() {
        let broker = MemoryBroker::new();
        let spec = TopicSpec { partitions: 3, ..TopicSpec::new("t", 1) };
        assert!(matches!(broker.create_topic(&spec), Err(BrokerError::InvalidTopic { .. })));
    }
}
