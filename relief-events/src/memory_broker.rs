//! Partitioned in-process broker.
//!
//! Used for local runs and tests. Records go to the partition chosen by
//! their key's hash; offsets grow by one per partition, so publish order is
//! preserved per key. Outages and latency can be scripted.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::event::BrokerMessage;
use crate::producer::{AckPolicy, DeliveryAck, EventProducer, ProducerError};

/// A record as stored by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition: i32,
    pub offset: i64,
    pub ack: AckPolicy,
    pub message: BrokerMessage,
}

#[derive(Debug)]
struct Script {
    down: AtomicBool,
    fail_next: AtomicU32,
    latency: Mutex<Duration>,
}

/// In-memory [`EventProducer`]. Clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    partitions: Arc<[Mutex<Vec<StoredRecord>>]>,
    script: Arc<Script>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(3)
    }
}

impl InMemoryBroker {
    /// Create a broker with `partitions` partitions (at least one).
    pub fn new(partitions: usize) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>();
        Self {
            partitions: partitions.into(),
            script: Arc::new(Script {
                down: AtomicBool::new(false),
                fail_next: AtomicU32::new(0),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Make every send fail as unreachable until switched back.
    pub fn set_down(&self, down: bool) {
        self.script.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` sends as unreachable.
    pub fn fail_next(&self, n: u32) {
        self.script.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every acknowledgment by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self
            .script
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// All stored records, partition by partition.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.partitions
            .iter()
            .flat_map(|p| lock(p).clone())
            .collect()
    }

    /// Records of one partition in offset order.
    pub fn partition(&self, partition: usize) -> Vec<StoredRecord> {
        self.partitions
            .get(partition)
            .map(|p| lock(p).clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| lock(p).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    fn scripted_failure(&self) -> Option<ProducerError> {
        if self.script.down.load(Ordering::SeqCst) {
            return Some(ProducerError::Unreachable {
                reason: "broker is down".to_string(),
            });
        }
        let consumed = self
            .script
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        consumed.then(|| ProducerError::Unreachable {
            reason: "scripted failure".to_string(),
        })
    }
}

fn lock(partition: &Mutex<Vec<StoredRecord>>) -> MutexGuard<'_, Vec<StoredRecord>> {
    partition.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl EventProducer for InMemoryBroker {
    async fn send(
        &self,
        message: &BrokerMessage,
        ack: AckPolicy,
    ) -> Result<DeliveryAck, ProducerError> {
        let latency = *self
            .script
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }

        let index = self.partition_for(&message.key);
        let mut partition = lock(&self.partitions[index]);
        let offset = partition.len() as i64;
        partition.push(StoredRecord {
            partition: index as i32,
            offset,
            ack,
            message: message.clone(),
        });

        Ok(DeliveryAck {
            partition: index as i32,
            offset,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn message(key: &str) -> BrokerMessage {
        BrokerMessage {
            topic: "events".to_string(),
            key: key.to_string(),
            value: key.as_bytes().to_vec(),
            headers: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = InMemoryBroker::new(4);
        let first = broker.send(&message("k1"), AckPolicy::All).await.unwrap();
        let second = broker.send(&message("k1"), AckPolicy::All).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);

        let records = broker.partition(first.partition as usize);
        assert_eq!(records.len(), 2);
        assert!(records.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let broker = InMemoryBroker::new(1);
        broker.fail_next(2);
        assert!(broker.send(&message("a"), AckPolicy::Leader).await.is_err());
        assert!(broker.send(&message("a"), AckPolicy::Leader).await.is_err());
        assert!(broker.send(&message("a"), AckPolicy::Leader).await.is_ok());

        broker.set_down(true);
        let err = broker.send(&message("a"), AckPolicy::Leader).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_ack() {
        let broker = InMemoryBroker::new(1);
        broker.set_latency(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        broker.send(&message("a"), AckPolicy::All).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
