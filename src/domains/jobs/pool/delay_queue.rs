//! Delay queue for retries: a priority-indexed structure (min-heap) holding
//! CompositeNodes that become eligible for submission at a future instant.
//! Built directly rather than pulling in a task-queue framework.

use crate::domains::jobs::models::composite_node::CompositeNode;
use crate::domains::jobs::pool::poller_pool::PollerPool;
use crate::kernel::clock::Clock;
use crate::kernel::service::Service;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct DelayedEntry {
    due_at: DateTime<Utc>,
    node: CompositeNode,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at
    }
}
impl Eq for DelayedEntry {}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at.cmp(&other.due_at)
    }
}

/// Holds retry and chain-backoff submissions until their `due_at` elapses,
/// then hands them to the [`PollerPool`]'s FIFO.
#[derive(Clone)]
pub struct DelayQueue {
    heap: Arc<Mutex<BinaryHeap<Reverse<DelayedEntry>>>>,
    clock: Arc<dyn Clock>,
}

impl DelayQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
            clock,
        }
    }

    pub fn schedule(&self, node: CompositeNode, due_at: DateTime<Utc>) {
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Reverse(DelayedEntry { due_at, node }));
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain_due(&self) -> Vec<CompositeNode> {
        let now = self.clock.now();
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.due_at > now {
                break;
            }
            let Reverse(entry) = heap.pop().expect("peeked above");
            due.push(entry.node);
        }
        due
    }
}

/// Background [`Service`] that periodically drains due retries into the
/// pool's FIFO.
pub struct DelayQueueDispatcher {
    queue: DelayQueue,
    pool: Arc<PollerPool>,
    poll_interval: Duration,
}

impl DelayQueueDispatcher {
    pub fn new(queue: DelayQueue, pool: Arc<PollerPool>, poll_interval: Duration) -> Self {
        Self {
            queue,
            pool,
            poll_interval,
        }
    }
}

#[async_trait]
impl Service for DelayQueueDispatcher {
    fn name(&self) -> &'static str {
        "delay-queue-dispatcher"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            for node in self.queue.drain_due() {
                self.pool.submit(node);
            }
            self.pool.note_delayed(self.queue.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::TestClock;
    use crate::common::entity_ids::ExecutionId;
    use crate::domains::jobs::models::job::{Job, OperationType};
    use crate::common::entity_ids::OltId;

    fn sample_node() -> CompositeNode {
        let job = Job::builder()
            .olt_id(OltId::new())
            .operation_type(OperationType::Get)
            .interval_seconds(300)
            .next_run_at(Utc::now())
            .oid("1.3.6.1")
            .build();
        CompositeNode::singleton(ExecutionId::new(), job, Utc::now())
    }

    #[test]
    fn drain_due_only_returns_elapsed_entries() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let queue = DelayQueue::new(clock.clone());

        queue.schedule(sample_node(), clock.now() + chrono::Duration::seconds(120));
        assert!(queue.drain_due().is_empty());

        clock.advance(chrono::Duration::seconds(121));
        assert_eq!(queue.drain_due().len(), 1);
        assert!(queue.is_empty());
    }
}
