use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delivery attempts before a message is dropped.
    pub max_retries: u32,
    /// Base backoff; the n-th retry waits `retry_delay * 2^(n-1)`.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Backoff delay applied after the n-th failed attempt (1-based).
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.retry_delay * 2u32.saturating_pow(exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// QueuedMessage
// ---------------------------------------------------------------------------

/// One pending outbound message. Owned by [`MessageQueue`]; the dispatch loop
/// only ever sees clones and mutates through the id-based `mark_*` calls.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub system_id: String,
    /// Internal representation; mapped to the external shape at dispatch.
    pub payload: Value,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub last_attempt: Option<Instant>,
    /// Unset until a failure or deferral postpones the message.
    pub next_attempt: Option<Instant>,
}

impl QueuedMessage {
    fn eligible(&self, now: Instant) -> bool {
        match self.next_attempt {
            None => true,
            Some(at) => at <= now,
        }
    }
}

/// What `mark_failed` decided for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Another attempt is scheduled after the given backoff.
    Scheduled { delay: Duration },
    /// The retry budget is spent; the message has been removed.
    Exhausted,
}

// ---------------------------------------------------------------------------
// MessageQueue
// ---------------------------------------------------------------------------

/// In-memory queue of pending outbound messages.
///
/// All mutations are serialized by a single internal lock so the dispatch
/// loop and concurrent producers cannot lose updates. Eligibility is FIFO:
/// `get_next` returns the oldest message whose `next_attempt` has elapsed,
/// skipping (not removing) backed-off entries so enqueue order is preserved
/// across retries.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<QueuedMessage>>>,
    policy: RetryPolicy,
}

impl MessageQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a fresh message and return its id.
    pub fn add(&self, system_id: &str, payload: Value) -> Uuid {
        let id = Uuid::new_v4();
        let msg = QueuedMessage {
            id,
            system_id: system_id.to_string(),
            payload,
            enqueued_at: chrono::Utc::now(),
            retry_count: 0,
            last_attempt: None,
            next_attempt: None,
        };
        let mut q = self.lock();
        q.push_back(msg);
        id
    }

    /// Clone of the first currently-eligible message, oldest first.
    pub fn get_next(&self) -> Option<QueuedMessage> {
        let now = Instant::now();
        let q = self.lock();
        q.iter().find(|m| m.eligible(now)).cloned()
    }

    /// Record a successful delivery; removes the message.
    pub fn mark_success(&self, id: &Uuid) -> bool {
        let mut q = self.lock();
        let before = q.len();
        q.retain(|m| m.id != *id);
        q.len() != before
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments the retry count and either removes the message (budget
    /// spent) or schedules the next attempt with exponential backoff.
    /// Returns `None` when the id is no longer queued.
    pub fn mark_failed(&self, id: &Uuid) -> Option<RetryDisposition> {
        let now = Instant::now();
        let mut q = self.lock();
        let pos = q.iter().position(|m| m.id == *id)?;

        let msg = &mut q[pos];
        msg.retry_count += 1;
        msg.last_attempt = Some(now);

        if msg.retry_count >= self.policy.max_retries {
            q.remove(pos);
            return Some(RetryDisposition::Exhausted);
        }

        let delay = self.policy.backoff_for(msg.retry_count);
        msg.next_attempt = Some(now + delay);
        Some(RetryDisposition::Scheduled { delay })
    }

    /// Postpone a message without touching its retry count (rate-limit
    /// deferral, not a delivery failure).
    pub fn defer(&self, id: &Uuid, delay: Duration) -> bool {
        let now = Instant::now();
        let mut q = self.lock();
        match q.iter_mut().find(|m| m.id == *id) {
            Some(msg) => {
                msg.next_attempt = Some(now + delay);
                true
            }
            None => false,
        }
    }

    /// Drop a message outright (dispatch-time validation failure).
    pub fn remove(&self, id: &Uuid) -> bool {
        let mut q = self.lock();
        let before = q.len();
        q.retain(|m| m.id != *id);
        q.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of queued messages targeting one system.
    pub fn len_for(&self, system_id: &str) -> usize {
        self.lock().iter().filter(|m| m.system_id == system_id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.inner.lock().expect("message queue lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(max_retries: u32, delay_ms: u64) -> MessageQueue {
        MessageQueue::new(RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn add_and_get_next_is_fifo() {
        let q = queue(3, 100);
        let a = q.add("s1", json!({"n": 1}));
        let _b = q.add("s1", json!({"n": 2}));

        let next = q.get_next().unwrap();
        assert_eq!(next.id, a);
        assert_eq!(next.retry_count, 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn mark_success_removes() {
        let q = queue(3, 100);
        let id = q.add("s1", json!({}));
        assert!(q.mark_success(&id));
        assert!(q.is_empty());
        assert!(!q.mark_success(&id));
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
    }

    #[test]
    fn failed_message_is_backed_off_then_eligible_again() {
        let q = queue(5, 20);
        let id = q.add("s1", json!({}));

        let disp = q.mark_failed(&id).unwrap();
        assert_eq!(
            disp,
            RetryDisposition::Scheduled {
                delay: Duration::from_millis(20)
            }
        );
        // Backed off: not eligible right now.
        assert!(q.get_next().is_none());
        assert_eq!(q.len(), 1);

        std::thread::sleep(Duration::from_millis(30));
        let again = q.get_next().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.retry_count, 1);
    }

    #[test]
    fn exhaustion_removes_after_max_retries() {
        let q = queue(3, 1);
        let id = q.add("s1", json!({}));

        assert!(matches!(
            q.mark_failed(&id),
            Some(RetryDisposition::Scheduled { .. })
        ));
        assert!(matches!(
            q.mark_failed(&id),
            Some(RetryDisposition::Scheduled { .. })
        ));
        assert_eq!(q.mark_failed(&id), Some(RetryDisposition::Exhausted));
        assert!(q.is_empty());
        assert_eq!(q.mark_failed(&id), None);
    }

    #[test]
    fn ineligible_messages_are_skipped_not_removed() {
        let q = queue(5, 500);
        let a = q.add("s1", json!({"n": 1}));
        let b = q.add("s1", json!({"n": 2}));

        // Back off the head; the second message becomes the eligible front.
        q.mark_failed(&a).unwrap();
        let next = q.get_next().unwrap();
        assert_eq!(next.id, b);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn defer_postpones_without_retry_count() {
        let q = queue(3, 100);
        let id = q.add("s1", json!({}));

        assert!(q.defer(&id, Duration::from_millis(50)));
        assert!(q.get_next().is_none());

        let held = {
            let guard = q.lock();
            guard.front().unwrap().clone()
        };
        assert_eq!(held.retry_count, 0);
        assert!(held.next_attempt.is_some());
    }

    #[test]
    fn len_for_counts_per_system() {
        let q = queue(3, 100);
        q.add("s1", json!({}));
        q.add("s1", json!({}));
        q.add("s2", json!({}));
        assert_eq!(q.len_for("s1"), 2);
        assert_eq!(q.len_for("s2"), 1);
        assert_eq!(q.len_for("s3"), 0);
    }
}
