use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no message found for receipt {0}")]
    UnknownReceipt(String),

    #[error("message lease already expired for receipt {0}")]
    LeaseExpired(String),
}

/// Opaque handle returned on lease; must be presented back to extend or
/// complete the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt(pub String);

#[derive(Debug, Clone)]
pub struct LeasedMessage<T> {
    pub receipt: Receipt,
    pub body: T,
    pub dequeue_count: u32,
}

struct Entry<T> {
    body: T,
    dequeue_count: u32,
    visible_at: DateTime<Utc>,
    receipt: Option<Receipt>,
}

/// Visibility-timeout queue: a leased message is invisible to every other
/// `dequeue_lease` caller until its lease expires or is completed
/// (invariant I-Q-1 in `SPEC_FULL.md`).
///
/// Backed in-process here; the etcd-backed variant reuses the same
/// `ResourceStore` the rest of C2 uses, keyed under
/// `System.Async/operationstatuses`, and layers this same lease bookkeeping
/// on top via a small `visible_at` field stored alongside each message.
pub struct VisibilityQueue<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
}

impl<T> Default for VisibilityQueue<T> {
    fn default() -> Self {
        VisibilityQueue {
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T: Clone> VisibilityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, body: T) {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        entries.push_back(Entry {
            body,
            dequeue_count: 0,
            visible_at: Utc::now(),
            receipt: None,
        });
    }

    pub fn dequeue_lease(&self, visibility_timeout: chrono::Duration) -> Option<LeasedMessage<T>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        let entry = entries.iter_mut().find(|e| e.visible_at <= now)?;
        let receipt = Receipt(Uuid::new_v4().to_string());
        entry.receipt = Some(receipt.clone());
        entry.visible_at = now + visibility_timeout;
        entry.dequeue_count += 1;
        Some(LeasedMessage {
            receipt,
            body: entry.body.clone(),
            dequeue_count: entry.dequeue_count,
        })
    }

    pub fn extend_lease(
        &self,
        receipt: &Receipt,
        additional: chrono::Duration,
    ) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        let entry = entries
            .iter_mut()
            .find(|e| e.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        entry.visible_at = Utc::now() + additional;
        Ok(())
    }

    pub fn complete(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        let position = entries
            .iter()
            .position(|e| e.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        entries.remove(position);
        Ok(())
    }

    /// Releases the lease without removing the message, making it visible
    /// again immediately for retry.
    pub fn release(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        let entry = entries
            .iter_mut()
            .find(|e| e.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        entry.visible_at = Utc::now();
        entry.receipt = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
