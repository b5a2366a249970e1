use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::types::Credential;

/// FIFO pool of credentials shared by every worker.
///
/// A dequeued credential belongs to the caller until it is handed back
/// with `enqueue_tail`; the pool never clones or drops one.
#[derive(Debug)]
pub struct CredentialQueue {
    inner: Mutex<VecDeque<Credential>>,
    total: usize,
}

impl CredentialQueue {
    pub fn new(credentials: Vec<Credential>) -> Self {
        let total = credentials.len();
        Self { inner: Mutex::new(credentials.into()), total }
    }

    /// Take the head credential. `None` once all are in flight.
    pub fn dequeue(&self) -> Option<Credential> {
        self.lock().pop_front()
    }

    /// Return a credential to the back of the line.
    pub fn enqueue_tail(&self, credential: Credential) {
        self.lock().push_back(credential);
    }

    /// Credentials currently available.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Size of the pool at construction.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Available ids, head first.
    pub fn ids(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.id.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Credential>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
