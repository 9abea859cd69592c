//! Round-robin endpoint selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks target URLs in round-robin order across all workers.
#[derive(Debug)]
pub struct EndpointSelector {
    urls: Vec<String>,
    next: AtomicUsize,
}

impl EndpointSelector {
    /// Create a selector over the given URLs.
    ///
    /// Returns `None` for an empty list: there is nothing to select and the
    /// caller must treat the run as misconfigured.
    pub fn new(urls: Vec<String>) -> Option<Self> {
        if urls.is_empty() {
            return None;
        }
        Some(Self {
            urls,
            next: AtomicUsize::new(0),
        })
    }

    /// Return the next URL.
    ///
    /// Concurrent callers each claim a distinct index; the relative order of
    /// overlapping calls is unspecified.
    pub fn next(&self) -> &str {
        if self.urls.len() == 1 {
            return &self.urls[0];
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
