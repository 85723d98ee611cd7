//! Bounded capture of recent transcoder output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared ring of the most recent output lines. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    inner: Arc<Mutex<Ring>>,
}

#[derive(Debug)]
struct Ring {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Ring {
                lines: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Append a line, evicting the oldest once full. Blank lines are dropped.
    pub fn push(&self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        let mut ring = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if ring.lines.len() == ring.capacity {
            ring.lines.pop_front();
        }
        ring.lines.push_back(line.to_string());
    }

    /// Up to `n` most recent lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let ring = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = ring.lines.len().saturating_sub(n);
        ring.lines.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.tail(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
