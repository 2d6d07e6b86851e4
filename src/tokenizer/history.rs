use std::collections::VecDeque;

/// Bounded FIFO of completed lines.
///
/// A capacity of zero disables retention: pushes are accepted and dropped.
#[derive(Clone, Debug, Default)]
pub struct LineHistory {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineHistory {
    /// line history initialization
    pub fn new(capacity: usize) -> Self {
        LineHistory {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// is retention enabled
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// get number of remembered lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// is history empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a line and returns how many of the oldest lines were evicted
    /// to keep the history within its capacity.
    pub fn push(&mut self, line: &str) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        self.lines.push_back(line.to_owned());
        let overflow = self.lines.len().saturating_sub(self.capacity);
        self.lines.drain(..overflow);
        overflow
    }

    /// get last remembered line
    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    /// copy all remembered lines, oldest first
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// take all remembered lines, leaving the history empty
    pub fn take_all(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// clear history
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
