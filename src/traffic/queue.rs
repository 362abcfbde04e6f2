//! Four-level strict priority queue, FIFO within each level.
//!
//! CRITICAL intentionally starves lower levels; it encodes human-initiated
//! emergency recovery and there is no aging.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug)]
pub struct PriorityQueue<T> {
    levels: [VecDeque<T>; 4],
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            levels: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    pub fn enqueue(&mut self, item: T, priority: Priority) {
        self.levels[priority.index()].push_back(item);
    }

    /// Oldest item of the highest non-empty level.
    pub fn peek(&self) -> Option<&T> {
        self.levels.iter().find_map(|level| level.front())
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.levels
            .iter_mut()
            .find(|level| !level.is_empty())
            .and_then(|level| level.pop_front())
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|level| level.is_empty())
    }

    /// Remove everything, highest priority first; used on shutdown to
    /// reject pending work.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for level in self.levels.iter_mut() {
            out.extend(level.drain(..));
        }
        out
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_levels_always_dequeue_first() {
        let mut q = PriorityQueue::new();
        q.enqueue("low", Priority::Low);
        q.enqueue("normal", Priority::Normal);
        q.enqueue("critical", Priority::Critical);
        q.enqueue("high", Priority::High);

        assert_eq!(q.dequeue(), Some("critical"));
        assert_eq!(q.dequeue(), Some("high"));
        assert_eq!(q.dequeue(), Some("normal"));
        assert_eq!(q.dequeue(), Some("low"));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn fifo_within_a_level() {
        let mut q = PriorityQueue::new();
        q.enqueue(1, Priority::Normal);
        q.enqueue(2, Priority::Normal);
        q.enqueue(3, Priority::Normal);

        assert_eq!(q.peek(), Some(&1));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
    }

    #[test]
    fn drain_empties_every_level() {
        let mut q = PriorityQueue::new();
        q.enqueue("a", Priority::Low);
        q.enqueue("b", Priority::Critical);
        let drained = q.drain_all();
        assert_eq!(drained, vec!["b", "a"]);
        assert!(q.is_empty());
    }
}
