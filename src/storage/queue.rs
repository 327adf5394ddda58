//! In-process crawl job queue

use crate::models::CrawlJob;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Entry {
    priority: i32,
    /// Insertion order; earlier pops first within a priority
    seq: Reverse<u64>,
    job: CrawlJob,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Priority queue of crawl jobs: higher priority first, FIFO within a priority
#[derive(Default)]
pub struct JobQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: CrawlJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: job.priority,
            seq: Reverse(seq),
            job,
        });
    }

    pub fn pop(&mut self) -> Option<CrawlJob> {
        self.heap.pop().map(|entry| entry.job)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Extend<CrawlJob> for JobQueue {
    fn extend<I: IntoIterator<Item = CrawlJob>>(&mut self, iter: I) {
        for job in iter {
            self.push(job);
        }
    }
}

impl FromIterator<CrawlJob> for JobQueue {
    fn from_iter<I: IntoIterator<Item = CrawlJob>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job(url: &str, priority: i32) -> CrawlJob {
        CrawlJob::new(Uuid::new_v4(), url, priority, 1)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = JobQueue::new();
        queue.extend([job("low", 0), job("high-1", 5), job("high-2", 5), job("mid", 2)]);
        assert_eq!(queue.len(), 4);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|j| j.url).collect();
        assert_eq!(order, vec!["high-1", "high-2", "mid", "low"]);
        assert!(queue.is_empty());
    }
}
