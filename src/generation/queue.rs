//! Pending-job queue.
//!
//! Holds the ids of Queued jobs in submission order. Lanes pull from the
//! front; cancellation removes from anywhere.

use std::collections::VecDeque;

/// Default number of pending jobs accepted before submissions are refused.
pub const DEFAULT_MAX_QUEUE: usize = 10;

/// A bounded FIFO of job ids.
#[derive(Debug)]
pub struct JobQueue {
    ids: VecDeque<String>,
    capacity: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE)
    }
}

impl JobQueue {
    /// Creates a new empty queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a job id.
    ///
    /// Returns the job's position (0 = next to run), or `Err` if the queue is full.
    pub fn add(&mut self, job_id: impl Into<String>) -> Result<usize, QueueFullError> {
        if self.is_full() {
            return Err(QueueFullError {
                current_size: self.ids.len(),
                capacity: self.capacity,
            });
        }
        self.ids.push_back(job_id.into());
        Ok(self.ids.len() - 1)
    }

    /// Removes and returns the next job id to run.
    pub fn pop_next(&mut self) -> Option<String> {
        self.ids.pop_front()
    }

    /// Removes a job id from anywhere in the queue.
    ///
    /// Returns true if it was present.
    pub fn remove(&mut self, job_id: &str) -> bool {
        match self.position(job_id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the position of a job, or `None` if it is not queued.
    pub fn position(&self, job_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == job_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties the queue, returning the ids in order.
    pub fn drain(&mut self) -> Vec<String> {
        self.ids.drain(..).collect()
    }
}

/// Error returned when the queue is full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFullError {
    /// Current number of jobs in the queue.
    pub current_size: usize,
    pub capacity: usize,
}

impl std::fmt::Display for QueueFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue is full ({} jobs). Maximum capacity is {}.",
            self.current_size, self.capacity
        )
    }
}

impl std::error::Error for QueueFullError {}
