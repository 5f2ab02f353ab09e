//! Four strict-priority bounded queues (spec §4.7). Grounded on the
//! `crossbeam` dependency mined from the zero-alloc HTTP server example
//! repo, which reaches for `crossbeam::channel` for its own worker
//! hand-off queues — the teacher carries no task executor of its own.

use crate::error::TaskError;
use crossbeam::channel::{bounded, Receiver, Select, Sender, TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub const ALL_HIGH_TO_LOW: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Weight used by the auto-scale controller's weighted queue-depth
    /// sample (spec §4.7: CRITICAL=4, HIGH=3, NORMAL=2, LOW=1).
    pub fn weight(self) -> u32 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }
}

pub struct PriorityQueues<T> {
    senders: [Sender<T>; 4],
    receivers: [Receiver<T>; 4],
}

impl<T> PriorityQueues<T> {
    pub fn new(capacity_per_priority: usize) -> Self {
        let (s0, r0) = bounded(capacity_per_priority);
        let (s1, r1) = bounded(capacity_per_priority);
        let (s2, r2) = bounded(capacity_per_priority);
        let (s3, r3) = bounded(capacity_per_priority);
        // Indexed by Priority as usize: Low, Normal, High, Critical.
        Self {
            senders: [s0, s1, s2, s3],
            receivers: [r0, r1, r2, r3],
        }
    }

    pub fn enqueue(&self, priority: Priority, item: T) -> Result<(), TaskError> {
        self.senders[priority as usize]
            .try_send(item)
            .map_err(|e| match e {
                TrySendError::Full(_) => TaskError::QueueFull,
                TrySendError::Disconnected(_) => TaskError::Cancelled,
            })
    }

    pub fn depth(&self, priority: Priority) -> usize {
        self.receivers[priority as usize].len()
    }

    pub fn weighted_depth(&self) -> u32 {
        Priority::ALL_HIGH_TO_LOW
            .iter()
            .map(|&p| self.depth(p) * p.weight() as usize)
            .sum::<usize>() as u32
    }

    /// Blocks until an item is available, strictly preferring higher
    /// priorities: a worker only dequeues LOW when CRITICAL/HIGH/NORMAL
    /// are all empty at the moment of selection (spec §4.7's scheduling
    /// fairness contract). Built on `crossbeam::channel::Select`, trying
    /// non-blocking receives in priority order before falling back to a
    /// blocking select across all four.
    pub fn dequeue_blocking(&self) -> Option<(Priority, T)> {
        loop {
            for &p in &Priority::ALL_HIGH_TO_LOW {
                if let Ok(item) = self.receivers[p as usize].try_recv() {
                    return Some((p, item));
                }
            }

            // Nothing was immediately ready in priority order; block until
            // any queue has an item. Whichever channel wakes us was the
            // only one ready at that moment of selection (spec §4.7), so
            // it is returned directly rather than re-scanned.
            let mut select = Select::new();
            for r in &self.receivers {
                select.recv(r);
            }
            let oper = select.select();
            let idx = oper.index();
            if let Ok(item) = oper.recv(&self.receivers[idx]) {
                return Some((index_to_priority(idx), item));
            }
        }
    }
}

fn index_to_priority(idx: usize) -> Priority {
    match idx {
        0 => Priority::Low,
        1 => Priority::Normal,
        2 => Priority::High,
        _ => Priority::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_is_served_first() {
        let queues: PriorityQueues<&'static str> = PriorityQueues::new(8);
        queues.enqueue(Priority::Low, "low").unwrap();
        queues.enqueue(Priority::Critical, "critical").unwrap();
        queues.enqueue(Priority::Normal, "normal").unwrap();

        let (p, item) = queues.dequeue_blocking().unwrap();
        assert_eq!(p, Priority::Critical);
        assert_eq!(item, "critical");
    }

    #[test]
    fn full_queue_reports_queue_full() {
        let queues: PriorityQueues<u8> = PriorityQueues::new(1);
        queues.enqueue(Priority::Low, 1).unwrap();
        assert!(matches!(
            queues.enqueue(Priority::Low, 2),
            Err(TaskError::QueueFull)
        ));
    }

    #[test]
    fn weighted_depth_reflects_priority_weights() {
        let queues: PriorityQueues<u8> = PriorityQueues::new(8);
        queues.enqueue(Priority::Critical, 1).unwrap();
        queues.enqueue(Priority::Low, 1).unwrap();
        assert_eq!(queues.weighted_depth(), 4 + 1);
    }
}
