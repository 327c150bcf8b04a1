//! Four-lane priority queue feeding the scheduler.
//!
//! One FIFO lane per priority level. Dispatch order is strict across lanes
//! (critical before high before medium before low) and strict FIFO within
//! a lane.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::domain::task::{Task, TaskPriority};

pub struct PriorityQueue {
    lanes: Mutex<HashMap<TaskPriority, VecDeque<Task>>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        let mut lanes = HashMap::new();
        for priority in TaskPriority::ORDERED {
            lanes.insert(priority, VecDeque::new());
        }
        Self {
            lanes: Mutex::new(lanes),
        }
    }

    /// Appends the task to the tail of its priority lane.
    pub fn enqueue(&self, task: Task) {
        let mut lanes = self.lanes.lock();
        lanes.entry(task.priority).or_default().push_back(task);
    }

    /// Head of the first non-empty lane in priority order.
    pub fn dequeue(&self) -> Option<Task> {
        let mut lanes = self.lanes.lock();
        for priority in TaskPriority::ORDERED {
            if let Some(task) = lanes.get_mut(&priority).and_then(VecDeque::pop_front) {
                return Some(task);
            }
        }
        None
    }

    /// First task in priority order for which `accept` holds. Tasks that
    /// fail the predicate keep their lane position, so a blocked task does
    /// not lose its slot.
    pub fn dequeue_if(&self, accept: impl Fn(&Task) -> bool) -> Option<Task> {
        let mut lanes = self.lanes.lock();
        for priority in TaskPriority::ORDERED {
            let Some(lane) = lanes.get_mut(&priority) else {
                continue;
            };
            if let Some(index) = lane.iter().position(&accept) {
                return lane.remove(index);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().values().map(VecDeque::len).sum()
    }

    pub fn len_by_priority(&self, priority: TaskPriority) -> usize {
        self.lanes.lock().get(&priority).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}
