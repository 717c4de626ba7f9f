//! Named queues: admission control limiting how many tasks assigned to one
//! queue may be active (ready+submitted+running) at once. The pool pops
//! from a queue's head as capacity frees up.

use std::collections::VecDeque;

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone)]
pub struct NamedQueue {
    pub limit: usize,
    waiting: VecDeque<String>,
    active: Vec<String>,
}

impl NamedQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            waiting: VecDeque::new(),
            active: Vec::new(),
        }
    }

    pub fn push_waiting(&mut self, task_id: String) {
        if !self.waiting.contains(&task_id) && !self.active.contains(&task_id) {
            self.waiting.push_back(task_id);
        }
    }

    /// Admit as many waiting task ids as current capacity allows.
    pub fn admit(&mut self) -> Vec<String> {
        let mut admitted = Vec::new();
        while self.active.len() < self.limit {
            let Some(task_id) = self.waiting.pop_front() else {
                break;
            };
            self.active.push(task_id.clone());
            admitted.push(task_id);
        }
        admitted
    }

    /// Free up a slot once `task_id` leaves the active (ready/submitted/running) set.
    pub fn release(&mut self, task_id: &str) {
        self.active.retain(|id| id != task_id);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_and_queues_the_rest() {
        let mut q = NamedQueue::new(1);
        q.push_waiting("a.1".to_string());
        q.push_waiting("b.1".to_string());
        let admitted = q.admit();
        assert_eq!(admitted, vec!["a.1".to_string()]);
        assert_eq!(q.waiting_count(), 1);
        q.release("a.1");
        let admitted = q.admit();
        assert_eq!(admitted, vec!["b.1".to_string()]);
    }
}
