use std::collections::VecDeque;

/// Time-ordered list of deferred tasks. Each task is pending at most once.
#[derive(Debug, Clone)]
pub struct PollScheduler<T> {
    pending: VecDeque<(f64, T)>,
}

impl<T> Default for PollScheduler<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<T: PartialEq + Copy> PollScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts before the first entry due at or after `at`; an already
    /// pending entry for the same task is replaced.
    pub fn schedule(&mut self, task: T, at: f64) {
        self.cancel(task);
        let index = self
            .pending
            .iter()
            .position(|(time, _)| *time >= at)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, (at, task));
    }

    pub fn cancel(&mut self, task: T) {
        self.pending.retain(|(_, t)| *t != task);
    }

    pub fn is_scheduled(&self, task: T) -> bool {
        self.pending.iter().any(|(_, t)| *t == task)
    }

    /// Removes and returns every task due at `now`, earliest first. Tasks
    /// scheduled by the caller afterwards wait for the next call.
    pub fn take_due(&mut self, now: f64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some((time, task)) = self.pending.front().copied() {
            if time > now {
                break;
            }
            self.pending.pop_front();
            due.push(task);
        }
        due
    }

    pub fn next_time(&self) -> Option<f64> {
        self.pending.front().map(|(time, _)| *time)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Task {
        A,
        B,
        C,
    }

    #[test]
    fn test_tasks_run_in_time_order() {
        let mut scheduler = PollScheduler::new();
        scheduler.schedule(Task::A, 3.0);
        scheduler.schedule(Task::B, 1.0);
        scheduler.schedule(Task::C, 2.0);

        assert_eq!(scheduler.next_time(), Some(1.0));
        assert_eq!(scheduler.take_due(2.5), vec![Task::B, Task::C]);
        assert_eq!(scheduler.take_due(2.5), Vec::<Task>::new());
        assert_eq!(scheduler.take_due(3.0), vec![Task::A]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_equal_times_insert_before_existing() {
        let mut scheduler = PollScheduler::new();
        scheduler.schedule(Task::A, 1.0);
        scheduler.schedule(Task::B, 1.0);
        assert_eq!(scheduler.take_due(1.0), vec![Task::B, Task::A]);
    }

    #[test]
    fn test_reschedule_replaces_pending_entry() {
        let mut scheduler = PollScheduler::new();
        scheduler.schedule(Task::A, 1.0);
        scheduler.schedule(Task::A, 5.0);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.take_due(2.0).is_empty());
        assert!(scheduler.is_scheduled(Task::A));
    }

    #[test]
    fn test_cancel_after_reschedule() {
        let mut scheduler = PollScheduler::new();
        scheduler.schedule(Task::A, 0.0);
        assert_eq!(scheduler.take_due(1.0), vec![Task::A]);
        scheduler.schedule(Task::A, 1.0);
        assert!(scheduler.is_scheduled(Task::A));
        scheduler.cancel(Task::A);
        assert!(!scheduler.is_scheduled(Task::A));
    }
}
