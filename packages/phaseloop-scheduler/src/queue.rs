use crate::task::Task;
use std::cell::RefCell;
use std::collections::VecDeque;

/// A simple FIFO queue for tasks.
/// The loop is single-threaded, so a RefCell<VecDeque> is enough.
#[derive(Default)]
pub struct TaskQueue {
    queue: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Runs tasks until the queue is empty, including tasks pushed while draining.
    /// Pops one at a time so no borrow is held while `run` executes.
    pub fn drain(&self, mut run: impl FnMut(Task)) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop() {
            run(task);
            ran += 1;
        }
        ran
    }
}
