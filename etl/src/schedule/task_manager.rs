use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A task identified by a key.
pub trait MappedTask {
    /// Returns the key identifying this task.
    fn key(&self) -> String;
}

#[derive(Debug)]
struct Inner<T> {
    remain: VecDeque<T>,
    run: HashMap<String, T>,
    num: usize,
}

/// Tracks keyed tasks waiting to run and tasks currently running.
///
/// A task lives either in the FIFO remain queue or in the run set. Every operation is atomic with
/// respect to the others, and [`MappedTaskManager::size`] always equals the number of waiting
/// plus running tasks.
#[derive(Debug)]
pub struct MappedTaskManager<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: MappedTask + Clone> MappedTaskManager<T> {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                remain: VecDeque::new(),
                run: HashMap::new(),
                num: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a task to the remain queue.
    pub fn push_remain(&self, task: T) {
        let mut inner = self.lock();
        inner.remain.push_back(task);
        inner.num += 1;
    }

    /// Moves the oldest waiting task into the run set and returns it.
    ///
    /// Returns `None` when no task is waiting. A running task with the same key is replaced.
    pub fn pop_remain_and_add_run(&self) -> Option<T> {
        let mut inner = self.lock();
        let task = inner.remain.pop_front()?;
        let popped = task.clone();

        if inner.run.insert(task.key(), task).is_some() {
            inner.num -= 1;
        }

        Some(popped)
    }

    /// Removes a running task. Returns `false` if no task with that key is running.
    pub fn remove_run(&self, task: &T) -> bool {
        let mut inner = self.lock();
        if inner.run.remove(&task.key()).is_none() {
            return false;
        }

        inner.num -= 1;
        true
    }

    /// Moves a running task back to the end of the remain queue.
    ///
    /// Returns `false`, leaving the manager untouched, if no task with that key is running.
    pub fn remove_run_and_push_remain(&self, task: &T) -> bool {
        let mut inner = self.lock();
        let Some(task) = inner.run.remove(&task.key()) else {
            return false;
        };

        inner.remain.push_back(task);
        true
    }

    /// Returns `true` when no task is waiting or running.
    pub fn is_empty(&self) -> bool {
        self.lock().num == 0
    }

    /// Returns the number of waiting and running tasks.
    pub fn size(&self) -> usize {
        self.lock().num
    }

    /// Returns the number of waiting tasks.
    pub fn remain_len(&self) -> usize {
        self.lock().remain.len()
    }

    /// Returns the number of running tasks.
    pub fn run_len(&self) -> usize {
        self.lock().run.len()
    }
}

impl<T: MappedTask + Clone> Default for MappedTaskManager<T> {
    fn default() -> Self {
        Self::new()
    }
}
