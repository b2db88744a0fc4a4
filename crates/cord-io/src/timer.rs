//! Timer queue
//!
//! One-shot delayed callbacks. The reactor sweeps the queue once per tick;
//! the queue itself knows nothing about I/O, so the callback context is a
//! type parameter (`Reactor` in production, plain values in tests).

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Callback run when a task becomes due
pub type TimerCallback<C> = Box<dyn FnOnce(&mut C)>;

#[derive(Debug, Default)]
struct TimerFlags {
    cancelled: Cell<bool>,
    fired: Cell<bool>,
}

/// Cancellation handle returned by [`TimerQueue::schedule`]
#[derive(Debug, Clone)]
pub struct TimerHandle {
    flags: Rc<TimerFlags>,
}

impl TimerHandle {
    /// Cancel the task. A no-op once it has fired.
    pub fn cancel(&self) {
        if !self.flags.fired.get() {
            self.flags.cancelled.set(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.get()
    }

    pub fn has_fired(&self) -> bool {
        self.flags.fired.get()
    }
}

struct TimerTask<C> {
    delay: Duration,
    created: Instant,
    handle: TimerHandle,
    callback: TimerCallback<C>,
}

impl<C> TimerTask<C> {
    fn deadline(&self) -> Instant {
        self.created + self.delay
    }
}

/// A task taken off the queue by [`TimerQueue::sweep`]
pub struct DueTask<C> {
    handle: TimerHandle,
    callback: TimerCallback<C>,
}

impl<C> DueTask<C> {
    /// Run the callback unless it was cancelled after the sweep
    ///
    /// Returns whether the callback ran.
    pub fn run(self, ctx: &mut C) -> bool {
        if self.handle.is_cancelled() {
            return false;
        }
        self.handle.flags.fired.set(true);
        (self.callback)(ctx);
        true
    }
}

/// Queue of pending one-shot tasks
pub struct TimerQueue<C> {
    tasks: VecDeque<TimerTask<C>>,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TimerQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl<C> TimerQueue<C> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    /// Schedule `callback` to run once `delay` has elapsed
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut C) + 'static,
    {
        let handle = TimerHandle {
            flags: Rc::new(TimerFlags::default()),
        };
        self.tasks.push_back(TimerTask {
            delay,
            created: Instant::now(),
            handle: handle.clone(),
            callback: Box::new(callback),
        });
        handle
    }

    /// Remove every task due at `now`, in deadline order
    ///
    /// Cancelled tasks are dropped; the rest are kept in submission order.
    /// Tasks scheduled while the returned tasks run are not part of this sweep.
    pub fn sweep(&mut self, now: Instant) -> Vec<DueTask<C>> {
        let mut due = Vec::new();
        for _ in 0..self.tasks.len() {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            if task.handle.is_cancelled() {
                continue;
            }
            if now.saturating_duration_since(task.created) >= task.delay {
                due.push(task);
            } else {
                self.tasks.push_back(task);
            }
        }

        // stable: equal deadlines keep insertion order
        due.sort_by_key(TimerTask::deadline);
        due.into_iter()
            .map(|task| DueTask {
                handle: task.handle,
                callback: task.callback,
            })
            .collect()
    }

    /// Sweep and run due tasks against `ctx`, returning how many ran
    pub fn run_due(&mut self, now: Instant, ctx: &mut C) -> usize {
        let mut ran = 0;
        for task in self.sweep(now) {
            if task.run(ctx) {
                ran += 1;
            }
        }
        ran
    }

    /// Time from `now` until the nearest live deadline
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.tasks
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .map(|task| task.deadline().saturating_duration_since(now))
            .min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
