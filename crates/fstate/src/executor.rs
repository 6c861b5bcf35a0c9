#![forbid(unsafe_code)]

//! Single-threaded cooperative executor for delayed mutations.
//!
//! Containers never block. A future or stream mutator is spawned on a
//! [`Spawner`], and its settle callback runs later, on the same thread,
//! whenever the host drives the [`Executor`].
//!
//! # Time
//!
//! Timers created with [`Executor::sleep`] / [`Spawner::sleep`] read from a
//! time source chosen at construction:
//!
//! - [`Executor::new`]: wall-clock time. [`Executor::run`] parks the thread
//!   until the next deadline.
//! - [`Executor::lab`]: a manual clock. Time only moves through
//!   [`Executor::advance`], which makes timer-driven tests deterministic.
//!
//! # Ordering
//!
//! `advance(d)` steps through every deadline inside the window in deadline
//! order (ties in creation order), running all ready tasks after each step.
//! A task woken by an earlier timer therefore settles before one woken by a
//! later timer, even when both fall inside the same `advance` call.
//!
//! # Failure Modes
//!
//! - Driving the executor from inside one of its own tasks panics on the
//!   internal `RefCell` borrow. Spawning from inside a task is fine.
//! - Spawning after the executor is dropped returns [`SpawnError`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use web_time::{Duration, Instant};

pub use futures::task::SpawnError;

#[derive(Debug, Clone, Copy)]
enum TimeSource {
    Real(Instant),
    Lab,
}

struct TimerQueue {
    source: TimeSource,
    lab_now: Cell<Duration>,
    next_seq: Cell<u64>,
    pending: RefCell<BTreeMap<(Duration, u64), Waker>>,
}

impl TimerQueue {
    fn new(source: TimeSource) -> Self {
        Self {
            source,
            lab_now: Cell::new(Duration::ZERO),
            next_seq: Cell::new(0),
            pending: RefCell::new(BTreeMap::new()),
        }
    }

    fn now(&self) -> Duration {
        match self.source {
            TimeSource::Real(epoch) => epoch.elapsed(),
            TimeSource::Lab => self.lab_now.get(),
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.pending
            .borrow()
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }

    /// Wake every timer due at `now`; returns how many fired.
    fn wake_due(&self, now: Duration) -> usize {
        let due: Vec<Waker> = {
            let mut pending = self.pending.borrow_mut();
            let later = pending.split_off(&(now, u64::MAX));
            std::mem::replace(&mut *pending, later).into_values().collect()
        };
        let fired = due.len();
        for waker in due {
            waker.wake();
        }
        fired
    }
}

/// Future returned by [`Executor::sleep`] and [`Spawner::sleep`].
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    timers: Rc<TimerQueue>,
    deadline: Duration,
    seq: u64,
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("seq", &self.seq)
            .finish()
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.timers.now() >= this.deadline {
            this.timers
                .pending
                .borrow_mut()
                .remove(&(this.deadline, this.seq));
            return Poll::Ready(());
        }
        this.timers
            .pending
            .borrow_mut()
            .insert((this.deadline, this.seq), cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.timers
            .pending
            .borrow_mut()
            .remove(&(self.deadline, self.seq));
    }
}

fn sleep_on(timers: &Rc<TimerQueue>, duration: Duration) -> Sleep {
    Sleep {
        deadline: timers.now() + duration,
        seq: timers.next_seq(),
        timers: Rc::clone(timers),
    }
}

/// Cloneable handle for spawning tasks onto an [`Executor`].
#[derive(Clone)]
pub struct Spawner {
    inner: LocalSpawner,
    timers: Rc<TimerQueue>,
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("now", &self.timers.now())
            .finish()
    }
}

impl Spawner {
    /// Queue `task` to run on the executor's thread.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> Result<(), SpawnError> {
        self.inner.spawn_local(task)
    }

    /// A future completing once `duration` has elapsed on the executor clock.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        sleep_on(&self.timers, duration)
    }

    /// Time elapsed on the executor clock since it was created.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.timers.now()
    }
}

/// Drives spawned tasks and timers on the current thread.
pub struct Executor {
    pool: RefCell<LocalPool>,
    spawner: Spawner,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("source", &self.spawner.timers.source)
            .field("now", &self.now())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// An executor whose timers follow wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(TimeSource::Real(Instant::now()))
    }

    /// An executor whose clock only moves through [`advance`](Self::advance).
    #[must_use]
    pub fn lab() -> Self {
        Self::with_source(TimeSource::Lab)
    }

    fn with_source(source: TimeSource) -> Self {
        let pool = LocalPool::new();
        let spawner = Spawner {
            inner: pool.spawner(),
            timers: Rc::new(TimerQueue::new(source)),
        };
        Self {
            pool: RefCell::new(pool),
            spawner,
        }
    }

    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self.spawner.timers.source, TimeSource::Lab)
    }

    #[must_use]
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> Result<(), SpawnError> {
        self.spawner.spawn(task)
    }

    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.spawner.sleep(duration)
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.spawner.timers.now()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.spawner.timers.pending.borrow().len()
    }

    /// Run every task that can make progress without time passing.
    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Let `duration` elapse, firing due timers in deadline order.
    ///
    /// On a lab executor this is instantaneous. On a real-time executor the
    /// thread sleeps until each deadline and then until the window ends.
    pub fn advance(&self, duration: Duration) {
        let target = self.now() + duration;
        self.run_until_stalled();
        while let Some(deadline) = self
            .spawner
            .timers
            .next_deadline()
            .filter(|deadline| *deadline <= target)
        {
            self.move_clock_to(deadline);
            self.spawner.timers.wake_due(deadline);
            self.run_until_stalled();
        }
        self.move_clock_to(target);
        self.run_until_stalled();
    }

    /// Run until no task is ready and no timer is pending.
    ///
    /// Tasks blocked on something other than a timer are left parked.
    pub fn run(&self) {
        self.run_until_stalled();
        while let Some(deadline) = self.spawner.timers.next_deadline() {
            let now = self.now();
            self.advance(deadline.saturating_sub(now));
        }
    }

    fn move_clock_to(&self, at: Duration) {
        let timers = &self.spawner.timers;
        match timers.source {
            TimeSource::Lab => {
                if at > timers.lab_now.get() {
                    timers.lab_now.set(at);
                }
            }
            TimeSource::Real(_) => {
                let now = timers.now();
                if at > now {
                    std::thread::sleep(at - now);
                }
            }
        }
    }
}
