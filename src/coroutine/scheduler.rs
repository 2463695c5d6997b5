//! Cooperative Routine Scheduler
//!
//! A single-threaded ring of routines. Each routine is a boxed future; a
//! routine gives up the thread by awaiting [`yield_now`], [`suspend`] or
//! [`Scheduler::schedule`], and the scheduler resumes the next runnable
//! routine in ring order.
//!
//! ## Ring
//!
//! ```text
//!            cursor
//!              │
//!              ▼
//!   ┌──> [ A ] ──> [ B ] ──> [ C ] ──┐
//!   └────────────────────────────────┘
//! ```
//!
//! Contexts live in an [`Arena`] and link to their neighbours by handle.
//! A routine's future is taken out of its slot while it is being polled, so
//! the routine may spawn, wake, schedule or cancel other routines (or itself)
//! without re-borrowing the ring.

use crate::arena::{Arena, Handle};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use tracing::trace;

type Routine = Pin<Box<dyn Future<Output = ()>>>;

/// Identifies a routine for the lifetime of its context.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(Handle);

impl fmt::Debug for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "routine{:?}", self.0)
    }
}

/// Wake flag shared between a context and its [`Waker`].
#[derive(Debug, Default)]
struct Notify {
    runnable: AtomicBool,
}

impl Notify {
    fn set(&self) {
        self.runnable.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.runnable.swap(false, Ordering::AcqRel)
    }
}

impl Wake for Notify {
    fn wake(self: Arc<Self>) {
        self.set();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.set();
    }
}

struct RoutineContext {
    /// `None` while the routine is being polled
    routine: Option<Routine>,
    notify: Arc<Notify>,
    prev: Handle,
    next: Handle,
}

#[derive(Default)]
struct Ring {
    contexts: Arena<RoutineContext>,
    /// Where the search for the next runnable routine starts
    cursor: Option<Handle>,
    /// The routine being polled
    current: Option<Handle>,
    /// Set by `schedule(target)`; runs before the ring order is consulted
    switch_to: Option<Handle>,
    running: bool,
}

impl Ring {
    fn link(&mut self, routine: Routine) -> Handle {
        let notify = Arc::new(Notify::default());
        notify.set();

        // Link just before the cursor, i.e. at the end of the current round
        let neighbours = self
            .cursor
            .map(|cursor| (self.contexts[cursor].prev, cursor));
        let handle = self.contexts.insert_with(|me| {
            let (prev, next) = neighbours.unwrap_or((me, me));
            RoutineContext {
                routine: Some(routine),
                notify,
                prev,
                next,
            }
        });

        match neighbours {
            Some((prev, next)) => {
                self.contexts[prev].next = handle;
                self.contexts[next].prev = handle;
            }
            None => self.cursor = Some(handle),
        }
        handle
    }

    fn unlink(&mut self, handle: Handle) -> Option<RoutineContext> {
        let ctx = self.contexts.remove(handle)?;

        if ctx.next == handle {
            self.cursor = None;
        } else {
            self.contexts[ctx.prev].next = ctx.next;
            self.contexts[ctx.next].prev = ctx.prev;
            if self.cursor == Some(handle) {
                self.cursor = Some(ctx.next);
            }
        }
        if self.switch_to == Some(handle) {
            self.switch_to = None;
        }
        Some(ctx)
    }

    /// Takes the next runnable routine out of its slot.
    fn take_next(&mut self) -> Option<(Handle, Routine, Waker)> {
        if let Some(target) = self.switch_to.take() {
            if let Some(picked) = self.take_if_runnable(target) {
                return Some(picked);
            }
        }

        let start = self.cursor?;
        let mut handle = start;
        loop {
            if let Some(picked) = self.take_if_runnable(handle) {
                return Some(picked);
            }
            handle = self.contexts[handle].next;
            if handle == start {
                return None;
            }
        }
    }

    fn take_if_runnable(&mut self, handle: Handle) -> Option<(Handle, Routine, Waker)> {
        let ctx = self.contexts.get_mut(handle)?;
        if ctx.routine.is_none() || !ctx.notify.take() {
            return None;
        }

        let routine = ctx.routine.take()?;
        let waker = Waker::from(Arc::clone(&ctx.notify));
        // Routines spawned while this one runs are linked just behind it
        self.cursor = Some(handle);
        self.current = Some(handle);
        Some((handle, routine, waker))
    }
}

/// A cooperative scheduler for routines sharing one thread.
///
/// Cloning the scheduler yields another handle to the same ring, which is how
/// routines reach it.
///
/// # Example
///
/// ```
/// use emberkv::coroutine::{yield_now, Scheduler};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let scheduler = Scheduler::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// for name in ["a", "b"] {
///     let log = Rc::clone(&log);
///     scheduler.spawn(async move {
///         log.borrow_mut().push(format!("{name}1"));
///         yield_now().await;
///         log.borrow_mut().push(format!("{name}2"));
///     });
/// }
///
/// scheduler.run();
/// assert_eq!(*log.borrow(), ["a1", "b1", "a2", "b2"]);
/// assert!(scheduler.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct Scheduler {
    ring: Rc<RefCell<Ring>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a routine to the ring. Its body starts on the first poll.
    pub fn spawn<F>(&self, routine: F) -> RoutineId
    where
        F: Future<Output = ()> + 'static,
    {
        let handle = self.ring.borrow_mut().link(Box::pin(routine));
        trace!(routine = ?handle, "Spawned routine");
        RoutineId(handle)
    }

    /// Runs routines in ring order until none is runnable.
    ///
    /// Returns the number of polls performed. Calling it from inside a
    /// routine does nothing.
    pub fn run(&self) -> usize {
        {
            let mut ring = self.ring.borrow_mut();
            if ring.running {
                return 0;
            }
            ring.running = true;
        }

        let mut polls = 0;
        loop {
            let next = self.ring.borrow_mut().take_next();
            let Some((handle, mut routine, waker)) = next else {
                break;
            };

            let mut cx = Context::from_waker(&waker);
            let finished = routine.as_mut().poll(&mut cx).is_ready();
            polls += 1;

            let mut ring = self.ring.borrow_mut();
            ring.current = None;
            let released = if finished {
                trace!(routine = ?handle, "Routine finished");
                ring.unlink(handle);
                Some(routine)
            } else if let Some(ctx) = ring.contexts.get_mut(handle) {
                ctx.routine = Some(routine);
                let next = ctx.next;
                ring.cursor = Some(next);
                None
            } else {
                // Cancelled itself while running
                Some(routine)
            };
            drop(ring);
            drop(released);
        }

        self.ring.borrow_mut().running = false;
        polls
    }

    /// Marks a routine runnable. Returns `false` if it no longer exists.
    pub fn wake(&self, id: RoutineId) -> bool {
        match self.ring.borrow().contexts.get(id.0) {
            Some(ctx) => {
                ctx.notify.set();
                true
            }
            None => false,
        }
    }

    /// Switches to `target` at the caller's next suspension point.
    ///
    /// The caller stays runnable and resumes in ring order afterwards.
    /// Scheduling the running routine itself completes immediately.
    pub fn schedule(&self, target: RoutineId) -> Switch {
        Switch {
            scheduler: self.clone(),
            target,
            switched: false,
        }
    }

    /// Removes a routine from the ring and drops it.
    pub fn cancel(&self, id: RoutineId) -> bool {
        let removed = self.ring.borrow_mut().unlink(id.0);
        let existed = removed.is_some();
        // Dropped outside the borrow: the routine's destructors may call back in
        drop(removed);
        if existed {
            trace!(routine = ?id.0, "Cancelled routine");
        }
        existed
    }

    /// Drops every routine.
    pub fn clear(&self) {
        let contexts = {
            let mut ring = self.ring.borrow_mut();
            ring.cursor = None;
            ring.switch_to = None;
            ring.contexts.drain()
        };
        drop(contexts);
    }

    /// The routine being polled, if called from inside one.
    pub fn current(&self) -> Option<RoutineId> {
        self.ring.borrow().current.map(RoutineId)
    }

    pub fn is_alive(&self, id: RoutineId) -> bool {
        self.ring.borrow().contexts.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.ring.borrow().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.borrow();
        f.debug_struct("Scheduler")
            .field("routines", &ring.contexts.len())
            .field("current", &ring.current)
            .finish()
    }
}

/// Future returned by [`Scheduler::schedule`].
#[must_use = "futures do nothing unless awaited"]
pub struct Switch {
    scheduler: Scheduler,
    target: RoutineId,
    switched: bool,
}

impl Future for Switch {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.switched {
            return Poll::Ready(());
        }

        {
            let mut ring = self.scheduler.ring.borrow_mut();
            if ring.current == Some(self.target.0) {
                return Poll::Ready(());
            }
            if let Some(target) = ring.contexts.get(self.target.0) {
                target.notify.set();
                ring.switch_to = Some(self.target.0);
            }
        }

        self.switched = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Gives other runnable routines a turn; resumes immediately if there are none.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Parks the calling routine until it is woken through
/// [`Scheduler::wake`] or its waker.
pub fn suspend() -> Suspend {
    Suspend { suspended: false }
}

/// Future returned by [`suspend`].
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend {
    suspended: bool,
}

impl Future for Suspend {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.suspended {
            return Poll::Ready(());
        }
        self.suspended = true;
        Poll::Pending
    }
}
