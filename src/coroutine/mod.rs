//! Coroutine Module
//!
//! Cooperative multitasking for the reactor's coroutine drive mode. Routines
//! are plain futures; they hand the thread to each other at explicit
//! suspension points and never run concurrently.
//!
//! ## Suspension Points
//!
//! - [`yield_now`]: stay runnable, let the next routine in the ring run
//! - [`suspend`]: park until woken
//! - [`Scheduler::schedule`]: run a specific routine next

pub mod scheduler;

pub use scheduler::{suspend, yield_now, RoutineId, Scheduler, Suspend, Switch, YieldNow};
