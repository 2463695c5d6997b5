//! Connection drivers.
//!
//! The reactor owns the poll and the listener; a driver owns the connections
//! and decides how their state machines are stepped:
//!
//! - [`DirectDriver`]: the reactor steps a connection inline when its token
//!   becomes ready.
//! - [`CoroutineDriver`]: every connection is owned by a routine on a
//!   [`Scheduler`]; readiness wakes the routine and the scheduler runs after
//!   each batch of events.
//!
//! Both keep their connections in a generation-checked slab. A mio token
//! carries only the slot index (offset past the listener and waker tokens);
//! the generation lives in the table, so an event for a slot that has since
//! been emptied is dropped, and one for a recycled slot only causes a
//! spurious step that ends in `WouldBlock`.

use crate::arena::{Arena, Handle};
use crate::commands::CommandHandler;
use crate::connection::{Connection, Progress};
use crate::coroutine::{suspend, RoutineId, Scheduler};
use mio::{Registry, Token};
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Tokens below this are reserved for the listener and the waker
const FIRST_CONNECTION_TOKEN: usize = 2;

pub(crate) fn token_for(handle: Handle) -> Token {
    Token(handle.index() + FIRST_CONNECTION_TOKEN)
}

/// Resolves a token to the entry currently occupying its slot.
pub(crate) fn handle_for<T>(table: &Arena<T>, token: Token) -> Option<Handle> {
    token
        .0
        .checked_sub(FIRST_CONNECTION_TOKEN)
        .and_then(|index| table.handle_at(index))
}

/// How a reactor steps its connections.
pub(crate) trait Driver {
    /// Takes ownership of a new connection and registers it with the poll.
    fn open(&mut self, conn: Connection, registry: &Registry) -> io::Result<Token>;

    /// Handles a readiness event. `hangup` is set on error or when both
    /// directions are closed.
    fn ready(&mut self, token: Token, hangup: bool, registry: &Registry);

    /// Called once after every batch of events.
    fn after_events(&mut self, _registry: &Registry) {}

    /// Closes every connection.
    fn shutdown(&mut self, registry: &Registry);

    fn connection_count(&self) -> usize;
}

fn deregister(conn: &mut Connection, registry: &Registry) {
    if let Err(e) = conn.stream_mut().deregister(registry) {
        debug!(client = %conn.peer(), error = %e, "Deregister failed");
    }
}

/// Steps connections inline from the event loop.
#[derive(Debug)]
pub(crate) struct DirectDriver {
    connections: Arena<Connection>,
    handler: CommandHandler,
}

impl DirectDriver {
    pub(crate) fn new(handler: CommandHandler) -> Self {
        Self {
            connections: Arena::new(),
            handler,
        }
    }

    fn close(&mut self, handle: Handle, registry: &Registry) {
        if let Some(mut conn) = self.connections.remove(handle) {
            deregister(&mut conn, registry);
        }
    }
}

impl Driver for DirectDriver {
    fn open(&mut self, conn: Connection, registry: &Registry) -> io::Result<Token> {
        let handle = self.connections.insert(conn);
        let token = token_for(handle);
        if let Err(e) = self.connections[handle]
            .stream_mut()
            .register(registry, token)
        {
            self.connections.remove(handle);
            return Err(e);
        }
        Ok(token)
    }

    fn ready(&mut self, token: Token, hangup: bool, registry: &Registry) {
        let Some(handle) = handle_for(&self.connections, token) else {
            trace!(?token, "Event for a closed connection");
            return;
        };
        let conn = &mut self.connections[handle];

        if hangup {
            debug!(client = %conn.peer(), "Connection hung up");
            self.close(handle, registry);
            return;
        }

        match conn.advance(&self.handler) {
            Ok(Progress::Blocked) => {}
            Ok(Progress::Closed) => self.close(handle, registry),
            Err(e) => {
                warn!(client = %conn.peer(), error = %e, "Connection error");
                self.close(handle, registry);
            }
        }
    }

    fn shutdown(&mut self, registry: &Registry) {
        for handle in self.connections.handles() {
            self.close(handle, registry);
        }
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Per-connection entry in the coroutine driver's table.
struct Slot {
    routine: Option<RoutineId>,
    hangup: Rc<Cell<bool>>,
}

/// Runs each connection as a routine on a cooperative scheduler.
pub(crate) struct CoroutineDriver {
    scheduler: Scheduler,
    slots: Arena<Slot>,
    handler: CommandHandler,
    /// Routines deregister with their own registry handle when they finish
    registry: Rc<Registry>,
    /// Slots of routines that have finished since the last batch
    finished: Rc<RefCell<Vec<Handle>>>,
}

impl CoroutineDriver {
    pub(crate) fn new(handler: CommandHandler, registry: Registry) -> Self {
        Self {
            scheduler: Scheduler::new(),
            slots: Arena::new(),
            handler,
            registry: Rc::new(registry),
            finished: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn reap(&mut self) {
        let finished = std::mem::take(&mut *self.finished.borrow_mut());
        for handle in finished {
            self.slots.remove(handle);
        }
    }
}

/// Body of a connection routine: step until closed, park while blocked.
async fn serve(
    mut conn: Connection,
    handler: CommandHandler,
    hangup: Rc<Cell<bool>>,
    registry: Rc<Registry>,
    handle: Handle,
    finished: Rc<RefCell<Vec<Handle>>>,
) {
    loop {
        if hangup.get() {
            debug!(client = %conn.peer(), "Connection hung up");
            break;
        }
        match conn.advance(&handler) {
            Ok(Progress::Blocked) => suspend().await,
            Ok(Progress::Closed) => break,
            Err(e) => {
                warn!(client = %conn.peer(), error = %e, "Connection error");
                break;
            }
        }
    }

    deregister(&mut conn, &registry);
    finished.borrow_mut().push(handle);
}

impl Driver for CoroutineDriver {
    fn open(&mut self, mut conn: Connection, registry: &Registry) -> io::Result<Token> {
        let hangup = Rc::new(Cell::new(false));
        let handle = self.slots.insert(Slot {
            routine: None,
            hangup: Rc::clone(&hangup),
        });
        let token = token_for(handle);

        if let Err(e) = conn.stream_mut().register(registry, token) {
            self.slots.remove(handle);
            return Err(e);
        }

        let routine = self.scheduler.spawn(serve(
            conn,
            self.handler.clone(),
            hangup,
            Rc::clone(&self.registry),
            handle,
            Rc::clone(&self.finished),
        ));
        self.slots[handle].routine = Some(routine);
        Ok(token)
    }

    fn ready(&mut self, token: Token, hangup: bool, _registry: &Registry) {
        let Some(handle) = handle_for(&self.slots, token) else {
            trace!(?token, "Event for a closed connection");
            return;
        };
        let slot = &self.slots[handle];
        if hangup {
            slot.hangup.set(true);
        }
        if let Some(routine) = slot.routine {
            self.scheduler.wake(routine);
        }
    }

    fn after_events(&mut self, _registry: &Registry) {
        self.scheduler.run();
        self.reap();
    }

    fn shutdown(&mut self, _registry: &Registry) {
        // Let every routine observe the hangup and deregister itself
        for (_, slot) in self.slots.iter() {
            slot.hangup.set(true);
            if let Some(routine) = slot.routine {
                self.scheduler.wake(routine);
            }
        }
        self.scheduler.run();
        self.reap();

        self.scheduler.clear();
        self.slots.clear();
    }

    fn connection_count(&self) -> usize {
        self.slots.len()
    }
}
