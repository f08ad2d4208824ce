//! The `Deferred` accumulates handler triples before its outcome is known and
//! replays them, in registration order, once a producer settles it.
//!
use crate::Error;
use log::{debug, trace, warn};
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

pub type OnResolved<T, E, P> = Box<dyn FnOnce(&T) -> Flow<T, E, P>>;
pub type OnRejected<T, E, P> = Box<dyn FnOnce(&E) -> Flow<T, E, P>>;
pub type OnProgress<P> = Rc<RefCell<dyn FnMut(&P)>>;

/// Settlement kind of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Resolved,
    Rejected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Resolved => "resolved",
            State::Rejected => "rejected",
        })
    }
}

/// The outcome a [`Deferred`] was settled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    Resolved(T),
    Rejected(E),
}

impl<T, E> Settlement<T, E> {
    pub fn state(&self) -> State {
        match self {
            Settlement::Resolved(_) => State::Resolved,
            Settlement::Rejected(_) => State::Rejected,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settlement::Resolved(value) => Ok(value),
            Settlement::Rejected(error) => Err(error),
        }
    }
}

/// What a settlement handler hands back to the draining loop.
///
/// Any handler returning `()` continues down the queue with the same
/// arguments. A handler returning a [`Deferred`] relays the rest of the queue
/// onto it.
pub enum Flow<T, E, P = ()> {
    Continue,
    Relay(Deferred<T, E, P>),
}

impl<T, E, P> From<()> for Flow<T, E, P> {
    fn from(_: ()) -> Self {
        Flow::Continue
    }
}

impl<T, E, P> From<Deferred<T, E, P>> for Flow<T, E, P> {
    fn from(next: Deferred<T, E, P>) -> Self {
        Flow::Relay(next)
    }
}

impl<T, E, P> From<Option<Deferred<T, E, P>>> for Flow<T, E, P> {
    fn from(next: Option<Deferred<T, E, P>>) -> Self {
        next.map_or(Flow::Continue, Flow::Relay)
    }
}

impl<T, E, P> fmt::Debug for Flow<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Continue => f.write_str("Continue"),
            Flow::Relay(next) => f.debug_tuple("Relay").field(next).finish(),
        }
    }
}

/// One handler triple. Every slot is optional; missing slots are skipped when
/// their settlement kind fires.
///
/// ```
/// use stay::{Deferred, Handlers};
///
/// let d = Deferred::<u8, String, u8>::new();
/// d.then(
///     Handlers::new()
///         .on_resolved(|v: &u8| println!("resolved with {}", v))
///         .on_rejected(|e: &String| println!("rejected with {}", e))
///         .on_progress(|p: &u8| println!("{}%", p)),
/// );
/// d.progress(50).unwrap();
/// d.resolve(1).unwrap();
/// ```
pub struct Handlers<T, E, P = ()> {
    resolved: Option<OnResolved<T, E, P>>,
    rejected: Option<OnRejected<T, E, P>>,
    progress: Option<OnProgress<P>>,
}

impl<T: 'static, E: 'static, P: 'static> Handlers<T, E, P> {
    pub fn new() -> Self {
        Handlers {
            resolved: None,
            rejected: None,
            progress: None,
        }
    }

    pub fn on_resolved<F, R>(mut self, f: F) -> Self
    where
        F: FnOnce(&T) -> R + 'static,
        R: Into<Flow<T, E, P>>,
    {
        let handler: OnResolved<T, E, P> =
            Box::new(move |value: &T| -> Flow<T, E, P> { f(value).into() });
        self.resolved = Some(handler);
        self
    }

    pub fn on_rejected<F, R>(mut self, f: F) -> Self
    where
        F: FnOnce(&E) -> R + 'static,
        R: Into<Flow<T, E, P>>,
    {
        let handler: OnRejected<T, E, P> =
            Box::new(move |error: &E| -> Flow<T, E, P> { f(error).into() });
        self.rejected = Some(handler);
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&P) + 'static,
    {
        let handler: OnProgress<P> = Rc::new(RefCell::new(f));
        self.progress = Some(handler);
        self
    }
}

impl<T: 'static, E: 'static, P: 'static> Default for Handlers<T, E, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, P> fmt::Debug for Handlers<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("resolved", &self.resolved.is_some())
            .field("rejected", &self.rejected.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

struct Inner<T, E, P> {
    handlers: VecDeque<Handlers<T, E, P>>,
    settlement: Option<Settlement<Rc<T>, Rc<E>>>,
}

impl<T, E, P> Inner<T, E, P> {
    fn state(&self) -> State {
        self.settlement
            .as_ref()
            .map_or(State::Pending, Settlement::state)
    }
}

/// A deferred outcome with a FIFO of handler triples.
///
/// `Deferred` is a handle: clones share the same queue and state. Everything
/// runs synchronously on the caller's stack; nothing is scheduled.
///
/// # Examples
///
/// ```
/// use stay::Deferred;
/// use std::{cell::Cell, rc::Rc};
///
/// let d = Deferred::<i32, String>::new();
/// let seen = Rc::new(Cell::new(0));
/// let first = seen.clone();
/// let second = seen.clone();
/// d.done(move |v: &i32| first.set(first.get() + v));
/// d.done(move |v: &i32| second.set(second.get() + v));
/// d.resolve(5).unwrap();
/// assert_eq!(seen.get(), 10);
/// assert!(d.is_resolved());
/// ```
pub struct Deferred<T, E, P = ()> {
    inner: Rc<RefCell<Inner<T, E, P>>>,
}

impl<T, E, P> Clone for Deferred<T, E, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E, P> fmt::Debug for Deferred<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Deferred")
                .field("state", &inner.state())
                .field("handlers", &inner.handlers.len())
                .finish(),
            Err(_) => f.debug_struct("Deferred").finish_non_exhaustive(),
        }
    }
}

impl<T: 'static, E: 'static, P: 'static> Default for Deferred<T, E, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static, P: 'static> Deferred<T, E, P> {
    pub fn new() -> Self {
        Deferred {
            inner: Rc::new(RefCell::new(Inner {
                handlers: VecDeque::new(),
                settlement: None,
            })),
        }
    }

    /// Appends a handler triple to the tail of the queue.
    ///
    /// Returns `self` so independent registrations can be chained. Chaining
    /// does not sequence onto the previous triple.
    pub fn then(&self, handlers: Handlers<T, E, P>) -> &Self {
        let mut inner = self.inner.borrow_mut();
        trace!("{:p}: registering {:?}", self.inner, handlers);
        inner.handlers.push_back(handlers);
        self
    }

    /// Registers a resolve handler, filling the resolved slot of the last
    /// queued triple when it is still empty.
    pub fn done<F, R>(&self, on_resolved: F) -> &Self
    where
        F: FnOnce(&T) -> R + 'static,
        R: Into<Flow<T, E, P>>,
    {
        let handler: OnResolved<T, E, P> =
            Box::new(move |value: &T| -> Flow<T, E, P> { on_resolved(value).into() });
        let mut inner = self.inner.borrow_mut();
        let fill = matches!(inner.handlers.back(), Some(last) if last.resolved.is_none());
        if fill {
            trace!("{:p}: filling resolved slot of the last triple", self.inner);
            if let Some(last) = inner.handlers.back_mut() {
                last.resolved = Some(handler);
            }
        } else {
            trace!("{:p}: registering resolved handler", self.inner);
            inner.handlers.push_back(Handlers {
                resolved: Some(handler),
                rejected: None,
                progress: None,
            });
        }
        self
    }

    /// Registers a reject handler, filling the rejected slot of the last
    /// queued triple when it is still empty.
    pub fn fail<F, R>(&self, on_rejected: F) -> &Self
    where
        F: FnOnce(&E) -> R + 'static,
        R: Into<Flow<T, E, P>>,
    {
        let handler: OnRejected<T, E, P> =
            Box::new(move |error: &E| -> Flow<T, E, P> { on_rejected(error).into() });
        let mut inner = self.inner.borrow_mut();
        let fill = matches!(inner.handlers.back(), Some(last) if last.rejected.is_none());
        if fill {
            trace!("{:p}: filling rejected slot of the last triple", self.inner);
            if let Some(last) = inner.handlers.back_mut() {
                last.rejected = Some(handler);
            }
        } else {
            trace!("{:p}: registering rejected handler", self.inner);
            inner.handlers.push_back(Handlers {
                resolved: None,
                rejected: Some(handler),
                progress: None,
            });
        }
        self
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.settle(Settlement::Resolved(Rc::new(value)))
    }

    pub fn reject(&self, error: E) -> Result<(), Error> {
        self.settle(Settlement::Rejected(Rc::new(error)))
    }

    /// Notifies the progress handler of the head triple, if it has one.
    ///
    /// The triple stays queued and the state stays pending. A progress
    /// handler that re-enters `progress` on the same triple is skipped.
    pub fn progress(&self, value: P) -> Result<(), Error> {
        let handler = {
            let inner = self.inner.borrow();
            if inner.settlement.is_some() {
                let state = inner.state();
                warn!("{:p}: progress reported on a {} deferred", self.inner, state);
                return Err(Error::AlreadySettled(state));
            }
            inner.handlers.front().and_then(|head| head.progress.clone())
        };
        let Some(handler) = handler else {
            trace!("{:p}: no progress handler at the head", self.inner);
            return Ok(());
        };
        let mut on_progress = match handler.try_borrow_mut() {
            Ok(on_progress) => on_progress,
            Err(_) => {
                warn!("{:p}: progress handler is already running", self.inner);
                return Ok(());
            }
        };
        (&mut *on_progress)(&value);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.state() != State::Pending
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state()
    }

    /// Number of triples still waiting in the queue.
    pub fn pending_handlers(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    pub(crate) fn settlement(&self) -> Option<Settlement<Rc<T>, Rc<E>>> {
        self.inner.borrow().settlement.clone()
    }

    fn settle(&self, settlement: Settlement<Rc<T>, Rc<E>>) -> Result<(), Error> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.settlement.is_some() {
                let state = inner.state();
                warn!(
                    "{:p}: ignoring {} on a deferred already {}",
                    self.inner,
                    settlement.state(),
                    state
                );
                return Err(Error::AlreadySettled(state));
            }
            debug!(
                "{:p}: {} with {} handler(s) queued",
                self.inner,
                settlement.state(),
                inner.handlers.len()
            );
            inner.settlement = Some(settlement.clone());
        }
        self.drain(settlement);
        Ok(())
    }

    // Pops before invoking and never holds the borrow across a handler, so a
    // handler may register on or inspect this deferred. Relays onto settled
    // successors loop here instead of recursing, carrying the inherited triples
    // as a detached batch.
    fn drain(&self, settlement: Settlement<Rc<T>, Rc<E>>) {
        let mut settlement = settlement;
        let mut batch: Option<VecDeque<Handlers<T, E, P>>> = None;
        loop {
            let next = match batch.as_mut() {
                Some(batch) => batch.pop_front(),
                None => self.inner.borrow_mut().handlers.pop_front(),
            };
            let Some(handlers) = next else {
                break;
            };
            let flow = match &settlement {
                Settlement::Resolved(value) => handlers.resolved.map(|f| f(&**value)),
                Settlement::Rejected(error) => handlers.rejected.map(|f| f(&**error)),
            };
            match flow {
                Some(Flow::Relay(successor)) => {
                    let rest = match batch.take() {
                        Some(rest) => rest,
                        None => std::mem::take(&mut self.inner.borrow_mut().handlers),
                    };
                    match successor.adopt(rest) {
                        Some((rest, outcome)) => {
                            batch = Some(rest);
                            settlement = outcome;
                        }
                        None => break,
                    }
                }
                Some(Flow::Continue) => trace!("{:p}: handler returned", self.inner),
                None => trace!(
                    "{:p}: no {} handler, skipping",
                    self.inner,
                    settlement.state()
                ),
            }
        }
    }

    /// Takes over a relayed queue. A pending successor queues the triples
    /// after its own; a settled one hands them back with its outcome so the
    /// caller fires them without touching the successor's own queue.
    fn adopt(
        &self,
        inherited: VecDeque<Handlers<T, E, P>>,
    ) -> Option<(VecDeque<Handlers<T, E, P>>, Settlement<Rc<T>, Rc<E>>)> {
        let mut inner = self.inner.borrow_mut();
        debug!(
            "relaying {} handler(s) onto {:p} ({})",
            inherited.len(),
            self.inner,
            inner.state()
        );
        match inner.settlement.clone() {
            Some(settlement) => Some((inherited, settlement)),
            None => {
                inner.handlers.extend(inherited);
                None
            }
        }
    }
}
