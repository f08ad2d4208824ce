//! Joins any number of values, producers and deferreds into one deferred that
//! resolves once every input has settled.
//!
use crate::{Deferred, Handlers, Settlement};
use log::{debug, trace, warn};
use std::{cell::RefCell, fmt, rc::Rc};

pub type Producer<T, E, P> = Box<dyn FnOnce() -> Produced<T, E, P>>;

/// The deferred a join settles.
pub type Joined<T, E> = Deferred<Vec<Result<T, E>>, E>;

type Outcome<T, E> = Settlement<Vec<Result<T, E>>, E>;

/// One input to a join.
pub enum Input<T, E, P = ()> {
    Value(T),
    Deferred(Deferred<T, E, P>),
    Producer(Producer<T, E, P>),
}

/// What a producer hands back when invoked.
pub enum Produced<T, E, P = ()> {
    Value(T),
    Deferred(Deferred<T, E, P>),
}

impl<T: 'static, E: 'static, P: 'static> Input<T, E, P> {
    pub fn value(value: T) -> Self {
        Input::Value(value)
    }

    /// Wraps a zero-argument producer; it runs exactly once when the join
    /// starts.
    pub fn producer<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + 'static,
        R: Into<Produced<T, E, P>>,
    {
        Input::Producer(Box::new(move || -> Produced<T, E, P> { f().into() }))
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Input::Producer(_))
    }

    fn produce(self) -> Produced<T, E, P> {
        match self {
            Input::Value(value) => Produced::Value(value),
            Input::Deferred(deferred) => Produced::Deferred(deferred),
            Input::Producer(producer) => producer(),
        }
    }
}

impl<T, E, P> From<Deferred<T, E, P>> for Input<T, E, P> {
    fn from(deferred: Deferred<T, E, P>) -> Self {
        Input::Deferred(deferred)
    }
}

impl<T, E, P> From<Deferred<T, E, P>> for Produced<T, E, P> {
    fn from(deferred: Deferred<T, E, P>) -> Self {
        Produced::Deferred(deferred)
    }
}

impl<T: fmt::Debug, E, P> fmt::Debug for Input<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Input::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
            Input::Producer(_) => f.write_str("Producer"),
        }
    }
}

/// How a join treats a rejected input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// A rejection counts as completion and is kept as `Err` in its slot. The
    /// joined deferred only ever resolves.
    #[default]
    Settle,
    /// The first rejected input rejects the joined deferred with its error.
    FailFast,
}

/// Join options.
///
/// ```
/// use stay::{Deferred, Input, JoinPolicy, Parallel, State};
///
/// let pending = Deferred::<i32, String>::new();
/// let joined = Parallel::new()
///     .policy(JoinPolicy::FailFast)
///     .join(vec![Input::value(1), pending.clone().into()]);
/// pending.reject("nope".into()).unwrap();
/// assert_eq!(joined.state(), State::Rejected);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Parallel {
    policy: JoinPolicy,
}

impl Parallel {
    pub fn new() -> Parallel {
        Parallel {
            policy: JoinPolicy::default(),
        }
    }

    pub fn policy(&mut self, policy: JoinPolicy) -> &mut Parallel {
        self.policy = policy;
        self
    }

    /// Starts the join. Producers are invoked in input order before this
    /// returns; results keep input order whatever order the inputs settle in.
    pub fn join<T, E, P, I>(&self, inputs: I) -> Joined<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        P: 'static,
        I: IntoIterator<Item = Input<T, E, P>>,
    {
        let inputs: Vec<_> = inputs.into_iter().collect();
        let joined = Deferred::new();
        let junction = Rc::new(RefCell::new(Junction::new(inputs.len(), self.policy)));
        debug!("joining {} input(s) ({:?})", inputs.len(), self.policy);

        if inputs.is_empty() {
            complete(&joined, Settlement::Resolved(Vec::new()));
            return joined;
        }

        for (index, input) in inputs.into_iter().enumerate() {
            if input.is_producer() {
                trace!("invoking producer for input {}", index);
            }
            match input.produce() {
                Produced::Value(value) => record(&joined, &junction, index, Ok(value)),
                Produced::Deferred(deferred) => match deferred.settlement() {
                    Some(Settlement::Resolved(value)) => {
                        record(&joined, &junction, index, Ok((*value).clone()))
                    }
                    Some(Settlement::Rejected(error)) => {
                        record(&joined, &junction, index, Err((*error).clone()))
                    }
                    None => {
                        let (on_resolved, on_rejected) = (joined.clone(), joined.clone());
                        let (resolved_junction, rejected_junction) =
                            (junction.clone(), junction.clone());
                        deferred.then(
                            Handlers::new()
                                .on_resolved(move |value: &T| {
                                    let result = Ok(value.clone());
                                    record(&on_resolved, &resolved_junction, index, result)
                                })
                                .on_rejected(move |error: &E| {
                                    let result = Err(error.clone());
                                    record(&on_rejected, &rejected_junction, index, result)
                                }),
                        );
                    }
                },
            }
        }
        joined
    }
}

/// Joins `inputs` with [`JoinPolicy::Settle`].
///
/// ```
/// use stay::{parallel, Deferred, Input, Produced};
/// use std::{cell::RefCell, rc::Rc};
///
/// let b = Deferred::<i32, i32>::new();
/// let joined = parallel(vec![
///     Input::value(1),
///     b.clone().into(),
///     Input::producer(|| Produced::Value(3)),
/// ]);
///
/// let results = Rc::new(RefCell::new(Vec::new()));
/// let sink = results.clone();
/// joined.done(move |r: &Vec<Result<i32, i32>>| *sink.borrow_mut() = r.clone());
///
/// b.reject(2).unwrap();
/// assert_eq!(*results.borrow(), vec![Ok(1), Err(2), Ok(3)]);
/// ```
pub fn parallel<T, E, P, I>(inputs: I) -> Joined<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    P: 'static,
    I: IntoIterator<Item = Input<T, E, P>>,
{
    Parallel::new().join(inputs)
}

struct Junction<T, E> {
    results: Vec<Option<Result<T, E>>>,
    remaining: usize,
    policy: JoinPolicy,
    finished: bool,
}

impl<T, E> Junction<T, E> {
    fn new(count: usize, policy: JoinPolicy) -> Self {
        Junction {
            results: (0..count).map(|_| None).collect(),
            remaining: count,
            policy,
            finished: false,
        }
    }

    fn record(&mut self, index: usize, result: Result<T, E>) -> Option<Outcome<T, E>> {
        if self.finished {
            trace!("input {} settled after the join finished", index);
            return None;
        }
        let result = match (self.policy, result) {
            (JoinPolicy::FailFast, Err(error)) => {
                self.finished = true;
                return Some(Settlement::Rejected(error));
            }
            (_, result) => result,
        };
        if self.results[index].is_some() {
            return None;
        }
        self.results[index] = Some(result);
        self.remaining -= 1;
        trace!("input {} settled, {} remaining", index, self.remaining);
        if self.remaining > 0 {
            return None;
        }
        self.finished = true;
        Some(Settlement::Resolved(self.results.drain(..).flatten().collect()))
    }
}

fn record<T, E>(
    joined: &Joined<T, E>,
    junction: &RefCell<Junction<T, E>>,
    index: usize,
    result: Result<T, E>,
) where
    T: 'static,
    E: 'static,
{
    let outcome = junction.borrow_mut().record(index, result);
    if let Some(settlement) = outcome {
        complete(joined, settlement);
    }
}

fn complete<T, E>(joined: &Joined<T, E>, settlement: Outcome<T, E>)
where
    T: 'static,
    E: 'static,
{
    debug!("join finished: {}", settlement.state());
    let result = match settlement {
        Settlement::Resolved(results) => joined.resolve(results),
        Settlement::Rejected(error) => joined.reject(error),
    };
    if let Err(err) = result {
        warn!("could not settle joined deferred: {}", err);
    }
}
