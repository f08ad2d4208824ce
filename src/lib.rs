//! Deferreds that accumulate handler chains before their outcome is known and
//! replay them synchronously once a producer settles them.
//!
//! ```
//! use stay::{Deferred, Handlers};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let fetch = Deferred::<String, String>::new();
//! let parse = Deferred::<String, String>::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let next = parse.clone();
//! let first = log.clone();
//! fetch.done(move |body: &String| {
//!     first.borrow_mut().push(format!("fetched {}", body));
//!     next
//! });
//! let second = log.clone();
//! fetch.then(Handlers::new().on_resolved(move |parsed: &String| {
//!     second.borrow_mut().push(format!("parsed {}", parsed))
//! }));
//!
//! fetch.resolve("<body>".into()).unwrap();
//! parse.resolve("{}".into()).unwrap();
//! assert_eq!(*log.borrow(), vec!["fetched <body>", "parsed {}"]);
//! ```
pub mod deferred;
pub mod parallel;
pub mod settled;

pub use deferred::{Deferred, Flow, Handlers, Settlement, State};
pub use parallel::{parallel, Input, JoinPolicy, Joined, Parallel, Produced};
pub use settled::Settled;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("deferred is already {0}")]
    AlreadySettled(State),
    #[error("deferred was dropped before it settled")]
    Abandoned,
}

#[test]
fn test_error_display() {
    assert_eq!(
        Error::AlreadySettled(State::Rejected).to_string(),
        "deferred is already rejected"
    );
    assert_eq!(Error::Abandoned.to_string(), "deferred was dropped before it settled");
}
