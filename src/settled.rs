use crate::{Deferred, Error, Handlers, Settlement};
use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// A future over the outcome of a [`Deferred`].
///
/// The watcher is an ordinary triple at the tail of the queue, so it follows
/// relays like any other handler. If the chain it sits on is dropped before it
/// fires, the future resolves to [`Error::Abandoned`].
///
/// # Examples
///
/// ```
/// use stay::{Deferred, Settlement};
/// use futures::executor::block_on;
///
/// let d = Deferred::<i32, String>::new();
/// let settled = d.settled();
/// d.resolve(3).unwrap();
/// assert_eq!(block_on(settled), Ok(Settlement::Resolved(3)));
/// ```
#[derive(Debug)]
pub struct Settled<T, E> {
    watch: Rc<RefCell<Watch<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Watch<T, E> {
    value: Option<Settlement<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Shared by both slots of the watcher triple. Dropping the last copy without
/// a value taints the watch.
struct Notifier<T, E> {
    watch: Rc<RefCell<Watch<T, E>>>,
}

impl<T, E> Notifier<T, E> {
    fn notify(&self, settlement: Settlement<T, E>) {
        let waker = {
            let mut watch = self.watch.borrow_mut();
            watch.value = Some(settlement);
            std::mem::replace(&mut watch.waker, Err(WakerState::Tainted))
        };
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    fn drop(&mut self) {
        let waker = std::mem::replace(&mut self.watch.borrow_mut().waker, Err(WakerState::Tainted));
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static, P: 'static> Deferred<T, E, P> {
    pub fn settled(&self) -> Settled<T, E> {
        if let Some(settlement) = self.settlement() {
            let value = match settlement {
                Settlement::Resolved(value) => Settlement::Resolved((*value).clone()),
                Settlement::Rejected(error) => Settlement::Rejected((*error).clone()),
            };
            return Settled {
                watch: Rc::new(RefCell::new(Watch {
                    value: Some(value),
                    waker: Err(WakerState::Tainted),
                })),
            };
        }

        let watch = Rc::new(RefCell::new(Watch {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let on_resolved = Rc::new(Notifier {
            watch: watch.clone(),
        });
        let on_rejected = on_resolved.clone();
        self.then(
            Handlers::new()
                .on_resolved(move |value: &T| {
                    on_resolved.notify(Settlement::Resolved(value.clone()))
                })
                .on_rejected(move |error: &E| {
                    on_rejected.notify(Settlement::Rejected(error.clone()))
                }),
        );
        Settled { watch }
    }
}

impl<T, E> Future for Settled<T, E> {
    type Output = Result<Settlement<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut watch = self.watch.borrow_mut();
        match watch.value.take() {
            Some(value) => Poll::Ready(Ok(value)),
            None => match std::mem::replace(&mut watch.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => Poll::Ready(Err(Error::Abandoned)),
                _ => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, Error, Settlement};
    use futures::{executor::block_on, executor::LocalPool, task::LocalSpawnExt};
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn test_settled_resolve() {
        let d = Deferred::<String, String>::new();
        let settled = d.settled();
        d.resolve("🍓".into()).unwrap();
        assert_eq!(block_on(settled), Ok(Settlement::Resolved("🍓".to_string())));
    }

    #[test]
    fn test_settled_reject() {
        let d = Deferred::<(), String>::new();
        let settled = d.settled();
        d.reject("reject!!".into()).unwrap();
        assert_eq!(block_on(settled), Ok(Settlement::Rejected("reject!!".to_string())));
    }

    #[test]
    fn test_settled_after_settlement() {
        let d = Deferred::<i32, ()>::new();
        d.resolve(9).unwrap();
        assert_eq!(d.pending_handlers(), 0);
        assert_eq!(block_on(d.settled()), Ok(Settlement::Resolved(9)));
    }

    #[test]
    fn test_settled_follows_relay() {
        let a = Deferred::<i32, ()>::new();
        let b = Deferred::<i32, ()>::new();
        let relay_to = b.clone();
        a.done(move |_: &i32| relay_to);
        let settled = a.settled();
        a.resolve(1).unwrap();
        b.resolve(2).unwrap();
        assert_eq!(block_on(settled), Ok(Settlement::Resolved(2)));
    }

    #[test]
    fn test_settled_abandoned() {
        let d = Deferred::<i32, ()>::new();
        let settled = d.settled();
        std::mem::drop(d);
        assert_eq!(block_on(settled), Err(Error::Abandoned));
    }

    #[test]
    fn test_settled_wakes_waiting_task() {
        let mut pool = LocalPool::new();
        let d = Deferred::<i32, String>::new();
        let received = Rc::new(Cell::new(None));

        let settled = d.settled();
        let slot = received.clone();
        pool.spawner()
            .spawn_local(async move {
                slot.set(Some(settled.await));
            })
            .unwrap();

        pool.run_until_stalled();
        assert_eq!(received.take(), None);

        d.resolve(11).unwrap();
        pool.run_until_stalled();
        assert_eq!(received.take(), Some(Ok(Settlement::Resolved(11))));
    }
}
