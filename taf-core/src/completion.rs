//! N-party asynchronous join barrier.
//!
//! A [`CompletionHandler`] aggregates an unknown number of asynchronous
//! parties. Each [`CompletionHandler::register`] call hands out a
//! [`CompletionParty`] that must later be consumed by exactly one of
//! [`CompletionParty::resolve`] or [`CompletionParty::reject`].
//! [`CompletionHandler::execute`] arms the barrier. The aggregate callback
//! fires at most once and never before arming: `reject` with the first error
//! seen, or `resolve` once every party resolved. Parties may complete before
//! arming; their results are evaluated when `execute` runs, which fires
//! synchronously if the outcome is already known.
//!
//! A party that is dropped without completing leaves the barrier pending.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type ResolveFn = Box<dyn FnOnce() + Send>;
type RejectFn<E> = Box<dyn FnOnce(E) + Send>;

struct Barrier<E> {
    parties: usize,
    resolved: usize,
    error: Option<E>,
    armed: bool,
    done: bool,
    on_resolve: Option<ResolveFn>,
    on_reject: Option<RejectFn<E>>,
}

enum Outcome<E> {
    Resolve(ResolveFn),
    Reject(RejectFn<E>, E),
}

impl<E> Barrier<E> {
    fn settle(&mut self) -> Option<Outcome<E>> {
        if !self.armed || self.done {
            return None;
        }
        if let Some(error) = self.error.take() {
            self.done = true;
            return self.on_reject.take().map(|callback| Outcome::Reject(callback, error));
        }
        if self.resolved >= self.parties {
            self.done = true;
            return self.on_resolve.take().map(Outcome::Resolve);
        }
        None
    }
}

type Shared<E> = Arc<Mutex<Barrier<E>>>;

fn with_barrier<E, R>(shared: &Shared<E>, f: impl FnOnce(&mut Barrier<E>) -> R) -> R {
    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Runs the aggregate callback outside the lock.
fn fire<E>(outcome: Option<Outcome<E>>) {
    match outcome {
        Some(Outcome::Resolve(callback)) => callback(),
        Some(Outcome::Reject(callback, error)) => callback(error),
        None => {}
    }
}

/// Aggregates the outcome of several asynchronous parties.
pub struct CompletionHandler<E> {
    shared: Shared<E>,
}

impl<E: Send + 'static> CompletionHandler<E> {
    pub fn new(on_resolve: impl FnOnce() + Send + 'static, on_reject: impl FnOnce(E) + Send + 'static) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Barrier {
                parties: 0,
                resolved: 0,
                error: None,
                armed: false,
                done: false,
                on_resolve: Some(Box::new(on_resolve)),
                on_reject: Some(Box::new(on_reject)),
            })),
        }
    }

    /// Adds one expected party.
    #[must_use = "a registered party must be resolved or rejected"]
    pub fn register(&self) -> CompletionParty<E> {
        with_barrier(&self.shared, |barrier| barrier.parties += 1);
        CompletionParty { shared: Arc::clone(&self.shared) }
    }

    /// Number of parties registered so far.
    #[must_use]
    pub fn parties(&self) -> usize {
        with_barrier(&self.shared, |barrier| barrier.parties)
    }

    /// Arms the barrier; no parties can be registered afterwards.
    pub fn execute(self) {
        let outcome = with_barrier(&self.shared, |barrier| {
            barrier.armed = true;
            barrier.settle()
        });
        fire(outcome);
    }
}

impl<E> fmt::Debug for CompletionHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parties, resolved, done) =
            with_barrier(&self.shared, |barrier| (barrier.parties, barrier.resolved, barrier.done));
        f.debug_struct("CompletionHandler")
            .field("parties", &parties)
            .field("resolved", &resolved)
            .field("done", &done)
            .finish()
    }
}

/// One party's private completion capability.
pub struct CompletionParty<E> {
    shared: Shared<E>,
}

impl<E> CompletionParty<E> {
    pub fn resolve(self) {
        let outcome = with_barrier(&self.shared, |barrier| {
            barrier.resolved += 1;
            barrier.settle()
        });
        fire(outcome);
    }

    /// Records `error` unless an earlier error or outcome exists.
    pub fn reject(self, error: E) {
        let outcome = with_barrier(&self.shared, |barrier| {
            if !barrier.done && barrier.error.is_none() {
                barrier.error = Some(error);
            }
            barrier.settle()
        });
        fire(outcome);
    }
}

impl<E> fmt::Debug for CompletionParty<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionParty").finish_non_exhaustive()
    }
}
