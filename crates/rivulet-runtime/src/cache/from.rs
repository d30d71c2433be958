#![forbid(unsafe_code)]

//! Finite multicast sequences with a post-completion policy.
//!
//! A [`FromObservable<T>`] emits any number of values and then completes
//! once. What happens to observers after completion is fixed at
//! construction by a [`CompletionPolicy`]:
//!
//! | Policy | Existing observers | Observers attaching later |
//! |--------|--------------------|---------------------------|
//! | `ClearStrict` (default) | Detached | Refused with [`Error::ObservedAfterCompletion`] |
//! | `Clear` | Detached | Attached, never notified |
//! | `Cache` | Kept | Every value replayed in order |
//! | `Noop` | Kept | Attached, never notified |
//!
//! Detaching never happens inside [`FromContext::complete`]: it is handed to
//! the [`Scheduler`] every [`FromOptions`] carries and runs on its next turn.
//! Until then, observers attached before completion stay attached.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Emit after completion | Producer bug | `Err(EmitAfterCompletion)` |
//! | Complete twice | Producer bug | `Err(EmitAfterCompletion)` |
//! | Late attach under `ClearStrict` | Consumer bug | `Err(ObservedAfterCompletion)` from `activate`/`pipe_to` |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rivulet_core::{
    Error, Observable, ObservableContext, ObservableHook, Observer, Result, Scheduler,
};
use tracing::debug;

/// Treatment of observers once a [`FromObservable`] completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompletionPolicy {
    /// Detach everyone; refuse later observers.
    #[default]
    ClearStrict,
    /// Detach everyone; later observers are inert.
    Clear,
    /// Replay the full history to later observers.
    Cache,
    /// Later observers behave as on a live, silent source.
    Noop,
}

/// Lifecycle state of a [`FromObservable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FromState {
    /// Still emitting.
    Awaiting,
    /// Completed; irreversible.
    Complete,
}

/// Construction options.
///
/// The scheduler is mandatory: the clearing policies detach on its next
/// turn. [`rivulet_core::Immediate`] collapses that turn into the
/// `complete` call.
#[derive(Clone)]
pub struct FromOptions {
    /// Post-completion policy.
    pub policy: CompletionPolicy,
    /// Where detaching runs after completion.
    pub scheduler: Rc<dyn Scheduler>,
}

impl fmt::Debug for FromOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromOptions")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FromOptions {
    /// Options with the default policy, detaching on `scheduler`.
    #[must_use]
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            policy: CompletionPolicy::default(),
            scheduler: Rc::new(scheduler),
        }
    }

    /// Set the completion policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run detaching on `scheduler` instead.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Rc::new(scheduler);
        self
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

struct FromCore<T: 'static> {
    context: ObservableContext<T>,
    options: FromOptions,
    state: Cell<FromState>,
    history: RefCell<Vec<Rc<T>>>,
}

impl<T: 'static> FromCore<T> {
    fn is_complete(&self) -> bool {
        self.state.get() == FromState::Complete
    }

    fn replay_to(&self, observer: &Observer<T>) {
        let history = self.history.borrow().clone();
        for value in &history {
            if !self.context.emit_to(observer, value) {
                break;
            }
        }
    }

    fn detach_all(&self) {
        let Some(observable) = self.context.observable() else {
            return;
        };
        let observers = observable.observers();
        debug!(observers = observers.len(), "detaching observers after completion");
        for observer in &observers {
            observer.unobserve(&observable);
        }
    }
}

struct FromHook<T: 'static, H> {
    core: Rc<FromCore<T>>,
    user: H,
}

impl<T: 'static, H: ObservableHook<T>> ObservableHook<T> for FromHook<T, H> {
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        if !self.core.is_complete() {
            return self.user.on_observed(observer);
        }
        match self.core.options.policy {
            CompletionPolicy::ClearStrict => Err(Error::ObservedAfterCompletion),
            CompletionPolicy::Cache => {
                self.core.replay_to(observer);
                Ok(())
            }
            CompletionPolicy::Clear | CompletionPolicy::Noop => Ok(()),
        }
    }

    fn on_unobserved(&self, observer: &Observer<T>) {
        if !self.core.is_complete() {
            self.user.on_unobserved(observer);
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Producer side of a [`FromObservable`].
pub struct FromContext<T: 'static> {
    core: Rc<FromCore<T>>,
}

impl<T: 'static> fmt::Debug for FromContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromContext")
            .field("state", &self.core.state.get())
            .finish()
    }
}

impl<T: 'static> FromContext<T> {
    /// Emit `value` to every attached observer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmitAfterCompletion`] once completed.
    pub fn emit(&self, value: T) -> Result<()> {
        if self.core.is_complete() {
            return Err(Error::EmitAfterCompletion);
        }
        let value = Rc::new(value);
        if self.core.options.policy == CompletionPolicy::Cache {
            self.core.history.borrow_mut().push(Rc::clone(&value));
        }
        self.core.context.emit_ref(&value);
        Ok(())
    }

    /// Complete the sequence and apply the completion policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmitAfterCompletion`] if already completed.
    pub fn complete(&self) -> Result<()> {
        if self.core.state.replace(FromState::Complete) == FromState::Complete {
            return Err(Error::EmitAfterCompletion);
        }
        let policy = self.core.options.policy;
        debug!(?policy, observers = self.core.context.observer_count(), "from observable completed");
        if matches!(policy, CompletionPolicy::ClearStrict | CompletionPolicy::Clear) {
            let core = Rc::clone(&self.core);
            self.core.options.scheduler.defer(Box::new(move || core.detach_all()));
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FromState {
        self.core.state.get()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.core.context.is_observed()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.core.context.observer_count()
    }
}

// ---------------------------------------------------------------------------
// Observable
// ---------------------------------------------------------------------------

/// A finite multicast sequence.
pub struct FromObservable<T: 'static> {
    observable: Observable<T>,
    core: Rc<FromCore<T>>,
}

impl<T: 'static> Clone for FromObservable<T> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static> fmt::Debug for FromObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromObservable")
            .field("state", &self.core.state.get())
            .field("policy", &self.core.options.policy)
            .field("history", &self.core.history.borrow().len())
            .field("observers", &self.observable.observer_count())
            .finish()
    }
}

impl<T: 'static> FromObservable<T> {
    /// Create a sequence whose lifecycle hook is built by `factory`.
    ///
    /// The hook only sees observers that come and go before completion.
    pub fn new<H, F>(options: FromOptions, factory: F) -> Self
    where
        F: FnOnce(FromContext<T>) -> H,
        H: ObservableHook<T> + 'static,
    {
        let (observable, core) = Observable::new_with(|context| {
            let core = Rc::new(FromCore {
                context,
                options,
                state: Cell::new(FromState::Awaiting),
                history: RefCell::new(Vec::new()),
            });
            let user = factory(FromContext {
                core: Rc::clone(&core),
            });
            let hook = FromHook {
                core: Rc::clone(&core),
                user,
            };
            (hook, core)
        });
        Self { observable, core }
    }

    /// A sequence with an inert hook, plus its producer side.
    #[must_use]
    pub fn channel(options: FromOptions) -> (Self, FromContext<T>) {
        let observable = Self::new(options, |_| ());
        let context = FromContext {
            core: Rc::clone(&observable.core),
        };
        (observable, context)
    }

    /// A sequence that emits `values` to its first observer, then completes.
    pub fn from_values(values: impl IntoIterator<Item = T>, options: FromOptions) -> Self {
        let pending: Vec<T> = values.into_iter().collect();
        Self::new(options, move |context| ValuesHook {
            context,
            pending: RefCell::new(Some(pending)),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FromState {
        self.core.state.get()
    }

    /// Whether the sequence completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.core.is_complete()
    }

    /// The completion policy.
    #[must_use]
    pub fn policy(&self) -> CompletionPolicy {
        self.core.options.policy
    }

    /// Number of values kept for replay.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.core.history.borrow().len()
    }

    /// Subscribe with an active observer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObservedAfterCompletion`] under `ClearStrict` once
    /// completed, or the user hook's error before completion.
    pub fn pipe_to(&self, callback: impl Fn(&T, &Observable<T>) + 'static) -> Result<Observer<T>> {
        self.observable.pipe_to(callback)
    }

    /// The underlying observable.
    #[must_use]
    pub fn as_observable(&self) -> &Observable<T> {
        &self.observable
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observable.observer_count()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observable.is_observed()
    }
}

struct ValuesHook<T: 'static> {
    context: FromContext<T>,
    pending: RefCell<Option<Vec<T>>>,
}

impl<T: 'static> ObservableHook<T> for ValuesHook<T> {
    fn on_observed(&self, _observer: &Observer<T>) -> Result<()> {
        let Some(values) = self.pending.borrow_mut().take() else {
            return Ok(());
        };
        for value in values {
            self.context.emit(value)?;
        }
        self.context.complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::TaskQueue;

    fn recorder(observable: &FromObservable<i32>) -> Result<(Rc<RefCell<Vec<i32>>>, Observer<i32>)> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let observer = observable.pipe_to(move |value, _| sink.borrow_mut().push(*value))?;
        Ok((seen, observer))
    }

    fn options(policy: CompletionPolicy) -> (FromOptions, TaskQueue) {
        let queue = TaskQueue::new();
        (FromOptions::new(queue.clone()).with_policy(policy), queue)
    }

    #[test]
    fn cache_replays_history_in_order() {
        let (options, _queue) = options(CompletionPolicy::Cache);
        let (observable, context) = FromObservable::channel(options);
        for value in [1, 2, 3] {
            context.emit(value).expect("awaiting");
        }
        context.complete().expect("awaiting");

        let (seen, observer) = recorder(&observable).expect("cache accepts late observers");
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert!(observer.is_activated());
        assert_eq!(observable.history_len(), 3);
    }

    #[test]
    fn clear_strict_refuses_late_observers() {
        let queue = TaskQueue::new();
        let (observable, context) = FromObservable::<i32>::channel(FromOptions::new(queue.clone()));
        let (_seen, early) = recorder(&observable).expect("awaiting");
        context.emit(1).expect("awaiting");
        context.complete().expect("awaiting");
        assert!(early.is_observing(observable.as_observable()));

        queue.run_until_idle();
        assert!(!early.is_observing(observable.as_observable()));
        assert_eq!(observable.observer_count(), 0);
        assert_eq!(
            recorder(&observable).map(|_| ()),
            Err(Error::ObservedAfterCompletion)
        );
        assert_eq!(observable.observer_count(), 0);
    }

    #[test]
    fn clear_detaches_on_later_tick() {
        let queue = TaskQueue::new();
        let (observable, context) = FromObservable::<i32>::channel(
            FromOptions::new(queue.clone()).with_policy(CompletionPolicy::Clear),
        );
        let (_seen, _early) = recorder(&observable).expect("awaiting");
        context.complete().expect("awaiting");
        assert_eq!(observable.observer_count(), 1);

        queue.run_until_idle();
        assert_eq!(observable.observer_count(), 0);

        let (late_seen, _late) = recorder(&observable).expect("clear accepts late observers");
        assert!(late_seen.borrow().is_empty());
    }

    #[test]
    fn clearing_stays_attached_until_scheduler_turn() {
        for policy in [CompletionPolicy::ClearStrict, CompletionPolicy::Clear] {
            let (options, queue) = options(policy);
            let (observable, context) = FromObservable::<i32>::channel(options);
            let (seen, early) = recorder(&observable).expect("awaiting");
            context.emit(7).expect("awaiting");
            context.complete().expect("awaiting");

            assert_eq!(observable.observer_count(), 1, "{policy:?}");
            assert!(early.is_observing(observable.as_observable()));
            assert_eq!(queue.pending(), 1);

            queue.run_until_idle();
            assert_eq!(observable.observer_count(), 0, "{policy:?}");
            assert_eq!(*seen.borrow(), vec![7]);
        }
    }

    #[test]
    fn noop_keeps_observers() {
        let (options, queue) = options(CompletionPolicy::Noop);
        let (observable, context) = FromObservable::<i32>::channel(options);
        let (seen, _early) = recorder(&observable).expect("awaiting");
        context.emit(4).expect("awaiting");
        context.complete().expect("awaiting");
        let (late, _late) = recorder(&observable).expect("noop accepts");
        assert!(queue.is_idle());
        assert_eq!(observable.observer_count(), 2);
        assert_eq!(*seen.borrow(), vec![4]);
        assert!(late.borrow().is_empty());
    }

    #[test]
    fn emitting_after_completion_fails() {
        let (_observable, context) = FromObservable::<i32>::channel(FromOptions::new(TaskQueue::new()));
        context.complete().expect("awaiting");
        assert_eq!(context.emit(1), Err(Error::EmitAfterCompletion));
        assert_eq!(context.complete(), Err(Error::EmitAfterCompletion));
        assert_eq!(context.state(), FromState::Complete);
    }

    #[test]
    fn from_values_feeds_first_observer() {
        let (options, _queue) = options(CompletionPolicy::Cache);
        let observable = FromObservable::from_values([1, 2, 3], options);
        let (first, _first) = recorder(&observable).expect("first");
        assert_eq!(*first.borrow(), vec![1, 2, 3]);
        assert!(observable.is_complete());

        let (second, _second) = recorder(&observable).expect("cached");
        assert_eq!(*second.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn user_hook_silenced_after_completion() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut producer = None;
        let (options, _queue) = options(CompletionPolicy::Noop);
        let observable = FromObservable::<i32>::new(options, |context| {
            producer = Some(context);
            rivulet_core::FnHook::new(
                move |_: &Observer<i32>| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                |_: &Observer<i32>| {},
            )
        });
        let context = producer.expect("factory ran");
        let _before = observable.pipe_to(|_, _| {}).expect("awaiting");
        context.complete().expect("awaiting");
        let _after = observable.pipe_to(|_, _| {}).expect("noop accepts");
        assert_eq!(calls.get(), 1);
    }
}
