#![forbid(unsafe_code)]

//! Finite-state observables: producers with a bounded lifecycle.
//!
//! A [`FiniteStateObservable<T, E>`] emits any number of `Next` values and
//! then exactly one terminal notification (`Complete`, `Error`, `Cancel`, or
//! a custom final state). The state machine is source-agnostic: a generator
//! receives the private [`FiniteStateContext`] and returns a [`SourceHook`]
//! that the state machine drives as observers come and go.
//!
//! # State Machine
//!
//! ```text
//!            next(v)
//!           ┌───────┐
//!           ▼       │
//!        ┌──────┐───┘
//!        │ Next │──── complete / error / cancel / finish ───▶ terminal
//!        └──────┘
//! ```
//!
//! # Source Driving
//!
//! | Mode | Resume | Pause |
//! |------|--------|-------|
//! | `Pausable` | every 0 → 1 observer transition while `Next` | every 1 → 0 transition while `Next` |
//! | `OneShot` | once, on the first observation ever | never |
//!
//! `release` runs exactly once: on the terminal transition (before the
//! terminal notification is dispatched), or when the state machine is
//! dropped while still `Next`. Attached observers keep the state machine
//! alive: it is only dropped once no handle and no observer refers to it.
//!
//! # Invariants
//!
//! 1. The state leaves `Next` at most once and never returns.
//! 2. Producer calls after termination return [`Error::Terminated`];
//!    observers are not informed.
//! 3. No `RefCell` borrow is held while the source hook or an observer runs.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Emit after terminal | Producer bug or race | `Err(Terminated { state })` |
//! | Context outlives observable | No handle or observer left | `Err(Terminated { state: "released" })` |
//! | Terminal before generator returns | Synchronous source | Source released as soon as it is installed |

pub mod sources;

use std::borrow::Cow;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rivulet_core::{
    Error, Matches, Notification, NotificationsContext, NotificationsObservable,
    NotificationsObserver, ObservableHook, Observer, Result,
};
use tracing::{debug, trace};

use crate::cancel::CancelReason;

/// State of a finite-state observable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FiniteState {
    /// Emitting values. The only non-terminal state.
    Next,
    /// Finished normally.
    Complete,
    /// Finished with an error.
    Error,
    /// Finished by cancellation.
    Cancel,
    /// Finished in a producer-defined final state.
    Custom(Cow<'static, str>),
}

impl FiniteState {
    /// A producer-defined final state.
    #[must_use]
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Custom(name.into())
    }

    /// Whether this state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next)
    }

    /// Lowercase state name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Next => "next",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancel => "cancel",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for FiniteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a finite-state notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiniteValue<T, E> {
    /// A regular value.
    Next(T),
    /// Normal completion.
    Complete,
    /// Producer failure.
    Error(E),
    /// Cancellation with its reason.
    Cancel(CancelReason),
    /// A custom final state was reached.
    Finished,
}

impl<T, E> FiniteValue<T, E> {
    /// The value of a `Next` payload.
    #[must_use]
    pub fn as_next(&self) -> Option<&T> {
        match self {
            Self::Next(value) => Some(value),
            _ => None,
        }
    }

    /// The error of an `Error` payload.
    #[must_use]
    pub fn as_error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// How the source is driven by observer transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Pull-based: paused whenever nobody observes.
    Pausable,
    /// Push-based: started once, never paused.
    #[default]
    OneShot,
}

/// What late observers receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Replay {
    /// Nothing.
    None,
    /// The terminal notification, once terminal.
    #[default]
    Final,
    /// Every notification so far, in order.
    All,
}

/// Construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FiniteStateOptions {
    /// Source driving mode.
    pub mode: Mode,
    /// Replay policy for late observers.
    pub replay: Replay,
    /// Drop the replay history once terminal and unobserved.
    pub clear_history_when_unobserved: bool,
}

impl FiniteStateOptions {
    /// Options for a pull-based source.
    #[must_use]
    pub fn pausable() -> Self {
        Self::default().with_mode(Mode::Pausable)
    }

    /// Options for a push-based source.
    #[must_use]
    pub fn one_shot() -> Self {
        Self::default().with_mode(Mode::OneShot)
    }

    /// Set the driving mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the replay policy.
    #[must_use]
    pub fn with_replay(mut self, replay: Replay) -> Self {
        self.replay = replay;
        self
    }

    /// Drop the replay history once terminal and unobserved.
    #[must_use]
    pub fn clear_history_when_unobserved(mut self, clear: bool) -> Self {
        self.clear_history_when_unobserved = clear;
        self
    }
}

/// The underlying resource driven by a [`FiniteStateObservable`].
pub trait SourceHook {
    /// Start or continue producing.
    fn resume(&self) {}

    /// Stop pulling until the next `resume`.
    fn pause(&self) {}

    /// Free the resource. Called exactly once.
    fn release(&self) {}
}

impl SourceHook for () {}

impl<S: SourceHook + ?Sized> SourceHook for Rc<S> {
    fn resume(&self) {
        (**self).resume();
    }

    fn pause(&self) {
        (**self).pause();
    }

    fn release(&self) {
        (**self).release();
    }
}

impl<S: SourceHook + ?Sized> SourceHook for Box<S> {
    fn resume(&self) {
        (**self).resume();
    }

    fn pause(&self) {
        (**self).pause();
    }

    fn release(&self) {
        (**self).release();
    }
}

/// Notification emitted by a finite-state observable.
pub type FiniteNotification<T, E> = Notification<FiniteState, FiniteValue<T, E>>;

/// Observer handle returned by the subscription helpers.
pub type FiniteObserver<T, E> = NotificationsObserver<FiniteState, FiniteValue<T, E>>;

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

struct FiniteCore<T: 'static, E: 'static> {
    context: NotificationsContext<FiniteState, FiniteValue<T, E>>,
    options: FiniteStateOptions,
    state: RefCell<FiniteState>,
    history: RefCell<Vec<Rc<FiniteNotification<T, E>>>>,
    source: OnceCell<Box<dyn SourceHook>>,
    running: Cell<bool>,
    started: Cell<bool>,
    released: Cell<bool>,
}

impl<T: 'static, E: 'static> FiniteCore<T, E> {
    fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    fn ensure_next(&self) -> Result<()> {
        let state = self.state.borrow();
        if state.is_terminal() {
            return Err(Error::terminated(&*state));
        }
        Ok(())
    }

    fn push_next(&self, value: T) -> Result<()> {
        self.ensure_next()?;
        let notification = Rc::new(Notification::new(FiniteState::Next, FiniteValue::Next(value)));
        if self.options.replay == Replay::All {
            self.history.borrow_mut().push(Rc::clone(&notification));
        }
        self.context.emit_ref(&notification);
        Ok(())
    }

    fn terminate(&self, state: FiniteState, value: FiniteValue<T, E>) -> Result<()> {
        self.ensure_next()?;
        *self.state.borrow_mut() = state.clone();
        debug!(
            state = %state,
            observers = self.context.observer_count(),
            "finite source terminated"
        );
        self.release();

        let notification = Rc::new(Notification::new(state, value));
        if self.options.replay != Replay::None {
            self.history.borrow_mut().push(Rc::clone(&notification));
        }
        self.context.emit_ref(&notification);
        self.prune_history();
        Ok(())
    }

    fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        self.running.set(false);
        if let Some(source) = self.source.get() {
            trace!("releasing finite source");
            source.release();
        }
    }

    fn replay_to(&self, observer: &Observer<FiniteNotification<T, E>>) {
        let history = self.history.borrow().clone();
        for notification in &history {
            if !self.context.emit_to(observer, notification) {
                break;
            }
        }
    }

    fn on_attach(&self) {
        if self.is_terminal() {
            return;
        }
        let Some(source) = self.source.get() else {
            return;
        };
        match self.options.mode {
            Mode::Pausable => {
                if !self.running.get() && self.context.is_observed() {
                    self.running.set(true);
                    trace!("resuming pausable source");
                    source.resume();
                }
            }
            Mode::OneShot => {
                if !self.started.replace(true) {
                    trace!("starting one-shot source");
                    source.resume();
                }
            }
        }
    }

    fn on_detach(&self) {
        if self.is_terminal() {
            self.prune_history();
            return;
        }
        if self.options.mode == Mode::Pausable && self.running.get() && !self.context.is_observed()
        {
            self.running.set(false);
            if let Some(source) = self.source.get() {
                trace!("pausing source");
                source.pause();
            }
        }
    }

    fn prune_history(&self) {
        if self.options.clear_history_when_unobserved
            && self.is_terminal()
            && !self.context.is_observed()
        {
            let cleared = std::mem::take(&mut *self.history.borrow_mut());
            drop(cleared);
        }
    }
}

impl<T: 'static, E: 'static> Drop for FiniteCore<T, E> {
    fn drop(&mut self) {
        if !self.released.get() {
            debug!("finite source dropped before termination");
        }
        self.release();
    }
}

/// Installed on the notifications observable; observers keep the core alive
/// through it.
struct FiniteHook<T: 'static, E: 'static> {
    core: Rc<FiniteCore<T, E>>,
}

impl<T: 'static, E: 'static> ObservableHook<FiniteNotification<T, E>> for FiniteHook<T, E> {
    fn on_observed(&self, observer: &Observer<FiniteNotification<T, E>>) -> Result<()> {
        self.core.replay_to(observer);
        self.core.on_attach();
        Ok(())
    }

    fn on_unobserved(&self, _observer: &Observer<FiniteNotification<T, E>>) {
        self.core.on_detach();
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// The producer side of a [`FiniteStateObservable`].
///
/// Handed to the generator only. It holds a weak reference: once no handle
/// and no observer refers to the observable, every producer call fails with
/// `Terminated { state: "released" }`.
pub struct FiniteStateContext<T: 'static, E: 'static> {
    core: Weak<FiniteCore<T, E>>,
}

impl<T: 'static, E: 'static> Clone for FiniteStateContext<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for FiniteStateContext<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiniteStateContext")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: 'static, E: 'static> FiniteStateContext<T, E> {
    fn core(&self) -> Result<Rc<FiniteCore<T, E>>> {
        self.core
            .upgrade()
            .ok_or_else(|| Error::terminated("released"))
    }

    /// Emit a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Terminated`] once the observable is terminal.
    pub fn next(&self, value: T) -> Result<()> {
        self.core()?.push_next(value)
    }

    /// Terminate normally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Terminated`] once the observable is terminal.
    pub fn complete(&self) -> Result<()> {
        self.core()?
            .terminate(FiniteState::Complete, FiniteValue::Complete)
    }

    /// Terminate with `error`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Terminated`] once the observable is terminal.
    pub fn error(&self, error: E) -> Result<()> {
        self.core()?
            .terminate(FiniteState::Error, FiniteValue::Error(error))
    }

    /// Terminate by cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Terminated`] once the observable is terminal.
    pub fn cancel(&self, reason: impl Into<CancelReason>) -> Result<()> {
        self.core()?
            .terminate(FiniteState::Cancel, FiniteValue::Cancel(reason.into()))
    }

    /// Terminate in a custom final state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Terminated`] once the observable is terminal.
    pub fn finish(&self, name: impl Into<Cow<'static, str>>) -> Result<()> {
        self.core()?
            .terminate(FiniteState::custom(name), FiniteValue::Finished)
    }

    /// Current state, or `None` once the observable is gone.
    #[must_use]
    pub fn state(&self) -> Option<FiniteState> {
        self.core
            .upgrade()
            .map(|core| core.state.borrow().clone())
    }

    /// Whether the observable is alive and still in `Next`.
    #[must_use]
    pub fn is_next(&self) -> bool {
        self.core.upgrade().is_some_and(|core| !core.is_terminal())
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.context.is_observed())
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.core
            .upgrade()
            .map_or(0, |core| core.context.observer_count())
    }

    /// Whether at least one attached observer would receive `state`.
    #[must_use]
    pub fn is_observed_for(&self, state: FiniteState) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.context.is_observed_for(state))
    }
}

// ---------------------------------------------------------------------------
// Observable
// ---------------------------------------------------------------------------

/// An observable with a bounded lifecycle.
///
/// Cloning hands out another handle to the same state machine.
pub struct FiniteStateObservable<T: 'static, E: 'static> {
    observable: NotificationsObservable<FiniteState, FiniteValue<T, E>>,
    core: Rc<FiniteCore<T, E>>,
}

impl<T: 'static, E: 'static> Clone for FiniteStateObservable<T, E> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for FiniteStateObservable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiniteStateObservable")
            .field("state", &*self.core.state.borrow())
            .field("mode", &self.core.options.mode)
            .field("observers", &self.core.context.observer_count())
            .finish()
    }
}

impl<T: 'static, E: 'static> FiniteStateObservable<T, E> {
    /// Create a finite-state observable driven by the source `generator`
    /// returns.
    ///
    /// `generator` runs once, synchronously, and receives the only
    /// [`FiniteStateContext`] for this observable.
    pub fn new<S, G>(options: FiniteStateOptions, generator: G) -> Self
    where
        G: FnOnce(FiniteStateContext<T, E>) -> S,
        S: SourceHook + 'static,
    {
        let (observable, core) = NotificationsObservable::new_with(|context| {
            let core = Rc::new(FiniteCore {
                context,
                options,
                state: RefCell::new(FiniteState::Next),
                history: RefCell::new(Vec::new()),
                source: OnceCell::new(),
                running: Cell::new(false),
                started: Cell::new(false),
                released: Cell::new(false),
            });
            let hook = FiniteHook {
                core: Rc::clone(&core),
            };
            (hook, core)
        });

        let source = generator(FiniteStateContext {
            core: Rc::downgrade(&core),
        });
        // Written only here.
        let _ = core.source.set(Box::new(source));
        if core.released.get() {
            if let Some(source) = core.source.get() {
                trace!("source terminated during construction");
                source.release();
            }
        }
        Self { observable, core }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FiniteState {
        self.core.state.borrow().clone()
    }

    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    /// The driving mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.core.options.mode
    }

    /// The construction options.
    #[must_use]
    pub fn options(&self) -> FiniteStateOptions {
        self.core.options
    }

    /// Number of notifications kept for replay.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.core.history.borrow().len()
    }

    /// The underlying notifications observable.
    #[must_use]
    pub fn as_notifications(&self) -> &NotificationsObservable<FiniteState, FiniteValue<T, E>> {
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

    /// Attached observers that would receive `state`.
    #[must_use]
    pub fn matches(&self, state: FiniteState) -> Matches<FiniteState, FiniteValue<T, E>> {
        self.observable.matches(state)
    }

    /// Subscribe to notifications of `state`.
    ///
    /// # Errors
    ///
    /// Never fails; the signature follows [`NotificationsObservable::on`].
    pub fn on(
        &self,
        state: FiniteState,
        callback: impl Fn(&FiniteValue<T, E>) + 'static,
    ) -> Result<FiniteObserver<T, E>> {
        self.observable.on(state, callback)
    }

    /// Subscribe to every notification.
    ///
    /// # Errors
    ///
    /// Never fails; the signature follows [`NotificationsObservable::pipe_to`].
    pub fn pipe_to(
        &self,
        callback: impl Fn(&FiniteNotification<T, E>) + 'static,
    ) -> Result<FiniteObserver<T, E>> {
        self.observable.pipe_to(callback)
    }

    /// Subscribe to values.
    ///
    /// # Errors
    ///
    /// Never fails; see [`FiniteStateObservable::on`].
    pub fn on_next(&self, callback: impl Fn(&T) + 'static) -> Result<FiniteObserver<T, E>> {
        self.on(FiniteState::Next, move |value| {
            if let FiniteValue::Next(value) = value {
                callback(value);
            }
        })
    }

    /// Subscribe to normal completion.
    ///
    /// # Errors
    ///
    /// Never fails; see [`FiniteStateObservable::on`].
    pub fn on_complete(&self, callback: impl Fn() + 'static) -> Result<FiniteObserver<T, E>> {
        self.on(FiniteState::Complete, move |_| callback())
    }

    /// Subscribe to producer failure.
    ///
    /// # Errors
    ///
    /// Never fails; see [`FiniteStateObservable::on`].
    pub fn on_error(&self, callback: impl Fn(&E) + 'static) -> Result<FiniteObserver<T, E>> {
        self.on(FiniteState::Error, move |value| {
            if let FiniteValue::Error(error) = value {
                callback(error);
            }
        })
    }

    /// Subscribe to cancellation.
    ///
    /// # Errors
    ///
    /// Never fails; see [`FiniteStateObservable::on`].
    pub fn on_cancel(
        &self,
        callback: impl Fn(&CancelReason) + 'static,
    ) -> Result<FiniteObserver<T, E>> {
        self.on(FiniteState::Cancel, move |value| {
            if let FiniteValue::Cancel(reason) = value {
                callback(reason);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSource {
        log: RefCell<Vec<&'static str>>,
    }

    impl RecordingSource {
        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.log.borrow_mut())
        }
    }

    impl SourceHook for RecordingSource {
        fn resume(&self) {
            self.log.borrow_mut().push("resume");
        }

        fn pause(&self) {
            self.log.borrow_mut().push("pause");
        }

        fn release(&self) {
            self.log.borrow_mut().push("release");
        }
    }

    type Fixture = (
        FiniteStateObservable<u32, String>,
        FiniteStateContext<u32, String>,
        Rc<RecordingSource>,
    );

    fn fixture(options: FiniteStateOptions) -> Fixture {
        let source_log = Rc::new(RecordingSource::default());
        let source = Rc::clone(&source_log);
        let mut slot = None;
        let observable = FiniteStateObservable::new(options, |context| {
            slot = Some(context);
            source
        });
        (observable, slot.expect("generator ran"), source_log)
    }

    fn collect(observable: &FiniteStateObservable<u32, String>) -> (Rc<RefCell<Vec<String>>>, FiniteObserver<u32, String>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let observer = observable
            .pipe_to(move |notification| {
                let entry = match notification.value() {
                    FiniteValue::Next(value) => format!("next:{value}"),
                    _ => notification.name().to_string(),
                };
                sink.borrow_mut().push(entry);
            })
            .expect("finite hook accepts observers");
        (seen, observer)
    }

    #[test]
    fn pausable_follows_observer_transitions() {
        let (observable, _context, source_log) = fixture(FiniteStateOptions::pausable());
        assert!(source_log.take().is_empty());

        let first = observable.on_next(|_| {}).expect("attach");
        let second = observable.on_next(|_| {}).expect("attach");
        assert_eq!(source_log.take(), vec!["resume"]);

        first.deactivate();
        assert!(source_log.take().is_empty());
        second.deactivate();
        assert_eq!(source_log.take(), vec!["pause"]);

        second.activate().expect("reattach");
        assert_eq!(source_log.take(), vec!["resume"]);
    }

    #[test]
    fn one_shot_resumes_once_and_never_pauses() {
        let (observable, _context, source_log) = fixture(FiniteStateOptions::one_shot());
        let observer = observable.on_next(|_| {}).expect("attach");
        observer.deactivate();
        observer.activate().expect("reattach");
        assert_eq!(source_log.take(), vec!["resume"]);
    }

    #[test]
    fn terminal_state_is_final() {
        let (observable, context, source_log) = fixture(FiniteStateOptions::default());
        let (seen, _observer) = collect(&observable);

        context.next(1).expect("live");
        context.error("boom".to_string()).expect("live");

        assert_eq!(
            context.next(2),
            Err(Error::Terminated {
                state: "error".into()
            })
        );
        assert!(context.complete().is_err());
        assert_eq!(observable.state(), FiniteState::Error);
        assert_eq!(*seen.borrow(), vec!["next:1", "error"]);
        assert_eq!(source_log.take(), vec!["resume", "release"]);
    }

    #[test]
    fn release_runs_once() {
        let (observable, context, source_log) = fixture(FiniteStateOptions::default());
        context.cancel("stop").expect("live");
        drop(observable);
        assert_eq!(source_log.take(), vec!["release"]);
        assert_eq!(
            context.next(1),
            Err(Error::Terminated {
                state: "released".into()
            })
        );
    }

    #[test]
    fn observers_keep_dropped_handle_alive() {
        let (observable, context, source_log) = fixture(FiniteStateOptions::pausable());
        let (seen, observer) = collect(&observable);
        drop(observable);
        assert_eq!(source_log.take(), vec!["resume"]);

        context.next(1).expect("observed source stays live");
        context.complete().expect("observed source stays live");
        assert_eq!(*seen.borrow(), vec!["next:1", "complete"]);
        assert_eq!(source_log.take(), vec!["release"]);
        observer.deactivate();
        drop(observer);
        assert_eq!(context.state(), None);
    }

    #[test]
    fn unreferenced_live_observable_releases() {
        let (observable, context, source_log) = fixture(FiniteStateOptions::pausable());
        let observer = observable.on_next(|_| {}).expect("attach");
        drop(observable);
        assert_eq!(source_log.take(), vec!["resume"]);
        assert_eq!(context.state(), Some(FiniteState::Next));

        observer.deactivate();
        assert_eq!(source_log.take(), vec!["pause"]);
        drop(observer);
        assert_eq!(source_log.take(), vec!["release"]);
        assert_eq!(context.state(), None);
        assert_eq!(
            context.next(1),
            Err(Error::Terminated {
                state: "released".into()
            })
        );
    }

    #[test]
    fn final_replay_reaches_late_observers() {
        let (observable, context, _source_log) = fixture(FiniteStateOptions::default());
        context.next(1).expect("live");
        context.complete().expect("live");

        let (seen, _observer) = collect(&observable);
        assert_eq!(*seen.borrow(), vec!["complete"]);

        let completions = Rc::new(Cell::new(0));
        let sink = Rc::clone(&completions);
        let _late = observable
            .on_complete(move || sink.set(sink.get() + 1))
            .expect("attach");
        let _values = observable.on_next(|_| panic!("no values replayed")).expect("attach");
        assert_eq!(completions.get(), 1);
    }

    #[test]
    fn replay_all_and_none() {
        let (all, context, _source_log) =
            fixture(FiniteStateOptions::default().with_replay(Replay::All));
        context.next(1).expect("live");
        context.next(2).expect("live");
        let (seen, _observer) = collect(&all);
        assert_eq!(*seen.borrow(), vec!["next:1", "next:2"]);
        context.finish("drained").expect("live");
        let (late, _observer) = collect(&all);
        assert_eq!(*late.borrow(), vec!["next:1", "next:2", "drained"]);

        let (none, context, _source_log) =
            fixture(FiniteStateOptions::default().with_replay(Replay::None));
        context.complete().expect("live");
        let (seen, _observer) = collect(&none);
        assert!(seen.borrow().is_empty());
        assert_eq!(none.history_len(), 0);
    }

    #[test]
    fn history_cleared_when_unobserved() {
        let (observable, context, _source_log) = fixture(
            FiniteStateOptions::default()
                .with_replay(Replay::All)
                .clear_history_when_unobserved(true),
        );
        let (_seen, observer) = collect(&observable);
        context.next(1).expect("live");
        context.complete().expect("live");
        assert_eq!(observable.history_len(), 2);

        observer.deactivate();
        assert_eq!(observable.history_len(), 0);
    }

    #[test]
    fn observed_for_respects_filters() {
        let (observable, context, _source_log) = fixture(FiniteStateOptions::default());
        let _values = observable.on_next(|_| {}).expect("attach");
        assert!(context.is_observed_for(FiniteState::Next));
        assert!(!context.is_observed_for(FiniteState::Complete));

        let (_seen, _all) = collect(&observable);
        assert!(context.is_observed_for(FiniteState::Complete));
        assert_eq!(observable.matches(FiniteState::Complete).iter().count(), 1);
        assert_eq!(context.observer_count(), 2);
    }

    #[test]
    fn typed_helpers_unwrap_payloads() {
        let (observable, context, _source_log) = fixture(FiniteStateOptions::default());
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        let _errors = observable
            .on_error(move |error| sink.borrow_mut().push(error.clone()))
            .expect("attach");
        context.error("bad".to_string()).expect("live");
        assert_eq!(*errors.borrow(), vec!["bad".to_string()]);

        let (cancelled, context, _source_log) = fixture(FiniteStateOptions::default());
        let reason = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&reason);
        let _cancel = cancelled
            .on_cancel(move |why| *sink.borrow_mut() = Some(why.clone()))
            .expect("attach");
        context.cancel("user").expect("live");
        assert_eq!(*reason.borrow(), Some(CancelReason::new("user")));
    }

    #[test]
    fn synchronous_termination_releases_installed_source() {
        let source_log = Rc::new(RecordingSource::default());
        let source = Rc::clone(&source_log);
        let observable = FiniteStateObservable::<u32, ()>::new(FiniteStateOptions::default(), |context| {
            context.complete().expect("live");
            source
        });
        assert!(observable.is_terminal());
        assert_eq!(source_log.take(), vec!["release"]);
    }

    #[test]
    fn state_display() {
        assert_eq!(FiniteState::Next.to_string(), "next");
        assert_eq!(FiniteState::custom("timeout").to_string(), "timeout");
        assert!(FiniteState::Cancel.is_terminal());
        assert!(!FiniteState::Next.is_terminal());
    }
}
