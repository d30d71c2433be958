#![forbid(unsafe_code)]

//! DOM-style abort signals and their bridge to [`CancelToken`].
//!
//! [`AbortController`] owns the right to abort; [`AbortSignal`] is the
//! read-only view handed to the code that should stop. Both are synchronous
//! and single-threaded, like the rest of the engine.
//!
//! # Bridging rules
//!
//! | Token | Signal | Effect of linking |
//! |-------|--------|-------------------|
//! | live | live | Wired (one-way for signals, both ways for controllers) |
//! | live | aborted | Token cancels immediately with the signal's reason |
//! | cancelled | live | No-op |
//! | cancelled | aborted | No-op |
//!
//! Wiring is torn down on the first abort or cancellation of either side,
//! or as soon as either side is dropped.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rivulet_core::{Observable, ObservableContext, Observer, Result};
use tracing::debug;

use super::{CancelReason, CancelToken, TokenEvent, TokenObserver, Wiring};

struct SignalCore {
    observable: Observable<CancelReason>,
    context: ObservableContext<CancelReason>,
    reason: OnceCell<CancelReason>,
    links: RefCell<Vec<Weak<AbortWiring>>>,
}

impl Drop for SignalCore {
    fn drop(&mut self) {
        let links = std::mem::take(self.links.get_mut());
        for link in links.iter().filter_map(Weak::upgrade) {
            link.teardown();
        }
    }
}

/// Read-only view of an abort flag.
#[derive(Clone)]
pub struct AbortSignal {
    core: Rc<SignalCore>,
}

impl PartialEq for AbortSignal {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for AbortSignal {}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.core.reason.get())
            .finish()
    }
}

impl AbortSignal {
    fn fresh() -> Self {
        let (observable, context) = Observable::new_with(|context| ((), context));
        Self {
            core: Rc::new(SignalCore {
                observable,
                context,
                reason: OnceCell::new(),
                links: RefCell::new(Vec::new()),
            }),
        }
    }

    /// A signal that is already aborted with `reason`.
    #[must_use]
    pub fn aborted(reason: impl Into<CancelReason>) -> Self {
        let signal = Self::fresh();
        signal.trigger(reason.into());
        signal
    }

    /// Whether the signal has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.core.reason.get().is_some()
    }

    /// The abort reason, once aborted.
    #[must_use]
    pub fn reason(&self) -> Option<&CancelReason> {
        self.core.reason.get()
    }

    /// Run `callback` when the signal aborts.
    ///
    /// # Errors
    ///
    /// Never fails; the signature follows [`Observable::pipe_to`].
    pub fn on_abort(
        &self,
        callback: impl Fn(&CancelReason) + 'static,
    ) -> Result<Observer<CancelReason>> {
        self.core.observable.pipe_to(move |reason, _| callback(reason))
    }

    /// The underlying observable of abort reasons.
    #[must_use]
    pub fn as_observable(&self) -> &Observable<CancelReason> {
        &self.core.observable
    }

    fn trigger(&self, reason: CancelReason) {
        if self.core.reason.set(reason.clone()).is_err() {
            return;
        }
        debug!(%reason, "signal aborted");
        self.core.context.emit(reason);
    }
}

/// Owner of an [`AbortSignal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    /// Create a controller with a live signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::fresh(),
        }
    }

    /// The controlled signal.
    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Abort the signal. Only the first call has an effect.
    pub fn abort(&self, reason: impl Into<CancelReason>) {
        self.signal.trigger(reason.into());
    }

    /// Whether the signal has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AbortWiring {
    token_side: RefCell<Option<TokenObserver>>,
    signal_side: RefCell<Option<Observer<CancelReason>>>,
}

impl AbortWiring {
    fn teardown(&self) {
        let token_side = self.token_side.borrow_mut().take();
        let signal_side = self.signal_side.borrow_mut().take();
        if token_side.is_none() && signal_side.is_none() {
            return;
        }
        debug!("abort link torn down");
        if let Some(observer) = token_side {
            observer.deactivate();
        }
        if let Some(observer) = signal_side {
            observer.deactivate();
        }
    }

    fn is_wired(&self) -> bool {
        self.token_side.borrow().is_some() || self.signal_side.borrow().is_some()
    }
}

impl Wiring for AbortWiring {
    fn party_dropped(&self) {
        self.teardown();
    }
}

/// Handle to a token/signal link.
///
/// Dropping the handle keeps the link alive.
pub struct AbortLink {
    wiring: Rc<AbortWiring>,
}

impl fmt::Debug for AbortLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortLink")
            .field("linked", &self.is_linked())
            .finish()
    }
}

impl AbortLink {
    /// Tear the link down without cancelling or aborting anything.
    pub fn unlink(&self) {
        self.wiring.teardown();
    }

    /// Whether the link is still wired.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.wiring.is_wired()
    }
}

impl CancelToken {
    /// Cancel this token when `signal` aborts.
    ///
    /// Returns `None` when no wiring was needed (see the module table).
    pub fn link_with_abort_signal(&self, signal: &AbortSignal) -> Option<AbortLink> {
        self.link_abort(signal, false)
    }

    /// Link this token and `controller` both ways: aborting the controller
    /// cancels the token, cancelling the token aborts the controller.
    pub fn link_with_abort_controller(&self, controller: &AbortController) -> Option<AbortLink> {
        self.link_abort(controller.signal(), true)
    }

    /// A new controller tracking this token.
    ///
    /// If the token is already cancelled, the controller starts aborted with
    /// the same reason.
    #[must_use]
    pub fn to_abort_controller(&self) -> AbortController {
        let controller = AbortController::new();
        match self.reason() {
            Some(reason) => controller.abort(reason.clone()),
            None => drop(self.link_with_abort_controller(&controller)),
        }
        controller
    }

    /// A new token cancelled whenever `signal` aborts.
    #[must_use]
    pub fn from_abort_signal(signal: &AbortSignal) -> Self {
        let token = Self::new();
        drop(token.link_with_abort_signal(signal));
        token
    }

    fn link_abort(&self, signal: &AbortSignal, both_ways: bool) -> Option<AbortLink> {
        if self.is_cancelled() {
            return None;
        }
        if let Some(reason) = signal.reason() {
            self.cancel(reason.clone());
            return None;
        }

        let wiring = Rc::new(AbortWiring::default());

        let token = self.downgrade();
        let on_signal = Rc::clone(&wiring);
        let signal_side = Observer::new(move |reason: &CancelReason, _| {
            on_signal.teardown();
            if let Some(token) = token.upgrade() {
                token.cancel(reason.clone());
            }
        });
        if signal_side
            .observe(signal.as_observable())
            .and_then(Observer::activate)
            .is_ok()
        {
            *wiring.signal_side.borrow_mut() = Some(signal_side);
        }

        let on_token = Rc::clone(&wiring);
        let target = both_ways.then(|| Rc::downgrade(&signal.core));
        let token_side = TokenObserver::new(TokenEvent::Cancel, move |reason: &CancelReason| {
            on_token.teardown();
            if let Some(core) = target.as_ref().and_then(Weak::upgrade) {
                AbortSignal { core }.trigger(reason.clone());
            }
        });
        if token_side
            .observe(self.as_notifications())
            .and_then(TokenObserver::activate)
            .is_ok()
        {
            *wiring.token_side.borrow_mut() = Some(token_side);
        }

        let tracked: Weak<dyn Wiring> = Rc::<AbortWiring>::downgrade(&wiring);
        self.core.track(tracked);
        {
            let mut links = signal.core.links.borrow_mut();
            links.retain(|link| link.strong_count() > 0);
            links.push(Rc::downgrade(&wiring));
        }
        debug!("abort link wired");
        Some(AbortLink { wiring })
    }
}
