#![forbid(unsafe_code)]

//! Cooperative cancellation tokens.
//!
//! A [`CancelToken`] is a notifications observable whose only notification
//! is [`TokenEvent::Cancel`], carrying a [`CancelReason`]. Cancelling is
//! one-way and idempotent: the first [`CancelToken::cancel`] stores the
//! reason and notifies observers; every later call is ignored.
//!
//! Tokens compose in three ways:
//!
//! - **Links**: [`CancelToken::link_with_token`] ties tokens together so
//!   cancelling any of them cancels all of them.
//! - **Races**: [`CancelToken::wrap_future`] races a future against the
//!   token and settles according to a [`CancelStrategy`].
//! - **Abort bridging**: [`abort`] connects tokens to DOM-style
//!   [`AbortController`]/[`AbortSignal`] pairs.
//!
//! # Invariants
//!
//! 1. `is_cancelled()` flips false → true at most once, together with
//!    `reason()` becoming `Some`.
//! 2. Exactly one `Cancel` notification is dispatched per token.
//! 3. A link is torn down before the cancellation propagates through it, so
//!    linked tokens cancel each other exactly once.
//! 4. Cancellation never interrupts running code; it only changes the
//!    outcome of races that have not settled yet.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Late `on_cancel` | Token already cancelled | Observer never fires; use [`CancelToken::when_cancelled`] |
//! | Token dropped | Race pending, no other handle | [`WhenCancelled`] never resolves; the task decides the outcome |
//! | `Reject` strategy | Cancelled before the task settles | `Err(Cancelled)` carrying the token's reason |

pub mod abort;

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, Either};
use rivulet_core::{NotificationsContext, NotificationsObservable, NotificationsObserver, Result};
use tracing::debug;

pub use abort::{AbortController, AbortLink, AbortSignal};

/// The single notification name of a [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TokenEvent {
    /// The token was cancelled.
    Cancel,
}

/// Why a token was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CancelReason {
    message: Option<String>,
}

impl CancelReason {
    /// A reason carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// A reason without a message.
    #[must_use]
    pub const fn unspecified() -> Self {
        Self { message: None }
    }

    /// The message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => f.write_str(message),
            None => f.write_str("cancelled"),
        }
    }
}

impl From<&str> for CancelReason {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CancelReason {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<()> for CancelReason {
    fn from((): ()) -> Self {
        Self::unspecified()
    }
}

/// The error produced by the [`CancelStrategy::Reject`] edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled: {reason}")]
pub struct Cancelled {
    /// The reason of the token that won the race.
    pub reason: CancelReason,
}

/// How a raced future settles when its token wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CancelStrategy {
    /// Never settle.
    Never,
    /// Settle with `Ok(None)`.
    Resolve,
    /// Settle with `Err(Cancelled)`.
    #[default]
    Reject,
}

/// Observer handle returned by [`CancelToken::on_cancel`].
pub type TokenObserver = NotificationsObserver<TokenEvent, CancelReason>;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Link wiring that has to come down once one of its parties is dropped.
trait Wiring {
    fn party_dropped(&self);
}

struct TokenCore {
    observable: NotificationsObservable<TokenEvent, CancelReason>,
    context: NotificationsContext<TokenEvent, CancelReason>,
    reason: OnceCell<CancelReason>,
    links: RefCell<Vec<Weak<dyn Wiring>>>,
}

impl TokenCore {
    fn track(&self, wiring: Weak<dyn Wiring>) {
        let mut links = self.links.borrow_mut();
        links.retain(|link| link.strong_count() > 0);
        links.push(wiring);
    }
}

impl Drop for TokenCore {
    fn drop(&mut self) {
        let links = std::mem::take(self.links.get_mut());
        for link in links.iter().filter_map(Weak::upgrade) {
            link.party_dropped();
        }
    }
}

/// A one-way, idempotent cancellation signal.
///
/// Cloning hands out another handle to the same token.
#[derive(Clone)]
pub struct CancelToken {
    core: Rc<TokenCore>,
}

impl PartialEq for CancelToken {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for CancelToken {}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.core.reason.get())
            .field("observers", &self.core.observable.observer_count())
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (observable, context) = NotificationsObservable::new_with(|context| ((), context));
        Self {
            core: Rc::new(TokenCore {
                observable,
                context,
                reason: OnceCell::new(),
                links: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a token that is already cancelled with `reason`.
    #[must_use]
    pub fn cancelled(reason: impl Into<CancelReason>) -> Self {
        let token = Self::new();
        token.cancel(reason);
        token
    }

    /// Cancel the token. Only the first call has an effect.
    pub fn cancel(&self, reason: impl Into<CancelReason>) {
        let reason = reason.into();
        if self.core.reason.set(reason.clone()).is_err() {
            return;
        }
        debug!(%reason, observers = self.core.context.observer_count(), "token cancelled");
        self.core.context.dispatch(TokenEvent::Cancel, reason);
    }

    /// Whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.reason.get().is_some()
    }

    /// The cancellation reason, once cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<&CancelReason> {
        self.core.reason.get()
    }

    /// The underlying notifications observable.
    #[must_use]
    pub fn as_notifications(&self) -> &NotificationsObservable<TokenEvent, CancelReason> {
        &self.core.observable
    }

    /// Number of attached observers, link wiring included.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.core.observable.observer_count()
    }

    /// Run `callback` when the token is cancelled.
    ///
    /// The returned observer is active; deactivate it to stop listening.
    /// Registering on an already cancelled token never fires.
    ///
    /// # Errors
    ///
    /// Never fails for a plain token; the signature follows
    /// [`NotificationsObservable::on`].
    pub fn on_cancel(&self, callback: impl Fn(&CancelReason) + 'static) -> Result<TokenObserver> {
        self.core.observable.on(TokenEvent::Cancel, callback)
    }

    /// A future resolving with the reason once the token is cancelled.
    ///
    /// Resolves on first poll if the token is already cancelled. Dropping the
    /// future detaches its observer.
    #[must_use]
    pub fn when_cancelled(&self) -> WhenCancelled {
        if let Some(reason) = self.reason() {
            return WhenCancelled {
                state: WhenState::Ready(Some(reason.clone())),
            };
        }
        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let observer = TokenObserver::new(TokenEvent::Cancel, move |reason: &CancelReason| {
            if let Some(sender) = sender.borrow_mut().take() {
                let _ = sender.send(reason.clone());
            }
        });
        // The token's hook is inert, so attaching cannot be refused.
        let attached = observer
            .observe(&self.core.observable)
            .and_then(TokenObserver::activate)
            .is_ok();
        debug_assert!(attached);
        WhenCancelled {
            state: WhenState::Waiting { receiver, observer },
        }
    }

    fn downgrade(&self) -> WeakToken {
        WeakToken {
            core: Rc::downgrade(&self.core),
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Link this token with `others` so cancelling any of them cancels all.
    ///
    /// - If this token is already cancelled, nothing happens.
    /// - If any of `others` is already cancelled, this token cancels
    ///   immediately with that token's reason and no link is made.
    ///
    /// The link tears itself down on the first cancellation of any member,
    /// or once fewer than two members are still alive;
    /// [`TokenLink::unlink`] tears it down manually.
    pub fn link_with_token(&self, others: &[&CancelToken]) -> Option<TokenLink> {
        if self.is_cancelled() {
            return None;
        }
        if let Some(reason) = others.iter().find_map(|other| other.reason()) {
            debug!(%reason, "linked token already cancelled");
            self.cancel(reason.clone());
            return None;
        }

        let mut members = vec![self.clone()];
        for other in others {
            if !members.contains(*other) {
                members.push((*other).clone());
            }
        }

        let shared = Rc::new(LinkShared::default());
        for member in &members {
            let targets: Vec<WeakToken> = members
                .iter()
                .filter(|candidate| *candidate != member)
                .map(CancelToken::downgrade)
                .collect();
            let link = Rc::clone(&shared);
            let observer = TokenObserver::new(TokenEvent::Cancel, move |reason: &CancelReason| {
                link.teardown();
                for target in targets.iter().filter_map(WeakToken::upgrade) {
                    target.cancel(reason.clone());
                }
            });
            shared.wire(observer, member);
        }
        for member in &members {
            let wiring: Weak<dyn Wiring> = Rc::<LinkShared>::downgrade(&shared);
            member.core.track(wiring);
        }
        debug!(members = members.len(), "tokens linked");
        Some(TokenLink { shared })
    }

    // -----------------------------------------------------------------------
    // Races
    // -----------------------------------------------------------------------

    async fn settle<F: Future>(&self, task: F) -> Settled<F::Output> {
        if let Some(reason) = self.reason() {
            return Settled::Cancelled(reason.clone());
        }
        let task = pin!(task);
        let cancelled = self.when_cancelled();
        match future::select(task, cancelled).await {
            Either::Left((value, _)) => match self.reason() {
                Some(reason) => Settled::Cancelled(reason.clone()),
                None => Settled::Completed(value),
            },
            Either::Right((reason, _)) => Settled::Cancelled(reason),
        }
    }

    /// Race `task` against this token, settling per `strategy`.
    ///
    /// - Task first: `Ok(Some(value))`, unless the token is already
    ///   cancelled when completion is observed.
    /// - Token first: `Never` stays pending, `Resolve` gives `Ok(None)`,
    ///   `Reject` gives `Err(Cancelled)`.
    ///
    /// The task is dropped as soon as the token wins.
    pub async fn wrap_future<F: Future>(
        &self,
        task: F,
        strategy: CancelStrategy,
    ) -> std::result::Result<Option<F::Output>, Cancelled> {
        self.wrap_future_with(task, strategy, |_| {}).await
    }

    /// Like [`CancelToken::wrap_future`], running `on_cancelled` before the
    /// strategy applies when the token wins.
    pub async fn wrap_future_with<F, C>(
        &self,
        task: F,
        strategy: CancelStrategy,
        on_cancelled: C,
    ) -> std::result::Result<Option<F::Output>, Cancelled>
    where
        F: Future,
        C: FnOnce(&CancelReason),
    {
        match self.settle(task).await {
            Settled::Completed(value) => Ok(Some(value)),
            Settled::Cancelled(reason) => {
                on_cancelled(&reason);
                debug!(%reason, ?strategy, "race lost to cancellation");
                match strategy {
                    CancelStrategy::Never => future::pending().await,
                    CancelStrategy::Resolve => Ok(None),
                    CancelStrategy::Reject => Err(Cancelled { reason }),
                }
            }
        }
    }

    /// Race `task` against this token, failing with [`Cancelled`] if the
    /// token wins.
    pub async fn race<F: Future>(&self, task: F) -> std::result::Result<F::Output, Cancelled> {
        match self.settle(task).await {
            Settled::Completed(value) => Ok(value),
            Settled::Cancelled(reason) => Err(Cancelled { reason }),
        }
    }

    /// Wrap `f` so it only runs while the token is not cancelled.
    pub fn wrap_fn<R, F>(&self, f: F) -> impl Fn() -> Option<R> + use<R, F>
    where
        F: Fn() -> R,
    {
        let token = self.downgrade();
        move || match token.upgrade() {
            Some(token) if token.is_cancelled() => None,
            _ => Some(f()),
        }
    }
}

enum Settled<T> {
    Completed(T),
    Cancelled(CancelReason),
}

#[derive(Clone)]
struct WeakToken {
    core: Weak<TokenCore>,
}

impl WeakToken {
    fn upgrade(&self) -> Option<CancelToken> {
        self.core.upgrade().map(|core| CancelToken { core })
    }

    fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }
}

// ---------------------------------------------------------------------------
// WhenCancelled
// ---------------------------------------------------------------------------

enum WhenState {
    Ready(Option<CancelReason>),
    Waiting {
        receiver: oneshot::Receiver<CancelReason>,
        observer: TokenObserver,
    },
}

/// Future returned by [`CancelToken::when_cancelled`].
pub struct WhenCancelled {
    state: WhenState,
}

impl fmt::Debug for WhenCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let waiting = matches!(self.state, WhenState::Waiting { .. });
        f.debug_struct("WhenCancelled")
            .field("waiting", &waiting)
            .finish()
    }
}

impl Future for WhenCancelled {
    type Output = CancelReason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CancelReason> {
        match &mut self.get_mut().state {
            WhenState::Ready(reason) => reason.take().map_or(Poll::Pending, Poll::Ready),
            WhenState::Waiting { receiver, .. } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(reason)) => Poll::Ready(reason),
                // Sender gone with the token: it can no longer be cancelled.
                Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Drop for WhenCancelled {
    fn drop(&mut self) {
        if let WhenState::Waiting { observer, .. } = &self.state {
            observer.deactivate();
        }
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LinkShared {
    wiring: RefCell<Vec<(WeakToken, TokenObserver)>>,
}

impl LinkShared {
    fn wire(&self, observer: TokenObserver, member: &CancelToken) {
        if observer
            .observe(member.as_notifications())
            .and_then(TokenObserver::activate)
            .is_ok()
        {
            self.wiring.borrow_mut().push((member.downgrade(), observer));
        }
    }

    fn teardown(&self) {
        let wiring = std::mem::take(&mut *self.wiring.borrow_mut());
        if wiring.is_empty() {
            return;
        }
        debug!(observers = wiring.len(), "token link torn down");
        for (_, observer) in &wiring {
            observer.deactivate();
        }
    }

    fn is_wired(&self) -> bool {
        !self.wiring.borrow().is_empty()
    }
}

impl Wiring for LinkShared {
    fn party_dropped(&self) {
        let (live, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut *self.wiring.borrow_mut())
            .into_iter()
            .partition(|(member, _)| member.is_alive());
        let remaining = live.len();
        *self.wiring.borrow_mut() = live;
        for (_, observer) in &dropped {
            observer.deactivate();
        }
        if remaining < 2 {
            self.teardown();
        }
    }
}

/// Handle to a link made by [`CancelToken::link_with_token`].
///
/// Dropping the handle keeps the link alive.
pub struct TokenLink {
    shared: Rc<LinkShared>,
}

impl fmt::Debug for TokenLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLink")
            .field("linked", &self.is_linked())
            .finish()
    }
}

impl TokenLink {
    /// Tear the link down without cancelling anything.
    pub fn unlink(&self) {
        self.shared.teardown();
    }

    /// Whether the link is still wired.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.shared.is_wired()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
