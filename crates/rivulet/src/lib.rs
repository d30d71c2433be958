#![forbid(unsafe_code)]

//! Single-threaded reactive event streams.
//!
//! This crate provides:
//! - [`Observable`]/[`Observer`] subscription with producer hooks
//! - [`NotificationsObservable`] for `{name, value}` dispatch
//! - [`FiniteStateObservable`] for bounded producers with pause/resume
//! - [`CancelToken`] with links, future races and abort bridging
//! - [`ValueObservable`] and [`FromObservable`] caches
//!
//! Most programs only need the [`prelude`].
//!
//! # Logging
//!
//! Every layer emits `tracing` events. With the `subscriber` feature,
//! [`init_logging`] installs a formatter configured from `RIVULET_LOG` and
//! `RIVULET_LOG_FORMAT`.

/// Observables, observers and notifications.
pub use rivulet_core as core;
/// Finite-state sources, tokens and caches.
pub use rivulet_runtime as runtime;

pub use rivulet_core::{
    Error, FnHook, Immediate, LogConfig, LogFormat, LogInitError, Notification,
    NotificationsContext, NotificationsObservable, NotificationsObserver, Observable,
    ObservableContext, ObservableHook, Observer, ObserverMap, Result, Scheduler, Task, TaskQueue,
    WeakObserver,
};
pub use rivulet_runtime::finite::sources;
pub use rivulet_runtime::{
    AbortController, AbortLink, AbortSignal, CancelReason, CancelStrategy, CancelToken, Cancelled,
    CompletionPolicy, FiniteState, FiniteStateContext, FiniteStateObservable, FiniteStateOptions,
    FiniteValue, FromContext, FromObservable, FromOptions, FromState, Mode, Replay, SourceHook,
    TokenLink, ValueContext, ValueObservable,
};

/// Install the global subscriber from the environment.
///
/// # Errors
///
/// Returns [`LogInitError`] for an invalid filter or when a global
/// subscriber is already installed.
#[cfg(feature = "subscriber")]
pub fn init_logging() -> std::result::Result<(), LogInitError> {
    let config = LogConfig::from_env();
    tracing::debug!(filter = %config.filter, "installing subscriber");
    config.init()
}

/// The types most programs need.
pub mod prelude {
    pub use rivulet_core::{
        Error, Observable, ObservableContext, ObservableHook, Observer, Result, Scheduler,
        TaskQueue,
    };
    pub use rivulet_runtime::finite::sources::{from_future, from_iter, from_stream, from_try_iter};
    pub use rivulet_runtime::{
        CancelReason, CancelStrategy, CancelToken, CompletionPolicy, FiniteState,
        FiniteStateContext, FiniteStateObservable, FiniteStateOptions, FiniteValue, FromObservable,
        FromOptions, SourceHook, ValueObservable,
    };
}
