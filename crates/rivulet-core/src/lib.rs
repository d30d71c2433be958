#![forbid(unsafe_code)]

//! Subscription core: observables, observers, and named notifications.
//!
//! # Role in Rivulet
//! `rivulet-core` is the pub-sub kernel every other Rivulet type is built on.
//! Producers receive an emission capability ([`ObservableContext`]) exactly
//! once, at construction; consumers attach [`Observer`]s and toggle them with
//! `activate`/`deactivate`. Lifecycle hooks let producers start and stop the
//! underlying work as observers come and go.
//!
//! # Primary responsibilities
//! - **Observable/Observer**: many-to-many subscription with snapshot
//!   emission and reentrant, idempotent activation.
//! - **Notifications**: `{name, value}` envelopes and name-filtered
//!   observers on top of the core.
//! - **Side tables**: [`ObserverMap`] keys per-observer state by identity
//!   without keeping observers alive.
//! - **Tick**: [`Scheduler`] and [`TaskQueue`] for work that must happen on
//!   a later turn of the host loop.
//!
//! # Example
//!
//! ```
//! use rivulet_core::{Observable, ObservableContext};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let mut emitter: Option<ObservableContext<u32>> = None;
//! let observable = Observable::new(|context| {
//!     emitter = Some(context);
//! });
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let observer = observable
//!     .pipe_to(move |value, _| sink.borrow_mut().push(*value))
//!     .unwrap();
//!
//! let context = emitter.unwrap();
//! context.emit(1);
//! observer.deactivate();
//! context.emit(2);
//! assert_eq!(*seen.borrow(), vec![1]);
//! ```
//!
//! # How it fits in the system
//! `rivulet-runtime` builds finite-state sources, cancellation tokens and
//! caching observables by composing the types exported here.

pub mod error;
pub mod logging;
pub mod notification;
pub mod observable;
pub mod observer;
pub mod tick;

pub use error::{Error, Result};
pub use logging::{LogConfig, LogFormat, LogInitError};
pub use notification::{
    Matches, MatchesIter, Notification, NotificationsContext, NotificationsObservable,
    NotificationsObserver,
};
pub use observable::{FnHook, Observable, ObservableContext, ObservableHook};
pub use observer::{Observer, ObserverMap, WeakObserver};
pub use tick::{Immediate, Scheduler, Task, TaskQueue};
