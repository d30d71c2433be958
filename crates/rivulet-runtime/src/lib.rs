#![forbid(unsafe_code)]

//! Runtime specializations built on the Rivulet subscription core.
//!
//! # Role in Rivulet
//! `rivulet-core` provides bare observables. This crate adds the sources
//! applications actually consume:
//!
//! - [`finite`]: [`FiniteStateObservable`], a bounded producer with a
//!   terminal state, pause/resume driving and optional replay, plus adapters
//!   from iterators, streams and futures.
//! - [`cancel`]: [`CancelToken`] with token links, future races and
//!   [`AbortController`]/[`AbortSignal`] bridging.
//! - [`cache`]: [`ValueObservable`] (latest value) and [`FromObservable`]
//!   (finite sequence with a completion policy).
//!
//! Everything here is single-threaded: handles are `Rc`-based and futures
//! run on a local executor such as `futures::executor::LocalPool`.
//!
//! # Example
//!
//! ```
//! use rivulet_core::TaskQueue;
//! use rivulet_runtime::finite::sources::from_iter;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let queue = TaskQueue::new();
//! let numbers = from_iter(1..=3, queue.clone());
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let _observer = numbers
//!     .on_next(move |value| sink.borrow_mut().push(*value))
//!     .unwrap();
//!
//! queue.run_until_idle();
//! assert_eq!(*seen.borrow(), vec![1, 2, 3]);
//! assert!(numbers.is_terminal());
//! ```

pub mod cache;
pub mod cancel;
pub mod finite;

pub use cache::{
    CompletionPolicy, FromContext, FromObservable, FromOptions, FromState, ValueContext,
    ValueObservable,
};
pub use cancel::{
    AbortController, AbortLink, AbortSignal, CancelReason, CancelStrategy, CancelToken, Cancelled,
    TokenEvent, TokenLink, TokenObserver, WhenCancelled,
};
pub use finite::{
    FiniteNotification, FiniteObserver, FiniteState, FiniteStateContext, FiniteStateObservable,
    FiniteStateOptions, FiniteValue, Mode, Replay, SourceHook,
};
