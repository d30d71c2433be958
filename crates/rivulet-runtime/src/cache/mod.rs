#![forbid(unsafe_code)]

//! Caching specializations of the core observable.
//!
//! - [`ValueObservable`]: latest value, replayed to late observers.
//! - [`FromObservable`]: finite sequence with a post-completion policy.

pub mod from;
pub mod value;

pub use from::{CompletionPolicy, FromContext, FromObservable, FromOptions, FromState};
pub use value::{ValueContext, ValueObservable};
