#![forbid(unsafe_code)]

//! Contract-violation errors shared by every layer of the engine.
//!
//! Misuse of the subscription surface (emitting on a terminated source,
//! attaching to a strictly-cleared completed source, a hook refusing an
//! observer) is reported synchronously to the caller through [`Error`].
//! Asynchronous producer failures are *not* errors at this level: they are
//! delivered to observers as ordinary notifications.

/// Errors reported synchronously to the caller of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The source already reached a terminal state; no further values or
    /// transitions are accepted.
    #[error("source already reached terminal state `{state}`")]
    Terminated {
        /// Name of the terminal state the source is in.
        state: String,
    },
    /// A completed source with a strict clear policy refused a late observer.
    #[error("source already completed and rejects late observers")]
    ObservedAfterCompletion,
    /// A value or completion was pushed after the source completed.
    #[error("cannot emit after completion")]
    EmitAfterCompletion,
    /// A hook refused to accept an observer.
    #[error("observer rejected: {0}")]
    Rejected(String),
}

impl Error {
    /// Build a [`Error::Terminated`] for the given state name.
    #[must_use]
    pub fn terminated(state: impl std::fmt::Display) -> Self {
        Self::Terminated {
            state: state.to_string(),
        }
    }

    /// Build a [`Error::Rejected`] with a descriptive message.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Result alias used across the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;
