//! Error types for the state machine

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::builder::{CallbackPhase, CallbackTarget};

/// Result type alias for state machine operations
pub type Result<T> = std::result::Result<T, Error>;

/// An error attached to an [`EventContext`](crate::EventContext) by a callback.
///
/// Cheap to clone, so the same cause can be returned to the caller while a
/// pending transition still holds on to it.
#[derive(Clone)]
pub struct CallbackError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl CallbackError {
    /// Wrap any error value.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// Attempt to view the wrapped error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

fn with_cause(err: &Option<CallbackError>) -> String {
    match err {
        Some(err) => format!(" with error: {err}"),
        None => String::new(),
    }
}

/// Errors returned by [`StateMachine::event`](crate::StateMachine::event) and
/// [`StateMachine::transition`](crate::StateMachine::transition).
///
/// None of these indicate a broken machine except [`Error::Internal`]; they
/// signal that the requested operation was declined and why.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The event is not defined for any source state
    #[error("event {event} does not exist")]
    UnknownEvent {
        /// Requested event name
        event: String,
    },

    /// The event exists but not from the current state
    #[error("event {event} inappropriate in current state {state}")]
    InvalidEvent {
        /// Requested event name
        event: String,
        /// State the machine was in
        state: String,
    },

    /// An asynchronous transition is still waiting for `transition()`
    #[error("event {event} inappropriate because previous transition did not complete")]
    InTransition {
        /// Requested event name
        event: String,
    },

    /// `transition()` was called with nothing pending
    #[error("transition inappropriate because no state change in progress")]
    NotInTransition,

    /// The event maps the current state onto itself
    #[error("no transition{}", with_cause(.0))]
    NoTransition(#[source] Option<CallbackError>),

    /// A `before_*` or `leave_*` callback canceled the transition
    #[error("transition canceled{}", with_cause(.0))]
    Canceled(#[source] Option<CallbackError>),

    /// A `leave_*` callback suspended the transition until `transition()`
    #[error("async started{}", with_cause(.0))]
    Async(#[source] Option<CallbackError>),

    /// The transition committed but a callback left an error on the context
    #[error(transparent)]
    Callback(CallbackError),

    /// The staged continuation vanished during a synchronous event.
    ///
    /// The engine stages and consumes the continuation under the same
    /// serialization lock, so this is not expected outside of a defect.
    #[error("internal error on state transition")]
    Internal,
}

impl Error {
    /// True for the expected self-transition outcome.
    pub fn is_no_transition(&self) -> bool {
        matches!(self, Error::NoTransition(_))
    }

    /// True when the transition was suspended and awaits `transition()`.
    pub fn is_async(&self) -> bool {
        matches!(self, Error::Async(_))
    }

    /// True when a callback canceled the transition.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }

    /// The error a callback attached to the event context, if any.
    pub fn callback_error(&self) -> Option<&CallbackError> {
        match self {
            Error::NoTransition(err) | Error::Canceled(err) | Error::Async(err) => err.as_ref(),
            Error::Callback(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors raised while building a [`StateMachine`](crate::StateMachine)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A shorthand callback name matches both a state and an event
    #[error("callback name {name:?} matches both a state and an event")]
    AmbiguousCallback {
        /// Name as registered
        name: String,
    },

    /// Two registrations resolved to the same phase and target
    #[error("more than one callback registered for {phase:?} on {target}")]
    DuplicateCallback {
        /// Lifecycle phase
        phase: CallbackPhase,
        /// Resolved target
        target: CallbackTarget,
    },
}
