//! Feeding a state machine from an external event source
//!
//! An event bus, an RPC endpoint or a channel can hand events to a
//! [`StateMachine`] by implementing [`EventSource`]. [`drive`] pumps events
//! until the source runs dry and reports what happened to each of them.

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{Error, StateMachine, Value};

/// A request to fire one event
#[derive(Debug, Clone)]
pub struct EventRequest {
    /// Event name
    pub name: String,
    /// Arguments handed to callbacks
    pub args: Vec<Value>,
}

impl EventRequest {
    /// Request `name` without arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Request `name` with arguments
    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Something that yields events for a state machine
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is exhausted
    async fn next_event(&mut self) -> Option<EventRequest>;
}

#[async_trait]
impl EventSource for std::vec::IntoIter<EventRequest> {
    async fn next_event(&mut self) -> Option<EventRequest> {
        self.next()
    }
}

#[cfg(feature = "tokio-integration")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-integration")))]
#[async_trait]
impl EventSource for tokio::sync::mpsc::Receiver<EventRequest> {
    async fn next_event(&mut self) -> Option<EventRequest> {
        self.recv().await
    }
}

/// Outcome of every request pulled by [`drive`], in arrival order
#[derive(Debug, Default)]
pub struct DriveReport {
    /// `(event name, result of StateMachine::event)` per request
    pub outcomes: Vec<(String, Result<(), Error>)>,
}

impl DriveReport {
    /// Requests that changed the state without any error
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|(_, res)| res.is_ok()).count()
    }

    /// Requests the machine declined or reported an error for
    pub fn declined(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    /// Whether the last request left a transition suspended
    pub fn ends_suspended(&self) -> bool {
        matches!(self.outcomes.last(), Some((_, Err(Error::Async(_)))))
    }
}

/// Fire every event from `source` on `fsm`, in order.
///
/// Declined events are recorded and skipped; nothing is retried and
/// suspended transitions are left for the caller to complete.
pub async fn drive<S>(fsm: &StateMachine, source: &mut S) -> DriveReport
where
    S: EventSource + ?Sized,
{
    let mut report = DriveReport::default();

    while let Some(request) = source.next_event().await {
        trace!(event = %request.name, "event received from source");
        let result = fsm.event_with_args(&request.name, request.args);
        if let Err(err) = &result {
            debug!(event = %request.name, error = %err, "event declined");
        }
        report.outcomes.push((request.name, result));
    }

    report
}
