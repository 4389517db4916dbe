//! Builder pattern implementation for state machines
//!
//! Callbacks are registered either through the typed methods
//! ([`StateMachineBuilder::before_event`], [`StateMachineBuilder::leave_any_state`], ...)
//! or by name through [`StateMachineBuilder::callback`], which understands the
//! classic naming convention:
//!
//! | name              | phase        | target          |
//! |-------------------|--------------|-----------------|
//! | `before_<EVENT>`  | before event | `<EVENT>`       |
//! | `before_event`    | before event | every event     |
//! | `leave_<STATE>`   | leave state  | `<STATE>`       |
//! | `leave_state`     | leave state  | every state     |
//! | `enter_<STATE>`   | enter state  | `<STATE>`       |
//! | `enter_state`     | enter state  | every state     |
//! | `after_<EVENT>`   | after event  | `<EVENT>`       |
//! | `after_event`     | after event  | every event     |
//! | `<STATE>`         | enter state  | `<STATE>`       |
//! | `<EVENT>`         | after event  | `<EVENT>`       |
//!
//! Names are resolved in [`StateMachineBuilder::build`], once every event is
//! known. A name that refers to no known event or state is dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::error::BuildError;
use crate::fsm::{EventContext, StateMachine};

/// Callback invoked with the context of the event being processed
pub type Callback = Box<dyn Fn(&mut EventContext<'_>) + Send + Sync>;

/// The point in the transition lifecycle where a callback runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallbackPhase {
    /// Before the event is processed; may cancel
    BeforeEvent,
    /// Before leaving the source state; may cancel or suspend
    LeaveState,
    /// After the destination state has been committed
    EnterState,
    /// After the event has been processed
    AfterEvent,
}

/// What a callback is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallbackTarget {
    /// A single event
    Event(String),
    /// A single state
    State(String),
    /// Every event or every state, depending on the phase
    Any,
}

impl fmt::Display for CallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackTarget::Event(name) => write!(f, "event {name}"),
            CallbackTarget::State(name) => write!(f, "state {name}"),
            CallbackTarget::Any => f.write_str("any"),
        }
    }
}

/// Key of the callback registry
pub(crate) type CallbackKey = (CallbackPhase, CallbackTarget);

/// An event definition: `name` moves the machine from any of `src` to `dst`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDesc {
    /// Event name used when calling [`StateMachine::event`]
    pub name: String,
    /// States the event is valid from
    pub src: Vec<String>,
    /// State the machine ends up in
    pub dst: String,
}

impl EventDesc {
    /// Create an event definition
    pub fn new<I, T>(name: impl Into<String>, src: I, dst: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            src: src.into_iter().map(Into::into).collect(),
            dst: dst.into(),
        }
    }
}

enum Registration {
    Named(String),
    Typed(CallbackPhase, CallbackTarget),
}

/// Builder for constructing state machines
pub struct StateMachineBuilder {
    initial: String,
    events: Vec<EventDesc>,
    callbacks: Vec<(Registration, Callback)>,
}

impl StateMachineBuilder {
    /// Create a new builder starting in `initial`
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            events: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Add an event valid from each of `src`, leading to `dst`
    pub fn event<I, T>(mut self, name: impl Into<String>, src: I, dst: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.events.push(EventDesc::new(name, src, dst));
        self
    }

    /// Add several event definitions
    pub fn events(mut self, events: impl IntoIterator<Item = EventDesc>) -> Self {
        self.events.extend(events);
        self
    }

    /// Register a callback by conventional name (see module docs)
    pub fn callback<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.callbacks
            .push((Registration::Named(name.into()), Box::new(func)));
        self
    }

    /// Register an already boxed callback by conventional name
    pub fn boxed_callback(mut self, name: impl Into<String>, func: Callback) -> Self {
        self.callbacks.push((Registration::Named(name.into()), func));
        self
    }

    fn typed<F>(mut self, phase: CallbackPhase, target: CallbackTarget, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.callbacks
            .push((Registration::Typed(phase, target), Box::new(func)));
        self
    }

    /// Run `func` before `event` is processed
    pub fn before_event<F>(self, event: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(
            CallbackPhase::BeforeEvent,
            CallbackTarget::Event(event.into()),
            func,
        )
    }

    /// Run `func` before every event
    pub fn before_any_event<F>(self, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(CallbackPhase::BeforeEvent, CallbackTarget::Any, func)
    }

    /// Run `func` when leaving `state`
    pub fn leave_state<F>(self, state: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(
            CallbackPhase::LeaveState,
            CallbackTarget::State(state.into()),
            func,
        )
    }

    /// Run `func` when leaving any state
    pub fn leave_any_state<F>(self, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(CallbackPhase::LeaveState, CallbackTarget::Any, func)
    }

    /// Run `func` after entering `state`
    pub fn enter_state<F>(self, state: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(
            CallbackPhase::EnterState,
            CallbackTarget::State(state.into()),
            func,
        )
    }

    /// Run `func` after entering any state
    pub fn enter_any_state<F>(self, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(CallbackPhase::EnterState, CallbackTarget::Any, func)
    }

    /// Run `func` after `event` has been processed
    pub fn after_event<F>(self, event: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(
            CallbackPhase::AfterEvent,
            CallbackTarget::Event(event.into()),
            func,
        )
    }

    /// Run `func` after every event
    pub fn after_any_event<F>(self, func: F) -> Self
    where
        F: Fn(&mut EventContext<'_>) + Send + Sync + 'static,
    {
        self.typed(CallbackPhase::AfterEvent, CallbackTarget::Any, func)
    }

    /// Build the state machine
    ///
    /// Fails when a shorthand callback name is both a state and an event, or
    /// when two callbacks resolve to the same phase and target.
    pub fn build(self) -> Result<StateMachine, BuildError> {
        let mut transitions = HashMap::new();
        let mut all_events = HashSet::new();
        let mut all_states = HashSet::new();

        for desc in self.events {
            for src in desc.src {
                all_states.insert(src.clone());
                all_states.insert(desc.dst.clone());
                // Last definition of an (event, src) pair wins.
                transitions.insert((desc.name.clone(), src), desc.dst.clone());
            }
            all_events.insert(desc.name);
        }

        let mut callbacks = HashMap::new();
        for (registration, func) in self.callbacks {
            let key = match registration {
                Registration::Named(name) => {
                    let key = resolve_callback_name(&name, &all_events, &all_states)?;
                    if key.is_none() {
                        debug!(callback = %name, "dropping callback for unknown event or state");
                    }
                    key
                }
                Registration::Typed(phase, target) => {
                    let known = match &target {
                        CallbackTarget::Event(event) => all_events.contains(event),
                        CallbackTarget::State(state) => all_states.contains(state),
                        CallbackTarget::Any => true,
                    };
                    if !known {
                        debug!(?phase, %target, "dropping callback for unknown target");
                    }
                    known.then_some((phase, target))
                }
            };

            let Some(key) = key else { continue };
            if callbacks.contains_key(&key) {
                let (phase, target) = key;
                return Err(BuildError::DuplicateCallback { phase, target });
            }
            callbacks.insert(key, func);
        }

        Ok(StateMachine::from_parts(self.initial, transitions, callbacks))
    }
}

/// Map a conventional callback name onto its phase and target.
///
/// `Ok(None)` means the name refers to nothing known and is to be dropped.
pub(crate) fn resolve_callback_name(
    name: &str,
    events: &HashSet<String>,
    states: &HashSet<String>,
) -> Result<Option<CallbackKey>, BuildError> {
    let event_target = |phase: CallbackPhase, target: &str| {
        if target == "event" {
            Some((phase, CallbackTarget::Any))
        } else if events.contains(target) {
            Some((phase, CallbackTarget::Event(target.to_string())))
        } else {
            None
        }
    };
    let state_target = |phase: CallbackPhase, target: &str| {
        if target == "state" {
            Some((phase, CallbackTarget::Any))
        } else if states.contains(target) {
            Some((phase, CallbackTarget::State(target.to_string())))
        } else {
            None
        }
    };

    if let Some(target) = name.strip_prefix("before_") {
        return Ok(event_target(CallbackPhase::BeforeEvent, target));
    }
    if let Some(target) = name.strip_prefix("leave_") {
        return Ok(state_target(CallbackPhase::LeaveState, target));
    }
    if let Some(target) = name.strip_prefix("enter_") {
        return Ok(state_target(CallbackPhase::EnterState, target));
    }
    if let Some(target) = name.strip_prefix("after_") {
        return Ok(event_target(CallbackPhase::AfterEvent, target));
    }

    match (states.contains(name), events.contains(name)) {
        (true, true) => Err(BuildError::AmbiguousCallback {
            name: name.to_string(),
        }),
        (true, false) => Ok(Some((
            CallbackPhase::EnterState,
            CallbackTarget::State(name.to_string()),
        ))),
        (false, true) => Ok(Some((
            CallbackPhase::AfterEvent,
            CallbackTarget::Event(name.to_string()),
        ))),
        (false, false) => Ok(None),
    }
}
