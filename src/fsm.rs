//! A string-keyed finite state machine (FSM) driven by named events, with
//! lifecycle callbacks and support for deferred ("async") transitions.
//!
//! # Lifecycle
//! [`StateMachine::event`] resolves `(event, current)` in the transition table
//! and then runs, in order:
//!
//! 1. `before_<EVENT>`, then `before_event` (may cancel)
//! 2. `leave_<OLD_STATE>`, then `leave_state` (may cancel or request async)
//! 3. commit of the new current state
//! 4. `enter_<NEW_STATE>`, then `enter_state`
//! 5. `after_<EVENT>`, then `after_event`
//!
//! When a leave callback calls [`EventContext::request_async`], steps 3-5 are
//! staged as a [`PendingTransition`] and only run once
//! [`StateMachine::transition`] is called.
//!
//! # Concurrency
//! `event` and `transition` are serialized by one engine-wide lock. The current
//! state, the pending slot and the metadata store each sit behind their own
//! short-lived locks, so callbacks may call [`StateMachine::current`],
//! [`StateMachine::can`], [`StateMachine::metadata`] and friends through
//! [`EventContext::machine`]. Callbacks must not call `event` or `transition`
//! on the machine that is invoking them.
//!
//! # Errors
//! Declined operations are reported through [`Error`]; see its variants.
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::builder::{Callback, CallbackKey, CallbackPhase, CallbackTarget, EventDesc, StateMachineBuilder};
use crate::error::{BuildError, CallbackError, Error, Result};

/// Opaque value used for event arguments and metadata
pub type Value = Arc<dyn Any + Send + Sync>;

/// Information about the event being processed, handed to every callback.
///
/// Callbacks may attach an error, cancel the transition (before/leave phases)
/// or suspend it until [`StateMachine::transition`] (leave phase).
pub struct EventContext<'m> {
    machine: &'m StateMachine,
    event: String,
    src: String,
    dst: String,
    args: Vec<Value>,
    error: Option<CallbackError>,
    canceled: bool,
    is_async: bool,
}

impl<'m> EventContext<'m> {
    fn new(machine: &'m StateMachine, event: &str, src: String, dst: String, args: Vec<Value>) -> Self {
        Self {
            machine,
            event: event.to_string(),
            src,
            dst,
            args,
            error: None,
            canceled: false,
            is_async: false,
        }
    }

    /// The machine processing this event
    pub fn machine(&self) -> &'m StateMachine {
        self.machine
    }

    /// Event name
    pub fn event(&self) -> &str {
        &self.event
    }

    /// State before the transition
    pub fn src(&self) -> &str {
        &self.src
    }

    /// State after the transition
    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Arguments passed to [`StateMachine::event_with_args`]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, if present and of type `T`
    pub fn arg<T: Any + Send + Sync>(&self, index: usize) -> Option<&T> {
        self.args.get(index)?.downcast_ref::<T>()
    }

    /// Error attached so far, if any
    pub fn error(&self) -> Option<&CallbackError> {
        self.error.as_ref()
    }

    /// Attach an error; it is returned to the caller of `event`.
    pub fn set_error(&mut self, err: CallbackError) {
        self.error = Some(err);
    }

    /// Cancel the transition. Only honored in before and leave callbacks.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Cancel the transition, replacing any previously attached error.
    pub fn cancel_with(&mut self, err: CallbackError) {
        self.canceled = true;
        self.error = Some(err);
    }

    /// Keep the machine in the source state until [`StateMachine::transition`]
    /// is called. Only honored in leave callbacks.
    pub fn request_async(&mut self) {
        self.is_async = true;
    }

    /// Whether a callback canceled the transition
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Whether a callback requested an async transition
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    fn into_pending(self) -> PendingTransition {
        PendingTransition {
            event: self.event,
            src: self.src,
            dst: self.dst,
            args: self.args,
            error: self.error,
            committed: false,
        }
    }
}

impl fmt::Debug for EventContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("args", &self.args.len())
            .field("error", &self.error)
            .field("canceled", &self.canceled)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// A staged commit-and-notify step, held while a transition is in flight.
#[derive(Debug, Clone)]
pub struct PendingTransition {
    event: String,
    src: String,
    dst: String,
    args: Vec<Value>,
    error: Option<CallbackError>,
    committed: bool,
}

impl PendingTransition {
    fn staged(event: &str, src: &str, dst: &str) -> Self {
        Self {
            event: event.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
            args: Vec::new(),
            error: None,
            committed: false,
        }
    }

    /// Event that started the transition
    pub fn event(&self) -> &str {
        &self.event
    }

    /// State being left
    pub fn src(&self) -> &str {
        &self.src
    }

    /// State being entered
    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Arguments of the originating event
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Error attached by callbacks so far
    pub fn error(&self) -> Option<&CallbackError> {
        self.error.as_ref()
    }

    /// Whether the destination state has already been written
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    fn attach(self, machine: &StateMachine) -> EventContext<'_> {
        EventContext {
            machine,
            event: self.event,
            src: self.src,
            dst: self.dst,
            args: self.args,
            error: self.error,
            canceled: false,
            is_async: false,
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A finite state machine over string states and events.
pub struct StateMachine {
    current: RwLock<String>,
    // (event, src) -> dst
    transitions: HashMap<(String, String), String>,
    callbacks: HashMap<CallbackKey, Callback>,
    pending: Mutex<Option<PendingTransition>>,
    // Serializes event() and transition().
    event_lock: Mutex<()>,
    metadata: RwLock<HashMap<String, Value>>,
    // Drops the staged continuation right before a synchronous commit.
    #[cfg(test)]
    drop_staged: std::sync::atomic::AtomicBool,
}

impl StateMachine {
    /// Create a state machine from event definitions and name-keyed callbacks.
    ///
    /// See [`StateMachineBuilder`] for the callback naming rules.
    pub fn new(
        initial: impl Into<String>,
        events: Vec<EventDesc>,
        callbacks: HashMap<String, Callback>,
    ) -> std::result::Result<Self, BuildError> {
        callbacks
            .into_iter()
            .fold(
                StateMachineBuilder::new(initial).events(events),
                |builder, (name, func)| builder.boxed_callback(name, func),
            )
            .build()
    }

    /// Start building a state machine in `initial`
    pub fn builder(initial: impl Into<String>) -> StateMachineBuilder {
        StateMachineBuilder::new(initial)
    }

    pub(crate) fn from_parts(
        initial: String,
        transitions: HashMap<(String, String), String>,
        callbacks: HashMap<CallbackKey, Callback>,
    ) -> Self {
        Self {
            current: RwLock::new(initial),
            transitions,
            callbacks,
            pending: Mutex::new(None),
            event_lock: Mutex::new(()),
            metadata: RwLock::new(HashMap::new()),
            #[cfg(test)]
            drop_staged: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Current state
    ///
    /// The state lock is held only for the read, never across callbacks, so a
    /// [`StateMachine::set_state`] from another thread is not blocked by a
    /// running event and is overwritten by its commit.
    pub fn current(&self) -> String {
        read(&self.current).clone()
    }

    /// True if `state` is the current state
    pub fn is(&self, state: &str) -> bool {
        *read(&self.current) == state
    }

    /// Force the current state without running any callback.
    ///
    /// Not coordinated with a pending transition; resolve that first.
    pub fn set_state(&self, state: impl Into<String>) {
        *write(&self.current) = state.into();
    }

    /// True if `event` can fire from the current state and nothing is pending
    pub fn can(&self, event: &str) -> bool {
        let key = (event.to_string(), self.current());
        self.transitions.contains_key(&key) && !self.in_transition()
    }

    /// Negation of [`StateMachine::can`]
    pub fn cannot(&self, event: &str) -> bool {
        !self.can(event)
    }

    /// Events that are defined from the current state, sorted by name
    pub fn available_transitions(&self) -> Vec<String> {
        let current = self.current();
        let mut events: Vec<String> = self
            .transitions
            .keys()
            .filter(|(_, src)| *src == current)
            .map(|(event, _)| event.clone())
            .collect();
        events.sort();
        events
    }

    /// True while a transition is staged, i.e. between an async `event` and
    /// the matching `transition`
    pub fn in_transition(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Snapshot of the staged transition, if any
    pub fn pending_transition(&self) -> Option<PendingTransition> {
        lock(&self.pending).clone()
    }

    /// Every `(event, src, dst)` entry of the transition table, unordered
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        self.transitions
            .iter()
            .map(|((event, src), dst)| (event.as_str(), src.as_str(), dst.as_str()))
    }

    /// Every state mentioned by the transition table, sorted
    pub fn states(&self) -> Vec<String> {
        let states: BTreeSet<&String> = self
            .transitions
            .iter()
            .flat_map(|((_, src), dst)| [src, dst])
            .collect();
        states.into_iter().cloned().collect()
    }

    /// Value stored under `key`
    pub fn metadata(&self, key: &str) -> Option<Value> {
        read(&self.metadata).get(key).cloned()
    }

    /// Value stored under `key`, if it is a `T`
    pub fn metadata_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.metadata(key)?.downcast::<T>().ok()
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set_metadata<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        write(&self.metadata).insert(key.into(), Arc::new(value));
    }

    /// Remove and return the value stored under `key`
    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        write(&self.metadata).remove(key)
    }

    /// Fire `event` without arguments. See [`StateMachine::event_with_args`].
    pub fn event(&self, event: &str) -> Result<()> {
        self.event_with_args(event, Vec::new())
    }

    /// Fire `event`, passing `args` to every callback.
    ///
    /// Returns `Ok(())` when the state changed and no callback attached an
    /// error. Otherwise see [`Error`]: in particular [`Error::Async`] means the
    /// transition is staged and waits for [`StateMachine::transition`].
    pub fn event_with_args(&self, event: &str, args: Vec<Value>) -> Result<()> {
        let _serial = lock(&self.event_lock);

        if self.in_transition() {
            return Err(Error::InTransition {
                event: event.to_string(),
            });
        }

        let src = self.current();
        trace!(event, state = %src, "event requested");

        let Some(dst) = self.transitions.get(&(event.to_string(), src.clone())).cloned() else {
            if self.transitions.keys().any(|(name, _)| name == event) {
                return Err(Error::InvalidEvent {
                    event: event.to_string(),
                    state: src,
                });
            }
            return Err(Error::UnknownEvent {
                event: event.to_string(),
            });
        };

        let mut ctx = EventContext::new(self, event, src, dst, args);
        self.before_event_callbacks(&mut ctx)?;

        if ctx.src == ctx.dst {
            self.after_event_callbacks(&mut ctx);
            return Err(Error::NoTransition(ctx.error));
        }

        // Staged ahead of the leave callbacks so they observe the machine as busy.
        self.stage(PendingTransition::staged(&ctx.event, &ctx.src, &ctx.dst));

        match self.leave_state_callbacks(&mut ctx) {
            Ok(()) => {}
            Err(err @ Error::Async(_)) => {
                debug!(event, src = %ctx.src, dst = %ctx.dst, "transition suspended");
                self.stage(ctx.into_pending());
                return Err(err);
            }
            Err(err) => {
                self.clear_pending();
                return Err(err);
            }
        }

        self.stage(ctx.into_pending());
        #[cfg(test)]
        if self.drop_staged.load(std::sync::atomic::Ordering::SeqCst) {
            self.clear_pending();
        }
        match self.do_transition() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(Error::Callback(err)),
            Err(_) => Err(Error::Internal),
        }
    }

    /// Complete a transition suspended by [`EventContext::request_async`].
    ///
    /// Commits the destination state and runs the enter and after callbacks.
    pub fn transition(&self) -> Result<()> {
        let _serial = lock(&self.event_lock);
        self.do_transition().map(|_| ())
    }

    fn do_transition(&self) -> Result<Option<CallbackError>> {
        let pending = self.pending_transition().ok_or(Error::NotInTransition)?;
        let mut ctx = pending.attach(self);
        self.run_continuation(&mut ctx);
        self.clear_pending();
        Ok(ctx.error)
    }

    fn run_continuation(&self, ctx: &mut EventContext<'_>) {
        *write(&self.current) = ctx.dst.clone();
        if let Some(pending) = lock(&self.pending).as_mut() {
            pending.committed = true;
        }
        debug!(event = %ctx.event, src = %ctx.src, dst = %ctx.dst, "state committed");

        self.enter_state_callbacks(ctx);
        self.after_event_callbacks(ctx);
    }

    fn stage(&self, pending: PendingTransition) {
        *lock(&self.pending) = Some(pending);
    }

    fn clear_pending(&self) {
        *lock(&self.pending) = None;
    }

    fn callback(&self, phase: CallbackPhase, target: CallbackTarget) -> Option<&Callback> {
        self.callbacks.get(&(phase, target))
    }

    fn before_event_callbacks(&self, ctx: &mut EventContext<'_>) -> Result<()> {
        for target in [CallbackTarget::Event(ctx.event.clone()), CallbackTarget::Any] {
            if let Some(func) = self.callback(CallbackPhase::BeforeEvent, target) {
                func(&mut *ctx);
                if ctx.canceled {
                    return Err(Error::Canceled(ctx.error.clone()));
                }
            }
        }
        Ok(())
    }

    fn leave_state_callbacks(&self, ctx: &mut EventContext<'_>) -> Result<()> {
        for target in [CallbackTarget::State(ctx.src.clone()), CallbackTarget::Any] {
            if let Some(func) = self.callback(CallbackPhase::LeaveState, target) {
                func(&mut *ctx);
                if ctx.canceled {
                    return Err(Error::Canceled(ctx.error.clone()));
                } else if ctx.is_async {
                    return Err(Error::Async(ctx.error.clone()));
                }
            }
        }
        Ok(())
    }

    fn enter_state_callbacks(&self, ctx: &mut EventContext<'_>) {
        for target in [CallbackTarget::State(ctx.dst.clone()), CallbackTarget::Any] {
            if let Some(func) = self.callback(CallbackPhase::EnterState, target) {
                func(&mut *ctx);
            }
        }
    }

    fn after_event_callbacks(&self, ctx: &mut EventContext<'_>) {
        for target in [CallbackTarget::Event(ctx.event.clone()), CallbackTarget::Any] {
            if let Some(func) = self.callback(CallbackPhase::AfterEvent, target) {
                func(&mut *ctx);
            }
        }
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current())
            .field("transitions", &self.transitions)
            .field("callbacks", &self.callbacks.len())
            .field("pending", &self.pending_transition())
            .finish_non_exhaustive()
    }
}
