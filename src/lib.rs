//! # Callback FSM
//!
//! An embeddable finite state machine over named states and events, with
//! lifecycle callbacks, deferred ("async") transitions, and deterministic
//! Graphviz export.
//!
//! ## Features
//!
//! - 🔁 **Declarative Tables**: Events map one or more source states to a destination
//! - 🪝 **Lifecycle Callbacks**: `before_*`, `leave_*`, `enter_*`, `after_*`, per target or wildcard
//! - ⏸️ **Async Transitions**: Suspend in a leave callback, complete later with `transition()`
//! - 🧵 **Thread Safe**: `event()`/`transition()` are serialized engine-wide
//! - 🗃️ **Metadata Store**: Independently locked key/value data shared across events
//! - 📊 **Diagram Export**: Graphviz DOT, and PlantUML behind the `plantuml` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use callback_fsm::*;
//!
//! # fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let fsm = StateMachine::builder("closed")
//!     .event("open", ["closed"], "open")
//!     .event("close", ["open"], "closed")
//!     .callback("enter_open", |ctx| {
//!         ctx.machine().set_metadata("opened_by", ctx.event().to_string());
//!     })
//!     .build()?;
//!
//! fsm.event("open")?;
//! assert_eq!(fsm.current(), "open");
//! assert!(matches!(fsm.event("open"), Err(Error::InvalidEvent { .. })));
//!
//! println!("{}", visualize(&fsm));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub use async_trait::async_trait;

mod builder;
mod driver;
mod error;
mod fsm;
mod visualizer;

#[cfg(feature = "plantuml")]
mod plantuml;

pub use builder::{Callback, CallbackPhase, CallbackTarget, EventDesc, StateMachineBuilder};
pub use driver::{drive, DriveReport, EventRequest, EventSource};
pub use error::{BuildError, CallbackError, Error, Result};
pub use fsm::{EventContext, PendingTransition, StateMachine, Value};
pub use visualizer::{visualize, visualize_with, VisualizeKind};

#[cfg(feature = "plantuml")]
#[cfg_attr(docsrs, doc(cfg(feature = "plantuml")))]
pub use plantuml::generate_plantuml;

pub mod prelude {
    //! Prelude module for convenient imports
    pub use crate::{
        drive, visualize, CallbackError, Error, EventContext, EventRequest, EventSource, Result,
        StateMachine, StateMachineBuilder,
    };
    pub use async_trait::async_trait;
}
