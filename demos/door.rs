//! Door state machine example
//!
//! A door that can be opened, closed, locked and unlocked. The example shows:
//! - Event tables with several source states
//! - Named and wildcard callbacks
//! - Canceling a transition from a `before_*` callback
//! - Metadata shared across events
//! - Graphviz and PlantUML export

use callback_fsm::{
    generate_plantuml, visualize, CallbackError, EventContext, StateMachine,
};
use tracing_subscriber::EnvFilter;

fn count_openings(ctx: &mut EventContext<'_>) {
    let machine = ctx.machine();
    let openings = machine.metadata_as::<u32>("openings").map_or(0, |n| *n);
    machine.set_metadata("openings", openings + 1);
    println!("🚪 Door opened ({} times so far)", openings + 1);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let door = StateMachine::builder("closed")
        .event("open", ["closed"], "open")
        .event("close", ["open"], "closed")
        .event("lock", ["closed"], "locked")
        .event("unlock", ["locked"], "closed")
        .callback("enter_open", count_openings)
        .callback("before_lock", |ctx| {
            if ctx.machine().metadata("key").is_none() {
                ctx.cancel_with(CallbackError::msg("no key"));
            }
        })
        .callback("enter_state", |ctx| {
            println!("➡️  {} -> {} via {}", ctx.src(), ctx.dst(), ctx.event());
        })
        .build()?;

    door.event("open")?;
    door.event("close")?;

    match door.event("lock") {
        Err(err) if err.is_canceled() => println!("🔒 Lock refused: {err}"),
        other => other?,
    }

    door.set_metadata("key", "brass");
    door.event("lock")?;
    println!("Available from {}: {:?}", door.current(), door.available_transitions());

    println!("\nGraphviz:\n{}", visualize(&door));
    println!("PlantUML:\n{}", generate_plantuml(&door));
    Ok(())
}
