//! Async handshake example
//!
//! A connection waits for an acknowledgement before it becomes established.
//! The `leave_syn_sent` callback suspends the transition; a separate task
//! completes it with `transition()` once the acknowledgement arrives. Events
//! are delivered through a tokio channel acting as an event bus.

use std::sync::Arc;

use callback_fsm::{drive, EventRequest, StateMachine};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let conn = Arc::new(
        StateMachine::builder("closed")
            .event("syn", ["closed"], "syn_sent")
            .event("syn_ack", ["syn_sent"], "established")
            .event("fin", ["established"], "closed")
            .leave_state("syn_sent", |ctx| {
                println!("⏸️  Waiting for ack before entering {}", ctx.dst());
                ctx.request_async();
            })
            .enter_state("established", |_| println!("✅ Connection established"))
            .build()?,
    );

    let (tx, mut rx) = mpsc::channel(4);
    tx.send(EventRequest::new("syn")).await?;
    tx.send(EventRequest::new("syn_ack")).await?;
    drop(tx);

    let report = drive(&conn, &mut rx).await;
    println!(
        "Driven: {} applied, {} declined, suspended: {}",
        report.applied(),
        report.declined(),
        report.ends_suspended()
    );
    assert_eq!(conn.current(), "syn_sent");

    let acker = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            conn.transition()
        })
    };
    acker.await??;

    println!("Current state: {}", conn.current());
    conn.event("fin")?;
    println!("Current state: {}", conn.current());
    Ok(())
}
