use callback_fsm::{
    visualize, CallbackError, Error, EventContext, EventDesc, StateMachine, StateMachineBuilder,
    Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[derive(Debug, Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }
}

fn handshake(journal: &Arc<Journal>) -> StateMachineBuilder {
    let before = Arc::clone(journal);
    let leave = Arc::clone(journal);
    let enter = Arc::clone(journal);
    let after = Arc::clone(journal);

    StateMachine::builder("closed")
        .event("syn", ["closed"], "syn_sent")
        .event("syn_ack", ["syn_sent"], "established")
        .event("fin", ["established", "syn_sent"], "closed")
        .event("keepalive", ["established"], "established")
        .before_any_event(move |ctx| before.push(format!("before {}", ctx.event())))
        .leave_any_state(move |ctx| leave.push(format!("leave {}", ctx.src())))
        .enter_any_state(move |ctx| enter.push(format!("enter {}", ctx.dst())))
        .after_any_event(move |ctx| after.push(format!("after {}", ctx.event())))
}

#[test]
fn test_connection_lifecycle() {
    let journal = Arc::new(Journal::default());
    let fsm = handshake(&journal).build().unwrap();

    fsm.event("syn").unwrap();
    fsm.event("syn_ack").unwrap();
    assert_eq!(fsm.current(), "established");

    assert_eq!(
        journal.take(),
        vec![
            "before syn",
            "leave closed",
            "enter syn_sent",
            "after syn",
            "before syn_ack",
            "leave syn_sent",
            "enter established",
            "after syn_ack",
        ]
    );

    let err = fsm.event("keepalive").unwrap_err();
    assert!(err.is_no_transition());
    assert_eq!(journal.take(), vec!["before keepalive", "after keepalive"]);

    fsm.event("fin").unwrap();
    assert_eq!(fsm.current(), "closed");
}

#[test]
fn test_job_scenario() {
    let fsm = StateMachine::new(
        "idle",
        vec![
            EventDesc::new("start", ["idle"], "running"),
            EventDesc::new("finish", ["running"], "done"),
        ],
        HashMap::new(),
    )
    .unwrap();

    assert!(matches!(
        fsm.event("finish"),
        Err(Error::InvalidEvent { ref event, ref state }) if event == "finish" && state == "idle"
    ));
    assert!(matches!(
        fsm.event("bogus"),
        Err(Error::UnknownEvent { ref event }) if event == "bogus"
    ));

    fsm.event("start").unwrap();
    assert_eq!(fsm.current(), "running");
}

#[test]
fn test_async_finish_scenario() {
    let fsm = StateMachine::builder("idle")
        .event("start", ["idle"], "running")
        .event("finish", ["running"], "done")
        .callback("leave_running", |ctx: &mut EventContext<'_>| ctx.request_async())
        .build()
        .unwrap();

    fsm.event("start").unwrap();

    let err = fsm.event("finish").unwrap_err();
    assert!(err.is_async());
    assert_eq!(err.to_string(), "async started");
    assert_eq!(fsm.current(), "running");

    fsm.transition().unwrap();
    assert_eq!(fsm.current(), "done");
}

#[test]
fn test_async_completed_from_another_thread() {
    let journal = Arc::new(Journal::default());
    let fsm = Arc::new(
        handshake(&journal)
            .leave_state("syn_sent", |ctx| ctx.request_async())
            .build()
            .unwrap(),
    );

    fsm.event("syn").unwrap();
    assert!(fsm.event("syn_ack").unwrap_err().is_async());
    journal.take();

    let worker = {
        let fsm = Arc::clone(&fsm);
        thread::spawn(move || fsm.transition())
    };
    worker.join().unwrap().unwrap();

    assert_eq!(fsm.current(), "established");
    assert_eq!(journal.take(), vec!["enter established", "after syn_ack"]);
}

#[test]
fn test_cancellation_keeps_state() {
    let journal = Arc::new(Journal::default());
    let fsm = handshake(&journal)
        .before_event("syn", |ctx| {
            ctx.cancel_with(CallbackError::msg("port blocked"));
        })
        .build()
        .unwrap();

    let err = fsm.event("syn").unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(err.callback_error().unwrap().to_string(), "port blocked");
    assert_eq!(fsm.current(), "closed");
    // The named before callback cancels ahead of the wildcard one.
    assert!(journal.take().is_empty());
}

#[test]
fn test_callback_error_source_is_preserved() {
    #[derive(Debug, thiserror::Error)]
    #[error("remote refused")]
    struct Refused;

    let fsm = StateMachine::builder("closed")
        .event("syn", ["closed"], "syn_sent")
        .leave_state("closed", |ctx| ctx.cancel_with(CallbackError::new(Refused)))
        .build()
        .unwrap();

    let err = fsm.event("syn").unwrap_err();
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "remote refused");
    assert!(err.callback_error().unwrap().downcast_ref::<Refused>().is_some());
}

#[test]
fn test_args_reach_callbacks() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = Arc::clone(&seen);
    let fsm = StateMachine::builder("closed")
        .event("syn", ["closed"], "syn_sent")
        .before_event("syn", move |ctx| {
            if let Some(port) = ctx.arg::<usize>(0) {
                seen_clone.store(*port, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

    let args: Vec<Value> = vec![Arc::new(8080usize)];
    fsm.event_with_args("syn", args).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 8080);
}

#[test]
fn test_concurrent_events_do_not_interleave() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let phases = Arc::new(Mutex::new(Vec::new()));
    let (b, l, e, a) = (
        Arc::clone(&phases),
        Arc::clone(&phases),
        Arc::clone(&phases),
        Arc::clone(&phases),
    );
    let fsm = Arc::new(
        StateMachine::builder("off")
            .event("toggle", ["off"], "on")
            .event("toggle", ["on"], "off")
            .before_any_event(move |ctx| b.lock().unwrap().push(('b', ctx.src().to_string())))
            .leave_any_state(move |ctx| l.lock().unwrap().push(('l', ctx.src().to_string())))
            .enter_any_state(move |ctx| e.lock().unwrap().push(('e', ctx.src().to_string())))
            .after_any_event(move |ctx| a.lock().unwrap().push(('a', ctx.src().to_string())))
            .build()
            .unwrap(),
    );

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let fsm = Arc::clone(&fsm);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    fsm.event("toggle").unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let phases = phases.lock().unwrap();
    assert_eq!(phases.len(), THREADS * ROUNDS * 4);

    // Every transition's four phases are contiguous and alternate off/on.
    let mut expected_src = "off";
    for chunk in phases.chunks(4) {
        let kinds: Vec<char> = chunk.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec!['b', 'l', 'e', 'a']);
        assert!(chunk.iter().all(|(_, src)| src == expected_src));
        expected_src = if expected_src == "off" { "on" } else { "off" };
    }

    // An even number of toggles lands back where it started.
    assert_eq!(fsm.current(), "off");
}

#[test]
fn test_concurrent_events_while_suspended() {
    let fsm = Arc::new(
        StateMachine::builder("a")
            .event("go", ["a"], "b")
            .leave_state("a", |ctx| ctx.request_async())
            .build()
            .unwrap(),
    );
    assert!(fsm.event("go").unwrap_err().is_async());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fsm = Arc::clone(&fsm);
            thread::spawn(move || fsm.event("go"))
        })
        .collect();

    for handle in handles {
        assert!(matches!(handle.join().unwrap(), Err(Error::InTransition { .. })));
    }
    assert_eq!(fsm.current(), "a");

    fsm.transition().unwrap();
    assert_eq!(fsm.current(), "b");
}

#[test]
fn test_metadata_is_independent_of_transitions() {
    let fsm = Arc::new(
        StateMachine::builder("a")
            .event("go", ["a"], "b")
            .leave_state("a", |ctx| ctx.request_async())
            .build()
            .unwrap(),
    );
    assert!(fsm.event("go").unwrap_err().is_async());

    // Metadata stays usable from other threads while a transition is suspended.
    let writer = {
        let fsm = Arc::clone(&fsm);
        thread::spawn(move || fsm.set_metadata("retries", 2u8))
    };
    writer.join().unwrap();

    assert_eq!(fsm.metadata_as::<u8>("retries").as_deref(), Some(&2));
    assert!(fsm.in_transition());
}

#[test]
fn test_visualize_matches_table() {
    let fsm = StateMachine::builder("closed")
        .event("open", ["closed"], "open")
        .event("close", ["open"], "closed")
        .build()
        .unwrap();

    assert_eq!(
        visualize(&fsm),
        "digraph fsm {\n    \"closed\" -> \"open\" [ label = \"open\" ];\n    \"open\" -> \"closed\" [ label = \"close\" ];\n\n    \"closed\" [color = \"red\"];\n    \"open\";\n}\n"
    );
}
