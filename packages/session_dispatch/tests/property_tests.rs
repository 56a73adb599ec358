use proptest::prelude::*;
use std::sync::{Arc, Mutex};

use session_dispatch::{
    FnSink, Message, Role, ScriptedAgent, SessionDispatcher, Snapshot, SubscriptionHandle,
    ThreadId, TurnScript,
};

#[derive(Debug, Clone)]
enum Op {
    Subscribe,
    /// Index into the live subscriptions (modulo their count)
    Unsubscribe(usize),
    /// Unsubscribe an already-removed handle again
    UnsubscribeStale(usize),
    Submit,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Subscribe),
        2 => any::<usize>().prop_map(Op::Unsubscribe),
        1 => any::<usize>().prop_map(Op::UnsubscribeStale),
        3 => Just(Op::Submit),
    ]
}

type Log = Arc<Mutex<Vec<String>>>;

/// Apply `ops` to one thread. Returns (received, expected) per subscription
/// in subscribe order.
async fn run(ops: Vec<Op>) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    let agent = Arc::new(ScriptedAgent::new());
    let dispatcher = SessionDispatcher::new(agent.clone());
    let thread = ThreadId::new("prop").unwrap();

    let mut logs: Vec<Log> = Vec::new();
    let mut expected: Vec<Vec<String>> = Vec::new();
    let mut live: Vec<(usize, SubscriptionHandle)> = Vec::new();
    let mut removed: Vec<SubscriptionHandle> = Vec::new();
    let mut history: Vec<Message> = Vec::new();

    for op in ops {
        match op {
            Op::Subscribe => {
                let log: Log = Arc::new(Mutex::new(Vec::new()));
                let log_clone = log.clone();
                let sink = FnSink::shared(move |m: &Message| {
                    log_clone.lock().unwrap().push(m.id.0.clone());
                    Ok(())
                });
                let handle = dispatcher.subscribe(&thread, sink).await;
                live.push((logs.len(), handle));
                logs.push(log);
                expected.push(Vec::new());
            }
            Op::Unsubscribe(i) => {
                if live.is_empty() {
                    continue;
                }
                let (_, handle) = live.remove(i % live.len());
                assert!(dispatcher.unsubscribe(&thread, handle).await);
                removed.push(handle);
            }
            Op::UnsubscribeStale(i) => {
                if removed.is_empty() {
                    continue;
                }
                let handle = removed[i % removed.len()];
                assert!(!dispatcher.unsubscribe(&thread, handle).await);
            }
            Op::Submit => {
                // The agent replays the whole history plus one new message,
                // first without and then with the new one.
                let new = Message::text(
                    format!("m{}", history.len()),
                    Role::Assistant,
                    "reply",
                );
                let before = Snapshot::new(history.clone());
                history.push(new.clone());
                let after = Snapshot::new(history.clone());
                agent.push_turn(TurnScript::new(vec![before, after]));

                dispatcher.submit(&thread, "next").await.unwrap();
                for (index, _) in &live {
                    expected[*index].push(new.id.0.clone());
                }
            }
        }
    }

    let received = logs.iter().map(|l| l.lock().unwrap().clone()).collect();
    (received, expected)
}

proptest! {
    #[test]
    fn sinks_receive_exactly_messages_produced_while_subscribed(
        ops in prop::collection::vec(arb_op(), 1..40)
    ) {
        let (received, expected) = tokio_test::block_on(run(ops));
        prop_assert_eq!(received, expected);
    }

    #[test]
    fn no_sink_sees_an_id_twice(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (received, _) = tokio_test::block_on(run(ops));
        for ids in received {
            let mut sorted = ids.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), ids.len());
        }
    }
}
