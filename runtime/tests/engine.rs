//! Runtime engine behavior: hand-off selection, panics, mailboxes, yields.

use std::sync::{Arc, Mutex};

use strata_runtime::{ChannelError, Duration, RuntimeBuilder, SchedError, Timestamp};

type Order = Arc<Mutex<Vec<&'static str>>>;

fn push(order: &Order, label: &'static str) {
    order.lock().unwrap().push(label);
}

#[test]
fn test_handoff_prefers_most_urgent_waiter() {
    let order: Order = Arc::new(Mutex::new(Vec::new()));
    let rt = RuntimeBuilder::new().build();
    let m = rt.mutex();

    let o = Arc::clone(&order);
    let owner = rt.spawn("owner", 10, move |ctx| {
        ctx.acquire(m).unwrap();
        push(&o, "owner");
        ctx.work(Duration::from_millis(50));
        ctx.release(m).unwrap();
    });

    let o = Arc::clone(&order);
    let w1 = rt.spawn("w1", 20, move |ctx| {
        ctx.sleep_until(Timestamp::from_millis(10));
        ctx.acquire(m).unwrap();
        push(&o, "w1");
        ctx.release(m).unwrap();
    });

    let o = Arc::clone(&order);
    let w2 = rt.spawn("w2", 30, move |ctx| {
        ctx.sleep_until(Timestamp::from_millis(20));
        ctx.acquire(m).unwrap();
        push(&o, "w2");
        ctx.release(m).unwrap();
    });

    rt.start();
    rt.join(owner).unwrap();
    rt.join(w1).unwrap();
    rt.join(w2).unwrap();

    // w1 queued first but w2 is more urgent; the release at t=50 hands the
    // lock to w2, then w2's release hands it to w1.
    assert_eq!(*order.lock().unwrap(), vec!["owner", "w2", "w1"]);
    assert_eq!(rt.lock_stats().handoffs, 2);
    assert_eq!(rt.lock_stats().contended, 2);
}

#[test]
fn test_join_reports_panic() {
    let rt = RuntimeBuilder::new().build();

    let bad = rt.spawn("bad", 20, |_ctx| {
        panic!("body blew up");
    });
    let good = rt.spawn("good", 10, |ctx| {
        ctx.work(Duration::from_millis(5));
    });

    rt.start();
    assert_eq!(rt.join(bad), Err(SchedError::Panicked(bad)));
    // The panic is contained; other tasks are unaffected.
    assert_eq!(rt.join(good), Ok(()));
    // A second join finds nothing to reap.
    assert_eq!(rt.join(bad), Err(SchedError::UnknownTask(bad)));
}

#[test]
fn test_reacquire_error_reaches_the_body() {
    let rt = RuntimeBuilder::new().build();
    let m = rt.mutex();

    let t = rt.spawn("greedy", 30, move |ctx| {
        ctx.acquire(m).unwrap();
        assert_eq!(
            ctx.acquire(m),
            Err(SchedError::DeadlockRisk {
                task: ctx.id(),
                mutex: m
            })
        );
        ctx.release(m).unwrap();
    });

    rt.start();
    rt.join(t).unwrap();
}

#[test]
fn test_mailbox_blocking_receive() {
    let received = Arc::new(Mutex::new(None));
    let rt = RuntimeBuilder::new().build();
    let mb = rt.mailbox(4);

    let sink = Arc::clone(&received);
    let consumer = rt.spawn("consumer", 50, move |ctx| {
        let msg = ctx.recv(mb).unwrap();
        *sink.lock().unwrap() = Some((msg, ctx.now().as_millis()));
        // The producer is done; only a close can end this wait.
        assert_eq!(ctx.recv(mb), Err(ChannelError::Closed));
    });

    let producer = rt.spawn("producer", 10, move |ctx| {
        ctx.sleep(Duration::from_millis(50));
        ctx.send(mb, b"ping".to_vec()).unwrap();
    });

    rt.start();
    rt.join(producer).unwrap();
    rt.close_mailbox(mb);
    rt.join(consumer).unwrap();

    // The consumer parked at t=0 and woke exactly when the message landed.
    assert_eq!(
        received.lock().unwrap().clone(),
        Some((b"ping".to_vec(), 50))
    );
}

#[test]
fn test_mailbox_full_rejects_send() {
    let rt = RuntimeBuilder::new().build();
    let mb = rt.mailbox(2);

    let t = rt.spawn("flooder", 30, move |ctx| {
        ctx.send(mb, vec![1]).unwrap();
        ctx.send(mb, vec![2]).unwrap();
        assert_eq!(ctx.send(mb, vec![3]), Err(ChannelError::Full));
    });

    rt.start();
    rt.join(t).unwrap();
}

#[test]
fn test_yield_rotates_equal_priority_peers() {
    let order: Order = Arc::new(Mutex::new(Vec::new()));
    let rt = RuntimeBuilder::new().build();

    let o = Arc::clone(&order);
    let a = rt.spawn("a", 30, move |ctx| {
        push(&o, "a1");
        ctx.yield_now();
        push(&o, "a2");
    });
    let o = Arc::clone(&order);
    let b = rt.spawn("b", 30, move |ctx| {
        push(&o, "b1");
        ctx.yield_now();
        push(&o, "b2");
    });

    rt.start();
    rt.join(a).unwrap();
    rt.join(b).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["a1", "b1", "a2", "b2"]);
}
