//! Bounded priority inversion, demonstrated.
//!
//! Three tasks share one lock:
//!
//! - LOW  (priority 10) takes the lock at t=0 and crunches for 150 ms.
//! - HIGH (priority 50) wakes at t=100 ms and wants the same lock.
//! - MID  (priority 30) wakes at t=200 ms with 100 ms of pure CPU work.
//!
//! Without priority inheritance MID would preempt LOW inside the critical
//! section and HIGH would wait behind both. Here LOW inherits HIGH's
//! priority the moment HIGH blocks, finishes its section unpreempted, and
//! hands the lock straight to HIGH, which is done long before MID even
//! wakes. Run with `RUST_LOG=strata=debug` to watch the protocol.

use log::info;
use strata_runtime::{Duration, RuntimeBuilder, Timestamp};

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = RuntimeBuilder::new()
        .on_priority_change(|task, old, new| {
            info!("task {task}: priority {old} -> {new}");
        })
        .build();

    let m = rt.mutex();

    let low = rt.spawn("LOW", 10, move |ctx| {
        ctx.acquire(m).expect("LOW acquires");
        info!("[{}] LOW enters the critical section", ctx.now());
        ctx.work(Duration::from_millis(150));
        ctx.release(m).expect("LOW releases");
        info!("[{}] LOW left the critical section", ctx.now());
    });

    let high = rt.spawn("HIGH", 50, move |ctx| {
        ctx.sleep_until(Timestamp::from_millis(100));
        info!("[{}] HIGH wants the lock", ctx.now());
        ctx.acquire(m).expect("HIGH acquires");
        info!("[{}] HIGH got the lock", ctx.now());
        ctx.work(Duration::from_millis(20));
        ctx.release(m).expect("HIGH releases");
        info!("[{}] HIGH done", ctx.now());
    });

    let mid = rt.spawn("MID", 30, move |ctx| {
        ctx.sleep_until(Timestamp::from_millis(200));
        info!("[{}] MID starts crunching", ctx.now());
        ctx.work(Duration::from_millis(100));
        info!("[{}] MID done", ctx.now());
    });

    rt.start();
    rt.join(low).expect("LOW failed");
    rt.join(high).expect("HIGH failed");
    rt.join(mid).expect("MID failed");

    let sched = rt.sched_stats();
    let locks = rt.lock_stats();
    info!(
        "[{}] finished: {} context switches, {} preemptions, {} boost(s), {} restore(s), {} hand-off(s)",
        rt.now(),
        sched.context_switches,
        sched.preemptions,
        locks.boosts,
        locks.restores,
        locks.handoffs,
    );
}
