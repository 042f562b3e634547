use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use super::gate::IterationGate;
use crate::iteration::{CallSink, IterationContext, run_iteration};
use crate::profile::LoadProfile;
use crate::schedule::RampingSchedule;
use crate::stats::RunStats;

/// One-shot broadcast that releases every parked VU when the runner starts
/// the clock.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        // Register before re-checking the flag so a start() racing with this
        // call cannot slip between the load and the notified() registration.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.started.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

/// Iteration admission policy for one VU.
#[derive(Debug, Clone)]
pub enum VuWork {
    Constant { gate: Arc<IterationGate> },
    RampingVus { schedule: Arc<RampingSchedule> },
}

pub(super) struct VuRuntime<S> {
    pub vu_id: u64,
    pub profile: Arc<LoadProfile>,
    pub stats: Arc<RunStats>,
    pub sink: Arc<S>,
    pub work: VuWork,
    pub simulate: bool,
    /// Result of the pre-flight health probe. When false, VUs idle instead
    /// of hammering an API that is already down.
    pub healthy: bool,
    pub run_started: Arc<OnceLock<Instant>>,
    pub start_signal: Arc<StartSignal>,
}

pub(super) async fn run_vu<S: CallSink>(rt: VuRuntime<S>) {
    rt.start_signal.wait().await;

    let started = rt.run_started.get().copied().unwrap_or_else(Instant::now);
    let mut iteration: u64 = 0;

    match &rt.work {
        VuWork::Constant { gate } => {
            while gate.next() {
                tick(&rt, iteration).await;
                iteration = iteration.saturating_add(1);
            }
        }
        VuWork::RampingVus { schedule } => loop {
            let elapsed = started.elapsed();
            if schedule.is_done(elapsed) {
                break;
            }

            // VUs above the current target park until the ramp reaches them.
            let target = schedule.target_at(elapsed);
            if rt.vu_id > target {
                let wait = schedule.next_recheck_in(elapsed, rt.vu_id);
                tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                continue;
            }

            tick(&rt, iteration).await;
            iteration = iteration.saturating_add(1);
        },
    }
}

async fn tick<S: CallSink>(rt: &VuRuntime<S>, iteration: u64) {
    if !rt.healthy {
        tokio::time::sleep(Duration::from_millis(250)).await;
        return;
    }

    let ctx = IterationContext {
        profile: &rt.profile,
        stats: &rt.stats,
        vu_id: rt.vu_id,
        iteration,
        simulate: rt.simulate,
    };
    let _ = run_iteration(rt.sink.as_ref(), &ctx).await;
}
