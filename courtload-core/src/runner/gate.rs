use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared stop condition for constant-VU runs. Every VU asks the gate before
/// starting an iteration; the gate closes on an iteration budget, a deadline,
/// or after a single pass when neither is set.
#[derive(Debug)]
pub struct IterationGate {
    claimed: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationGate {
    pub fn new(iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            claimed: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
        }
    }

    /// Anchors the deadline to the runner's start instant. Idempotent.
    pub fn start_at(&self, started: Instant) {
        if self.deadline.get().is_some() {
            return;
        }

        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    /// Claims the next iteration, returning false once the gate is closed.
    pub fn next(&self) -> bool {
        // Only consult the clock in duration mode.
        if self.duration.is_some() {
            let now = Instant::now();

            // If nobody anchored the deadline, the first claim does.
            if self.deadline.get().is_none() {
                self.start_at(now);
            }

            if let Some(deadline) = self.deadline.get()
                && now >= *deadline
            {
                return false;
            }
        }

        if let Some(total) = self.iterations {
            let idx = self.claimed.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                return false;
            }
        } else if self.duration.is_none() {
            // Neither bound set: each VU gets exactly one pass overall.
            let idx = self.claimed.fetch_add(1, Ordering::Relaxed);
            if idx > 0 {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_a_single_iteration() {
        let gate = IterationGate::new(None, None);
        assert!(gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn iteration_budget_is_shared() {
        let gate = IterationGate::new(Some(3), None);
        assert!(gate.next());
        assert!(gate.next());
        assert!(gate.next());
        assert!(!gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn deadline_closes_the_gate() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(60)));
        let started = Instant::now() - Duration::from_secs(120);
        gate.start_at(started);
        assert!(!gate.next());
    }

    #[test]
    fn open_deadline_admits_iterations() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(60)));
        gate.start_at(Instant::now());
        assert!(gate.next());
        assert!(gate.next());
    }
}
