use std::time::Duration;

use metrics::{Counter, Gauge, counter, gauge};

use super::{InternalEvent, registered_event};
use crate::admission::{Decision, Tier};

registered_event! {
    AdmissionDecided => {
        whitelisted: Counter = counter!(
            "admission_decisions_total",
            "outcome" => "admitted",
            "tier" => "whitelist"
        ),
        admitted: Counter = counter!(
            "admission_decisions_total",
            "outcome" => "admitted",
            "tier" => "all"
        ),
        rejected_global: Counter = counter!(
            "admission_decisions_total",
            "outcome" => "rejected",
            "tier" => "global"
        ),
        rejected_per_client: Counter = counter!(
            "admission_decisions_total",
            "outcome" => "rejected",
            "tier" => "per_client"
        ),
    }

    fn emit(&self, client_id: &str, decision: Decision, log: bool) {
        match decision {
            Decision::Whitelisted => self.whitelisted.increment(1),
            Decision::Admitted => self.admitted.increment(1),
            Decision::Rejected(Tier::Global) => self.rejected_global.increment(1),
            Decision::Rejected(Tier::PerClient) => self.rejected_per_client.increment(1),
        }

        if !log {
            return;
        }
        match decision {
            Decision::Rejected(tier) => debug!(
                target: "admission_control::decision",
                message = "Request rejected.",
                client_id,
                %tier,
            ),
            decision => trace!(
                target: "admission_control::decision",
                message = "Request admitted.",
                client_id,
                via = decision.tier_label(),
            ),
        }
    }
}

registered_event! {
    ClientsSwept => {
        sweeps: Counter = counter!("admission_sweeps_total"),
        evicted: Counter = counter!("admission_clients_evicted_total", "reason" => "expired"),
        tracked: Gauge = gauge!("admission_tracked_clients"),
    }

    fn emit(&self, removed: usize, remaining: usize) {
        self.sweeps.increment(1);
        self.evicted.increment(removed as u64);
        self.tracked.set(remaining as f64);

        if removed > 0 {
            debug!(message = "Evicted idle clients.", removed, remaining);
        } else {
            trace!(message = "Sweep found no idle clients.", remaining);
        }
    }
}

#[derive(Debug)]
pub struct ClientRemoved<'a> {
    pub client_id: &'a str,
}

impl InternalEvent for ClientRemoved<'_> {
    fn emit(self) {
        counter!("admission_clients_evicted_total", "reason" => "manual").increment(1);
        debug!(message = "Client removed.", client_id = self.client_id);
    }
}

#[derive(Debug)]
pub struct SweeperStarted {
    pub interval: Duration,
    pub expiration: Duration,
}

impl InternalEvent for SweeperStarted {
    fn emit(self) {
        info!(
            message = "Idle client sweeper started.",
            interval_ms = self.interval.as_millis() as u64,
            expiration_ms = self.expiration.as_millis() as u64,
        );
    }
}

#[derive(Debug)]
pub struct SweeperStopped {
    pub passes: u64,
}

impl InternalEvent for SweeperStopped {
    fn emit(self) {
        info!(message = "Idle client sweeper stopped.", passes = self.passes);
    }
}

/// The sweep loop ended without a stop request, typically because its runtime shut down.
#[derive(Debug)]
pub struct SweeperAbandoned {
    pub passes: u64,
}

impl InternalEvent for SweeperAbandoned {
    fn emit(self) {
        warn!(
            message = "Idle client sweeper ended without being stopped; idle clients are no longer evicted.",
            passes = self.passes,
        );
    }
}
