use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    AdmissionSettings, ClientRegistry, ExpirySweeper, Quota, TokenBucket, Whitelist, instant_now,
    internal_event::{
        AdmissionDecided, AdmissionDecidedHandle, ClientRemoved, ClientsSwept, ClientsSweptHandle,
        emit, register,
    },
};

/// The limiting tier that turned a request away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Global,
    PerClient,
}

impl Tier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::PerClient => "per_client",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`AdmissionController::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Admitted without consulting the client's own bucket.
    Whitelisted,
    /// Admitted by every enabled tier.
    Admitted,
    Rejected(Tier),
}

impl Decision {
    pub const fn is_admitted(self) -> bool {
        !matches!(self, Decision::Rejected(_))
    }

    pub const fn outcome(self) -> &'static str {
        if self.is_admitted() {
            "admitted"
        } else {
            "rejected"
        }
    }

    pub const fn tier_label(self) -> &'static str {
        match self {
            Decision::Whitelisted => "whitelist",
            Decision::Admitted => "all",
            Decision::Rejected(tier) => tier.as_str(),
        }
    }
}

/// Admission gate combining a global bucket, per-client buckets and a whitelist.
///
/// Handles are cheap to clone and share one state. The idle-client sweeper stops on
/// [`stop`](AdmissionController::stop) or once the last handle is dropped.
///
/// ```rust
/// use admission_control::admission::{AdmissionController, AdmissionSettings, Quota};
///
/// let settings = AdmissionSettings::builder()
///     .global_limit(Quota::new(10.0, 2))
///     .per_client_limit(Quota::new(5.0, 2))
///     .build();
/// let controller = AdmissionController::new(Some(settings));
///
/// assert!(controller.decide("10.0.0.1"));
/// assert!(controller.decide("10.0.0.1"));
/// assert!(!controller.decide("10.0.0.1"));
/// controller.stop();
/// ```
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

struct Inner {
    settings: AdmissionSettings,
    global: Option<TokenBucket>,
    per_client: Option<Quota>,
    registry: Arc<ClientRegistry>,
    whitelist: Whitelist,
    sweeper: Option<ExpirySweeper>,
    decided: AdmissionDecidedHandle,
    swept: ClientsSweptHandle,
}

impl AdmissionController {
    /// Builds a controller; `None` selects [`AdmissionSettings::default`].
    ///
    /// The sweeper is started when both of its durations are non-zero. Inside a Tokio runtime it
    /// is spawned on that runtime and ends when the runtime shuts down, so a controller outliving
    /// its runtime should be built outside of it to keep its own sweeper thread.
    ///
    /// Metric handles are registered here, so install the `metrics` recorder beforehand.
    pub fn new(settings: Option<AdmissionSettings>) -> Self {
        let settings = settings.unwrap_or_default();
        let registry = Arc::new(ClientRegistry::new());

        let sweeper = if settings.sweeper_enabled() {
            match ExpirySweeper::start(
                Arc::clone(&registry),
                settings.cleanup_interval,
                settings.client_expiration,
            ) {
                Ok(sweeper) => Some(sweeper),
                Err(error) => {
                    error!(message = "Idle client sweeper failed to start; clients will only be evicted manually.", %error);
                    None
                }
            }
        } else {
            warn!(
                message = "Idle client sweeper disabled; per-client state grows until removed manually.",
                cleanup_interval_ms = settings.cleanup_interval.as_millis() as u64,
                client_expiration_ms = settings.client_expiration.as_millis() as u64,
            );
            None
        };

        info!(
            message = "Admission controller configured.",
            global = ?settings.global_quota(),
            per_client = ?settings.per_client_quota(),
            whitelist_skip_global = settings.whitelist_skip_global,
        );

        Self {
            inner: Arc::new(Inner {
                global: settings.global_quota().map(TokenBucket::new),
                per_client: settings.per_client_quota(),
                whitelist: Whitelist::from_settings(&settings),
                registry,
                sweeper,
                decided: register(AdmissionDecided),
                swept: register(ClientsSwept),
                settings,
            }),
        }
    }

    /// Whether a request from `client_id` may proceed.
    pub fn decide(&self, client_id: &str) -> bool {
        self.check(client_id).is_admitted()
    }

    /// Like [`decide`](Self::decide), reporting which tier decided.
    ///
    /// Whitelisted clients never touch their own bucket; they skip the global bucket too when
    /// `whitelist_skip_global` is set. The global bucket is consulted before the client's bucket,
    /// so a request rejected globally leaves the client's budget untouched.
    pub fn check(&self, client_id: &str) -> Decision {
        let decision = self.evaluate(client_id);
        self.inner
            .decided
            .emit(client_id, decision, self.inner.settings.enable_log);
        decision
    }

    fn evaluate(&self, client_id: &str) -> Decision {
        let inner = &*self.inner;

        let whitelisted = inner.whitelist.is_whitelisted(client_id);
        if whitelisted && inner.settings.whitelist_skip_global {
            return Decision::Whitelisted;
        }

        if let Some(global) = &inner.global {
            if !global.allow() {
                return Decision::Rejected(Tier::Global);
            }
        }

        if whitelisted {
            return Decision::Whitelisted;
        }

        if let Some(quota) = inner.per_client {
            if !inner.registry.get_or_create(client_id, quota).allow() {
                return Decision::Rejected(Tier::PerClient);
            }
        }

        Decision::Admitted
    }

    /// Number of clients with a live bucket.
    pub fn count(&self) -> usize {
        self.inner.registry.count()
    }

    /// Last request time of every tracked client.
    pub fn info(&self) -> HashMap<String, Instant> {
        self.inner.registry.snapshot()
    }

    /// Time since the last request of every tracked client.
    pub fn idle_durations(&self) -> HashMap<String, Duration> {
        let now = instant_now();
        self.inner
            .registry
            .snapshot()
            .into_iter()
            .map(|(id, last_used)| (id, now.saturating_duration_since(last_used)))
            .collect()
    }

    /// Forgets a client's bucket; its next request starts with a full budget.
    pub fn remove_client(&self, client_id: &str) -> bool {
        let removed = self.inner.registry.remove(client_id);
        if removed {
            emit(ClientRemoved { client_id });
        }
        removed
    }

    /// Runs one eviction pass now, independent of the sweeper. Returns the number evicted.
    pub fn purge_idle(&self) -> usize {
        let registry = &self.inner.registry;
        let removed = registry.sweep(instant_now(), self.inner.settings.client_expiration);
        self.inner.swept.emit(removed, registry.count());
        removed
    }

    /// Stops the sweeper without waiting for it. Safe to call repeatedly and from any handle.
    pub fn stop(&self) {
        if let Some(sweeper) = &self.inner.sweeper {
            sweeper.stop();
        }
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.inner
            .sweeper
            .as_ref()
            .is_some_and(ExpirySweeper::is_running)
    }

    /// Sweep passes completed by the background sweeper.
    pub fn sweep_passes(&self) -> u64 {
        self.inner.sweeper.as_ref().map_or(0, ExpirySweeper::passes)
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.inner.settings
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("settings", &self.inner.settings)
            .field("clients", &self.count())
            .field("sweeper_running", &self.is_sweeper_running())
            .finish()
    }
}
