//! Decide, per request, whether a client may proceed.
//!
//! Two token bucket tiers guard the server: one bucket shared by every caller and one bucket per
//! client identifier. Trusted callers can be exempted through a whitelist, and idle per-client
//! state is reclaimed by a background sweeper.

mod controller;
pub mod error;
pub mod internal_event;
pub mod layer;
mod registry;
pub mod service;
mod sweeper;
mod token_bucket;
mod whitelist;

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};

pub use controller::{AdmissionController, Decision, Tier};
pub use error::AdmissionError;
pub use layer::AdmissionLayer;
pub use registry::ClientRegistry;
pub use service::{AdmissionService, ClientIdExtractor, PeerAddr};
pub use sweeper::ExpirySweeper;
pub use token_bucket::TokenBucket;
pub use whitelist::{Whitelist, WhitelistChecker};

fn instant_now() -> std::time::Instant {
    tokio::time::Instant::now().into()
}

/// Refill rate and capacity of a token bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Tokens added per second. `f64::INFINITY` admits everything.
    pub rate: f64,
    /// Largest number of tokens the bucket can hold.
    pub burst: u32,
}

impl Quota {
    pub const fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }

    /// A quota that rejects every request.
    pub const fn closed() -> Self {
        Self::new(0.0, 0)
    }
}

/// Configuration of the admission controller.
///
/// Every field has a default, so `AdmissionSettings::default()` (or passing `None` to
/// [`AdmissionController::new`]) yields a usable two-tier limiter:
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `global_limit` | 100/s, burst 200 | Bucket shared by all clients |
/// | `enable_global_limit` | true | Whether the shared bucket is consulted |
/// | `per_client_limit` | 10/s, burst 20 | Bucket created for each client identifier |
/// | `enable_per_client_limit` | true | Whether per-client buckets are consulted |
/// | `whitelist` | empty | Identifiers exempt from per-client limiting |
/// | `whitelist_checker` | none | Predicate that replaces the static whitelist |
/// | `whitelist_skip_global` | false | Whitelisted clients also skip the shared bucket |
/// | `cleanup_interval` | 5 minutes | Period of the idle-client sweeper |
/// | `client_expiration` | 10 minutes | Idle time after which a client's bucket is dropped |
/// | `enable_log` | false | Log each decision |
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use admission_control::admission::{AdmissionSettings, Quota};
///
/// let settings = AdmissionSettings::builder()
///     .global_limit(Quota::new(500.0, 1000))
///     .per_client_limit(Quota::new(5.0, 10))
///     .client_expiration(Duration::from_secs(120))
///     .build();
/// ```
#[derive(Clone, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionSettings {
    /// Quota of the bucket shared by every client.
    #[builder(default = default_global_limit())]
    pub(crate) global_limit: Quota,

    #[builder(default = true)]
    pub(crate) enable_global_limit: bool,

    /// Quota given to each client identifier the first time it is seen.
    #[builder(default = default_per_client_limit())]
    pub(crate) per_client_limit: Quota,

    #[builder(default = true)]
    pub(crate) enable_per_client_limit: bool,

    /// Identifiers matched exactly.
    #[builder(default)]
    pub(crate) whitelist: HashSet<String>,

    /// When set, this predicate alone decides who is whitelisted.
    #[serde(skip)]
    pub(crate) whitelist_checker: Option<Arc<dyn WhitelistChecker>>,

    /// Whitelisted clients bypass the global bucket as well as their own.
    #[builder(default)]
    pub(crate) whitelist_skip_global: bool,

    /// How often idle clients are swept. Zero disables the sweeper.
    #[builder(default = default_cleanup_interval())]
    pub(crate) cleanup_interval: Duration,

    /// How long a client may stay idle before its bucket is dropped. Zero disables the sweeper.
    #[builder(default = default_client_expiration())]
    pub(crate) client_expiration: Duration,

    #[builder(default)]
    pub(crate) enable_log: bool,
}

const fn default_global_limit() -> Quota {
    Quota::new(100.0, 200)
}

const fn default_per_client_limit() -> Quota {
    Quota::new(10.0, 20)
}

const fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

const fn default_client_expiration() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            enable_global_limit: true,
            per_client_limit: default_per_client_limit(),
            enable_per_client_limit: true,
            whitelist: HashSet::new(),
            whitelist_checker: None,
            whitelist_skip_global: false,
            cleanup_interval: default_cleanup_interval(),
            client_expiration: default_client_expiration(),
            enable_log: false,
        }
    }
}

impl AdmissionSettings {
    /// Admits loopback callers only. Everyone else hits a closed per-client bucket.
    pub fn loopback_only() -> Self {
        Self {
            enable_global_limit: false,
            per_client_limit: Quota::closed(),
            whitelist: ["127.0.0.1", "::1"].into_iter().map(String::from).collect(),
            whitelist_skip_global: true,
            ..Self::default()
        }
    }

    /// The global quota, or `None` when the global tier is disabled.
    pub fn global_quota(&self) -> Option<Quota> {
        self.enable_global_limit.then_some(self.global_limit)
    }

    /// The per-client quota, or `None` when the per-client tier is disabled.
    pub fn per_client_quota(&self) -> Option<Quota> {
        self.enable_per_client_limit.then_some(self.per_client_limit)
    }

    pub fn whitelist_skip_global(&self) -> bool {
        self.whitelist_skip_global
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn client_expiration(&self) -> Duration {
        self.client_expiration
    }

    pub fn enable_log(&self) -> bool {
        self.enable_log
    }

    /// Both sweeper durations must be non-zero for idle clients to be reclaimed.
    pub fn sweeper_enabled(&self) -> bool {
        !self.cleanup_interval.is_zero() && !self.client_expiration.is_zero()
    }
}

impl fmt::Debug for AdmissionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionSettings")
            .field("global_limit", &self.global_quota())
            .field("per_client_limit", &self.per_client_quota())
            .field("whitelist", &self.whitelist)
            .field("whitelist_checker", &self.whitelist_checker.as_ref().map(|_| "custom"))
            .field("whitelist_skip_global", &self.whitelist_skip_global)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("client_expiration", &self.client_expiration)
            .field("enable_log", &self.enable_log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_defaults_match_default() {
        let built = AdmissionSettings::builder().build();
        let default = AdmissionSettings::default();

        assert_eq!(built.global_quota(), default.global_quota());
        assert_eq!(built.per_client_quota(), default.per_client_quota());
        assert_eq!(built.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(built.client_expiration(), Duration::from_secs(600));
        assert!(built.whitelist.is_empty());
        assert!(built.whitelist_checker.is_none());
        assert!(!built.whitelist_skip_global());
        assert!(!built.enable_log());
        assert!(built.sweeper_enabled());
    }

    #[test]
    fn disabled_tiers_report_no_quota() {
        let settings = AdmissionSettings::builder()
            .enable_global_limit(false)
            .enable_per_client_limit(false)
            .build();

        assert_eq!(settings.global_quota(), None);
        assert_eq!(settings.per_client_quota(), None);
    }

    #[test]
    fn zero_duration_disables_sweeper() {
        let settings = AdmissionSettings::builder()
            .cleanup_interval(Duration::ZERO)
            .build();
        assert!(!settings.sweeper_enabled());

        let settings = AdmissionSettings::builder()
            .client_expiration(Duration::ZERO)
            .build();
        assert!(!settings.sweeper_enabled());
    }

    #[test]
    fn deserializes_partial_config() {
        let settings: AdmissionSettings = serde_json::from_value(json!({
            "per_client_limit": { "rate": 2.5, "burst": 4 },
            "whitelist": ["10.0.0.1"],
            "whitelist_skip_global": true,
        }))
        .unwrap();

        assert_eq!(settings.per_client_quota(), Some(Quota::new(2.5, 4)));
        assert_eq!(settings.global_quota(), Some(default_global_limit()));
        assert!(settings.whitelist.contains("10.0.0.1"));
        assert!(settings.whitelist_skip_global());
        assert_eq!(settings.cleanup_interval(), default_cleanup_interval());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_value::<AdmissionSettings>(json!({ "global_rate": 5 }));
        assert!(result.is_err());
    }

    #[test]
    fn loopback_preset_closes_everyone_else() {
        let settings = AdmissionSettings::loopback_only();

        assert_eq!(settings.global_quota(), None);
        assert_eq!(settings.per_client_quota(), Some(Quota::closed()));
        assert!(settings.whitelist.contains("127.0.0.1"));
        assert!(settings.whitelist.contains("::1"));
        assert!(settings.whitelist_skip_global());
    }
}
