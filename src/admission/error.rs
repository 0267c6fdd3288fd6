use snafu::Snafu;

use super::Tier;

/// Returned by [`AdmissionService`](super::AdmissionService) instead of calling the inner service.
///
/// The HTTP layer is expected to turn `Rejected` into a `429 Too Many Requests`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AdmissionError {
    /// The client ran out of budget on one of the limiting tiers.
    #[snafu(display("Request from {} rejected by the {} limit", client_id, tier))]
    Rejected { client_id: String, tier: Tier },

    /// No client identifier could be extracted and unidentified requests are refused.
    #[snafu(display("Request carries no client identifier"))]
    MissingClientId,
}

impl AdmissionError {
    pub const fn is_rejected(&self) -> bool {
        matches!(self, AdmissionError::Rejected { .. })
    }
}

/// Failure to start the idle-client sweeper.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SweeperError {
    #[snafu(display("Cleanup interval and client expiration must both be non-zero"))]
    ZeroDuration,

    #[snafu(display("Cleanup interval {:?} reaches past the representable clock range", interval))]
    IntervalTooLarge { interval: std::time::Duration },

    #[snafu(display("Failed to build the sweeper runtime: {}", source))]
    BuildRuntime { source: std::io::Error },

    #[snafu(display("Failed to spawn the sweeper thread: {}", source))]
    SpawnThread { source: std::io::Error },
}
