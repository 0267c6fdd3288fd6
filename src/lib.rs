//! Request admission control with a global and a per-client token bucket tier.
//!
//! Every request is judged by [`admission::AdmissionController::decide`]:
//! 1. **Whitelist**: exempt clients skip their own bucket, and the global one too when
//!    `whitelist_skip_global` is set
//! 2. **Global bucket**: one bucket shared by all traffic caps the whole server
//! 3. **Per-client bucket**: created on a client's first request, so one noisy client cannot
//!    starve the others
//!
//! Per-client buckets idle for longer than `client_expiration` are dropped by a background
//! sweeper, which keeps memory bounded no matter how many distinct clients show up.
//!
//! # Safety & Concurrency
//! - Thread-safe: `decide` never blocks on I/O and can be called from any number of threads
//! - No unsafe code
//!
//! # Basic Usage
//! ```
//! use admission_control::admission::{AdmissionController, AdmissionSettings};
//!
//! let controller = AdmissionController::new(Some(AdmissionSettings::default()));
//! if !controller.decide("203.0.113.7") {
//!     // answer 429 Too Many Requests
//! }
//! controller.stop();
//! ```
//!
//! # Tower
//! [`admission::AdmissionLayer`] wraps any `tower::Service` and rejects with
//! [`admission::AdmissionError`] before the inner service is called.
//!
//! # Metrics
//! Decisions and sweeps are reported through the `metrics` facade and `tracing`. Metric handles
//! are registered when a controller is built, so install the recorder first.
pub mod admission;
#[cfg(test)]
pub mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
