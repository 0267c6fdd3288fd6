use tower::Layer;

use super::{AdmissionController, AdmissionService};

/// Applies an [`AdmissionController`] to every request of the wrapped service.
///
/// `extractor` turns a request into the client identifier the controller keys on; see
/// [`PeerAddr`](super::PeerAddr) for the usual choice with `http` servers.
#[derive(Clone, Debug)]
pub struct AdmissionLayer<E> {
    controller: AdmissionController,
    extractor: E,
    reject_unidentified: bool,
}

impl<E> AdmissionLayer<E> {
    pub fn new(controller: AdmissionController, extractor: E) -> Self {
        Self {
            controller,
            extractor,
            reject_unidentified: false,
        }
    }

    /// Refuse requests the extractor cannot identify instead of pooling them under
    /// [`UNKNOWN_CLIENT`](super::service::UNKNOWN_CLIENT).
    pub fn reject_unidentified(mut self, reject: bool) -> Self {
        self.reject_unidentified = reject;
        self
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }
}

impl<S, E: Clone> Layer<S> for AdmissionLayer<E> {
    type Service = AdmissionService<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService::new(
            inner,
            self.controller.clone(),
            self.extractor.clone(),
            self.reject_unidentified,
        )
    }
}
