use std::sync::Arc;

use tower::ServiceBuilder;
use tower::layer::util::Stack;

use tally_limit::RateGate;

use crate::RateGateLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Gate requests through a shared rate gate, reading the default
    /// `api_key` and `x-forwarded-for` headers.
    fn rate_gate(self, gate: Arc<RateGate>) -> ServiceBuilder<Stack<RateGateLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn rate_gate(self, gate: Arc<RateGate>) -> ServiceBuilder<Stack<RateGateLayer, L>> {
        self.layer(RateGateLayer::new(gate))
    }
}
