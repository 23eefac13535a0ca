//! Shared axum router state.

use std::sync::Arc;

use crate::applicator::Applicator;
use crate::broker::Broker;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub applicator: Arc<Applicator>,
}
