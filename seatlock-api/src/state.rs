use seatlock_core::{QueryService, ReservationEngine};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct RequestRules {
    /// Furthest booking date accepted, in days from today.
    pub max_advance_days: i64,
    /// Deadline for one booking call; the caller is abandoned past it.
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub queries: Arc<QueryService>,
    pub auth: AuthConfig,
    pub rules: RequestRules,
}
