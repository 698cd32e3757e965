//! Liveness endpoint.

/// Plain-text banner for load balancers and curious humans.
pub async fn index() -> &'static str {
    "Location Tracker Server Running"
}
