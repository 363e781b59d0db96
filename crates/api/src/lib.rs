//! HTTP and WebSocket gateway for the transfer lifecycle.
//!
//! Exposes transfer commands, the offer race, the verification checklists
//! and drover availability over REST, pushes realtime events over `/ws`,
//! and reports through structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use verification::StepProgressStore;

pub use state::{AppState, create_default_state, create_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, P>(state: Arc<AppState<S, P>>, metrics_handle: PrometheusHandle) -> Router
where
    S: EventStore + 'static,
    P: StepProgressStore + 'static,
{
    use routes::{drovers, offers, system, transfers, verification};

    let metrics_router = Router::new()
        .route("/metrics", get(system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(system::health))
        .route("/ws", get(ws::connect::<S, P>))
        .route("/transfers", post(transfers::create::<S, P>))
        .route("/transfers/{id}", get(transfers::get::<S, P>))
        .route("/transfers/{id}/history", get(transfers::history::<S, P>))
        .route("/transfers/{id}/payment", post(transfers::confirm_payment::<S, P>))
        .route("/transfers/{id}/assign", post(transfers::assign::<S, P>))
        .route("/transfers/{id}/depart", post(transfers::depart::<S, P>))
        .route("/transfers/{id}/arrive", post(transfers::arrive::<S, P>))
        .route("/transfers/{id}/cancel", post(transfers::cancel::<S, P>))
        .route("/transfers/{id}/dispatch", post(offers::dispatch::<S, P>))
        .route("/transfers/{id}/offers", get(offers::list::<S, P>))
        .route("/transfers/{id}/offers/accept", post(offers::accept::<S, P>))
        .route("/transfers/{id}/offers/decline", post(offers::decline::<S, P>))
        .route(
            "/transfers/{id}/verification/{phase}",
            get(verification::progress::<S, P>),
        )
        .route(
            "/transfers/{id}/verification/{phase}/advance",
            post(verification::advance::<S, P>),
        )
        .route(
            "/transfers/{id}/verification/{phase}/goto/{step}",
            post(verification::goto_step::<S, P>),
        )
        .route(
            "/transfers/{id}/verification/{phase}/steps/{step}/reset",
            post(verification::reset_step::<S, P>),
        )
        .route(
            "/transfers/{id}/verification/{phase}/steps/{step}/slots/{slot}",
            put(verification::record_slot::<S, P>).delete(verification::clear_slot::<S, P>),
        )
        .route(
            "/drovers/{id}/availability",
            put(drovers::set_availability::<S, P>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
