//! HTTP surface of the ezBIDS session orchestrator.
//!
//! The binary wires the session store, the stage poller and the request
//! services from `ezbids-core` into an axum router under `/api/v1`.

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
