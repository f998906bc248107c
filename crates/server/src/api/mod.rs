pub mod artifacts;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod poller;
pub mod routes;
pub mod sessions;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
