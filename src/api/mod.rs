//! HTTP query and control API
//!
//! Routes:
//! - `GET /records` - records filtered by field values, time range and URL
//! - `GET /status` - coordinator status snapshot
//! - `GET /failures` - recent terminal fetch failures
//! - `GET /runs` and `GET /runs/{id}` - crawl run history
//! - `GET /health` - liveness
//! - `POST /crawl/start` and `POST /crawl/stop` - crawl lifecycle

mod error;
mod handlers;
mod server;

pub use error::{ApiError, ErrorResponse};
pub use handlers::{create_router, parse_record_query, parse_run_id, parse_timestamp};
pub use server::{build_router, serve, AppState};
