// HTTP surface over the revtrace runtime: webhook ingress, access-check
// ingress, issue administration, and the read projections the external
// dashboard consumes.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, ORG_HEADER};
