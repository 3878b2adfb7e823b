use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use revtrace_runtime::Runtime;
use revtrace_store::{Database, queries};

use crate::error::ApiError;

/// Org context header. Authentication lives outside the core; whatever
/// fronts the API resolves credentials and injects the slug here.
pub const ORG_HEADER: &str = "x-revtrace-org";

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Run blocking store work on the shared connection without pinning the
    /// async executor
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, ApiError> + Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        tokio::task::spawn_blocking(move || {
            let mut db = match runtime.db().lock() {
                Ok(db) => db,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut db)
        })
        .await
        .map_err(|e| ApiError::Unavailable(format!("worker join error: {}", e)))?
    }
}

/// Resolve the org context header to an org id
pub fn org_from_headers(db: &Database, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let slug = headers
        .get(ORG_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let org = queries::orgs::get_by_slug(db.conn(), slug)?.ok_or(ApiError::Unauthorized)?;
    Ok(org.id)
}
