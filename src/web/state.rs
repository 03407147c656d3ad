use std::sync::Arc;

use sqlx::PgPool;

use crate::storage::Store;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Present when backed by Postgres; readiness degrades to "always
    /// ready" for embedded stores.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, pool: Option<PgPool>) -> Self {
        Self { store, pool }
    }
}
