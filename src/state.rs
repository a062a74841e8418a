use std::sync::Arc;

use crate::db::DbPool;
use crate::presence::PresenceRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key, shared with the identity service)
    pub jwt_secret: Vec<u8>,
    /// Live connections and room addressing
    pub registry: Arc<PresenceRegistry>,
}
