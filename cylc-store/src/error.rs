use thiserror::Error;

/// Errors raised by [`crate::store::Store`] and [`crate::broadcast::BroadcastStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: String },
}
