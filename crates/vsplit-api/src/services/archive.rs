//! Raw notification archive.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;
use vsplit_models::KeyLayout;
use vsplit_storage::ObjectStore;

/// Store a decoded notification body as JSON under the event namespace.
///
/// Returns the archive key. Failures are logged and otherwise ignored.
pub async fn archive_event(
    store: &dyn ObjectStore,
    layout: &KeyLayout,
    body: &serde_json::Value,
) -> Option<String> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let key = layout.event_archive_key(&timestamp, &Uuid::new_v4().to_string());

    let bytes = match serde_json::to_vec_pretty(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to serialize event for archive: {}", e);
            return None;
        }
    };

    match store.put(&key, bytes, "application/json").await {
        Ok(()) => {
            debug!(key = %key, "Archived event");
            Some(key)
        }
        Err(e) => {
            warn!(key = %key, "Failed to archive event: {}", e);
            None
        }
    }
}
