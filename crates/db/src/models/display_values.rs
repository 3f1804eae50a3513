//! Display value rows shared between segmentations.

use brainns_core::display::DisplayChannels;
use brainns_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `display_values` table.
///
/// `channels` stays `NULL` until the preprocessing job records it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DisplayValues {
    pub id: DbId,
    pub channels: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DisplayValues {
    /// Decode the stored channels. `None` while unset or malformed.
    pub fn decoded(&self) -> Option<DisplayChannels> {
        self.channels
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}
