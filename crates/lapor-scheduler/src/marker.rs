//! Last-processed row watermark. Separates "new" rows from "update" edits.

use lapor_core::error::Result;
use lapor_core::traits::PropertyStore;

use crate::gate::GateGuard;

pub const LAST_ROW_PROCESSED_KEY: &str = "last_row_processed";

/// Read the watermark, if one has been recorded.
pub fn load(store: &dyn PropertyStore) -> Result<Option<u32>> {
    Ok(store
        .get(LAST_ROW_PROCESSED_KEY)?
        .and_then(|v| v.trim().parse::<u32>().ok()))
}

/// Move the watermark to `row` unless it is already at or past it.
/// Returns the watermark after the call.
pub fn advance(_gate: &GateGuard, store: &dyn PropertyStore, row: u32) -> Result<u32> {
    match load(store)? {
        Some(current) if current >= row => Ok(current),
        _ => {
            store.set(LAST_ROW_PROCESSED_KEY, &row.to_string())?;
            tracing::debug!("📍 Last processed row → {row}");
            Ok(row)
        }
    }
}
