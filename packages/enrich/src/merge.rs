//! Non-destructive merging of resolved category payloads into a plot's
//! enrichment document.
//!
//! The document is a flat map owned by many producers (amenity scans,
//! imagery, this pipeline). A merge only ever writes the key for the
//! category being resolved; every other key must survive byte for byte.

use plot_enrich_models::EnrichmentDocument;

use crate::EnrichError;

/// Merges `payload` into `existing` under the `category` key and verifies
/// that no unrelated key was lost or altered in the process.
///
/// # Errors
///
/// * `EnrichError::MergeDataLoss` if the merged document is missing or has
///   changed any key other than `category`.
pub fn merge_category(
    existing: &EnrichmentDocument,
    category: &str,
    payload: serde_json::Value,
) -> Result<EnrichmentDocument, EnrichError> {
    let mut merged = existing.clone();
    merged.insert(category.to_string(), payload);
    verify_preserved(existing, &merged, category)?;
    Ok(merged)
}

/// Checks that every key of `existing` other than `category` is present and
/// unchanged in `merged`. Runs before any write is persisted.
pub fn verify_preserved(
    existing: &EnrichmentDocument,
    merged: &EnrichmentDocument,
    category: &str,
) -> Result<(), EnrichError> {
    for (key, value) in existing {
        if key == category {
            continue;
        }
        if merged.get(key) != Some(value) {
            return Err(EnrichError::MergeDataLoss {
                category: category.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}
