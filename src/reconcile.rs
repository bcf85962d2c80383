//! Chooses which catalog records an ingestion run should (re-)embed.

use crate::catalog::CatalogRecord;
use crate::vector_index::{IndexError, VectorIndex};

/// Which catalog records to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSelection {
    /// Every record, overwriting existing vectors.
    All,
    /// Only records with no vector in the index yet.
    Missing,
}

/// Filters `records` according to `selection`, consulting the index once per record.
pub fn plan_ingestion(
    records: Vec<CatalogRecord>,
    index: &dyn VectorIndex,
    selection: IngestSelection,
) -> Result<Vec<CatalogRecord>, IndexError> {
    match selection {
        IngestSelection::All => Ok(records),
        IngestSelection::Missing => {
            let mut missing = Vec::new();
            for record in records {
                if !index.contains(&record.video_id)? {
                    missing.push(record);
                }
            }
            Ok(missing)
        }
    }
}
