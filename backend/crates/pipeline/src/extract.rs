use std::sync::Arc;

use crate::connector::SourceSystem;
use crate::record::ProductRecord;
use crate::watermark::ExtractionWindow;
use prodsync_common::error::ProdsyncResult;

/// Pulls the products changed inside an extraction window.
#[derive(Clone)]
pub struct Extractor {
    source: Arc<dyn SourceSystem>,
}

impl Extractor {
    pub fn new(source: Arc<dyn SourceSystem>) -> Self {
        Self { source }
    }

    /// Products modified inside `window`, oldest first.
    ///
    /// Rows the source returns outside the window, or without a modification
    /// time, are dropped. Source errors are returned as-is; retrying is the
    /// caller's decision.
    pub async fn extract(&self, window: &ExtractionWindow) -> ProdsyncResult<Vec<ProductRecord>> {
        if window.is_empty() {
            tracing::debug!(from = %window.from, "extraction window is empty, skipping query");
            return Ok(Vec::new());
        }

        let fetched = self.source.query_modified(window).await?;
        let fetched_count = fetched.len();

        let mut records: Vec<ProductRecord> = fetched
            .into_iter()
            .filter(|record| match record.last_modified {
                Some(at) => window.contains(at),
                None => {
                    tracing::warn!(key = record.key(), "product has no last modified date, skipping");
                    false
                }
            })
            .collect();
        records.sort_by_key(|record| record.last_modified);

        if records.len() != fetched_count {
            tracing::debug!(
                fetched = fetched_count,
                kept = records.len(),
                "dropped products outside the extraction window"
            );
        }

        tracing::info!(
            source = self.source.system_name(),
            from = %window.from,
            until = %window.until,
            count = records.len(),
            "extracted changed products"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySource;
    use chrono::{Duration, Utc};
    use prodsync_common::error::ProdsyncError;

    fn product(name: &str, modified: Option<chrono::DateTime<Utc>>) -> ProductRecord {
        ProductRecord {
            last_modified: modified,
            ..ProductRecord::named(name)
        }
    }

    #[tokio::test]
    async fn keeps_only_records_inside_window_ordered_oldest_first() {
        let now = Utc::now();
        let source = InMemorySource::new();
        source.seed(vec![
            product("late", Some(now - Duration::seconds(20))),
            product("early", Some(now - Duration::seconds(50))),
            product("too old", Some(now - Duration::seconds(120))),
            product("inside lag", Some(now - Duration::seconds(3))),
        ]);

        let window = ExtractionWindow {
            from: now - Duration::seconds(60),
            until: now - Duration::seconds(10),
        };
        let extractor = Extractor::new(Arc::new(source));
        let records = extractor.extract(&window).await.unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn empty_window_does_not_query_source() {
        let now = Utc::now();
        let source = InMemorySource::new();
        source.fail_queries("should not be called");

        let window = ExtractionWindow { from: now, until: now };
        let extractor = Extractor::new(Arc::new(source));
        assert!(extractor.extract(&window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn surfaces_source_errors() {
        let now = Utc::now();
        let source = InMemorySource::new();
        source.fail_queries("INVALID_SESSION_ID");

        let window = ExtractionWindow {
            from: now - Duration::seconds(60),
            until: now,
        };
        let extractor = Extractor::new(Arc::new(source));
        let err = extractor.extract(&window).await.unwrap_err();
        assert!(matches!(err, ProdsyncError::Source(ref msg) if msg.contains("INVALID_SESSION_ID")));
    }
}
