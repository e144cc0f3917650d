use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::{ReviewError, ReviewResult};
use crate::models::ImageRecord;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ContributingImage {
    pub image_id: String,
    pub confidence: f64,
}

/// Per-class rollup of one batch's predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassAggregate {
    pub label: String,
    pub count: usize,
    pub confidence_sum: f64,
    pub images: Vec<ContributingImage>,
}

impl ClassAggregate {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            count: 0,
            confidence_sum: 0.0,
            images: Vec::new(),
        }
    }

    fn record(&mut self, image: &ImageRecord) {
        self.count += 1;
        self.confidence_sum += image.confidence;
        self.images.push(ContributingImage {
            image_id: image.id.clone(),
            confidence: image.confidence,
        });
    }

    /// Mean confidence rounded to two decimals, 0 for an empty class.
    pub fn average_confidence(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        round2(self.confidence_sum / self.count as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Single-pass group-by. Aggregates come out in first-seen label order and
/// each aggregate keeps its images in input order.
pub fn group_by_class(records: &[ImageRecord]) -> Vec<ClassAggregate> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut aggregates: Vec<ClassAggregate> = Vec::new();

    for record in records {
        let index = *positions
            .entry(record.prediction.as_str())
            .or_insert_with(|| {
                aggregates.push(ClassAggregate::new(&record.prediction));
                aggregates.len() - 1
            });
        aggregates[index].record(record);
    }

    aggregates
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryStatus {
    Loaded,
    /// The read succeeded and the batch has no images.
    Empty,
    /// The read failed; `aggregates` is empty but says nothing about the batch.
    FetchFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub batch_id: String,
    pub aggregates: Vec<ClassAggregate>,
    pub status: SummaryStatus,
}

impl BatchSummary {
    pub fn total_images(&self) -> usize {
        self.aggregates.iter().map(|aggregate| aggregate.count).sum()
    }

    pub fn class(&self, label: &str) -> Option<&ClassAggregate> {
        self.aggregates.iter().find(|aggregate| aggregate.label == label)
    }
}

/// Reads every image of `batch_id` and groups it. Never fails: a store error
/// becomes [`SummaryStatus::FetchFailed`].
pub async fn summarize_batch(store: &dyn RecordStore, batch_id: &str) -> BatchSummary {
    match store.images(batch_id).await {
        Ok(records) => {
            let aggregates = group_by_class(&records);
            let status = if aggregates.is_empty() {
                SummaryStatus::Empty
            } else {
                SummaryStatus::Loaded
            };
            info!(
                batch_id,
                images = records.len(),
                classes = aggregates.len(),
                "aggregated batch predictions"
            );
            BatchSummary {
                batch_id: batch_id.to_string(),
                aggregates,
                status,
            }
        }
        Err(err) => {
            warn!(batch_id, error = %err, "failed to read batch images");
            BatchSummary {
                batch_id: batch_id.to_string(),
                aggregates: Vec::new(),
                status: SummaryStatus::FetchFailed(err.to_string()),
            }
        }
    }
}

/// Like [`summarize_batch`], but an unknown batch id is an error instead of
/// an empty summary. Used where the result leaves the process.
pub async fn summarize_known_batch(
    store: &dyn RecordStore,
    batch_id: &str,
) -> ReviewResult<BatchSummary> {
    if store.get_batch(batch_id).await?.is_none() {
        return Err(ReviewError::NotFound(format!("batch {batch_id}")));
    }
    Ok(summarize_batch(store, batch_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{batch, image};
    use crate::store::memory::MemoryStore;

    #[test]
    fn scenario_batch_groups_in_first_seen_order() {
        let records = vec![image("i1", "A", 80.0), image("i2", "A", 90.0), image("i3", "B", 70.0)];
        let aggregates = group_by_class(&records);

        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].label, "A");
        assert_eq!(aggregates[0].count, 2);
        assert_eq!(aggregates[0].average_confidence(), 85.0);
        assert_eq!(aggregates[1].label, "B");
        assert_eq!(aggregates[1].count, 1);
        assert_eq!(aggregates[1].average_confidence(), 70.0);
    }

    #[test]
    fn order_is_first_seen_not_alphabetical_or_by_frequency() {
        let records = vec![
            image("i1", "monocyte", 60.0),
            image("i2", "basophil", 70.0),
            image("i3", "basophil", 75.0),
            image("i4", "monocyte", 90.0),
            image("i5", "basophil", 65.0),
        ];
        let labels: Vec<_> = group_by_class(&records)
            .into_iter()
            .map(|aggregate| aggregate.label)
            .collect();
        assert_eq!(labels, vec!["monocyte", "basophil"]);
    }

    #[test]
    fn aggregates_partition_the_records() {
        let records: Vec<_> = (0..23)
            .map(|i| {
                let label = ["A", "B", "C"][i % 3];
                image(&format!("img-{i}"), label, 50.0 + i as f64)
            })
            .collect();
        let aggregates = group_by_class(&records);

        let total: usize = aggregates.iter().map(|a| a.count).sum();
        assert_eq!(total, records.len());

        let mut seen: Vec<String> = aggregates
            .iter()
            .flat_map(|a| {
                assert_eq!(a.count, a.images.len());
                a.images.iter().map(|i| i.image_id.clone())
            })
            .collect();
        seen.sort();
        let mut expected: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn contributing_images_keep_store_order() {
        let records = vec![image("z", "A", 10.0), image("a", "B", 20.0), image("m", "A", 30.0)];
        let aggregates = group_by_class(&records);
        let ids: Vec<_> = aggregates[0].images.iter().map(|i| i.image_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "m"]);
    }

    #[test]
    fn average_is_rounded_to_two_decimals() {
        let records = vec![image("i1", "A", 80.0), image("i2", "A", 90.0), image("i3", "A", 100.0)];
        assert_eq!(group_by_class(&records)[0].average_confidence(), 90.0);

        let records = vec![image("i1", "A", 33.3), image("i2", "A", 33.3), image("i3", "A", 33.35)];
        assert_eq!(group_by_class(&records)[0].average_confidence(), 33.32);
    }

    #[test]
    fn empty_class_reports_zero_average() {
        assert_eq!(ClassAggregate::new("A").average_confidence(), 0.0);
    }

    #[tokio::test]
    async fn summary_distinguishes_empty_batch_from_failed_read() {
        let store = MemoryStore::new();
        store.add_batch(batch("b-empty", "Empty", "d1", "p1"), Vec::new());

        let summary = summarize_batch(&store, "b-empty").await;
        assert_eq!(summary.status, SummaryStatus::Empty);
        assert!(summary.aggregates.is_empty());

        store.fail_reads();
        let summary = summarize_batch(&store, "b-empty").await;
        assert!(matches!(summary.status, SummaryStatus::FetchFailed(_)));
        assert!(summary.aggregates.is_empty());
    }

    #[tokio::test]
    async fn summary_of_scenario_batch() {
        let store = MemoryStore::new();
        store.add_batch(
            batch("bx", "BatchX", "d1", "p1"),
            vec![image("i1", "A", 80.0), image("i2", "A", 90.0), image("i3", "B", 70.0)],
        );

        let summary = summarize_batch(&store, "bx").await;
        assert_eq!(summary.status, SummaryStatus::Loaded);
        assert_eq!(summary.total_images(), 3);
        assert_eq!(summary.class("A").map(|a| a.average_confidence()), Some(85.0));
        assert_eq!(summary.class("B").map(|a| a.count), Some(1));
    }

    #[tokio::test]
    async fn unknown_batch_is_not_summarized_as_empty() {
        let store = MemoryStore::new();
        store.add_batch(
            batch("bx", "BatchX", "d1", "p1"),
            vec![image("i1", "A", 80.0)],
        );

        let err = summarize_known_batch(&store, "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "batch nope not found");

        let summary = summarize_known_batch(&store, "bx").await.unwrap();
        assert_eq!(summary.status, SummaryStatus::Loaded);
        assert_eq!(summary.total_images(), 1);
    }
}
