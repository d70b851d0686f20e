//! Batch driver for the triage harness.
//!
//! Output order always matches input order and every item yields exactly one
//! result, whatever its label.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::classifier::TextClassifier;
use crate::trace::{ClassificationTrace, TraceSink};
use crate::types::{ClassificationResult, FeedbackItem, Label};

pub const DEFAULT_CALL_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pause after every model call, to bound load on the model host.
    pub delay: Duration,
    /// Maximum number of calls in flight. 1 reproduces strictly sequential behaviour.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_CALL_DELAY,
            concurrency: 1,
        }
    }
}

/// Label counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub yes: usize,
    pub no: usize,
    pub uncertain: usize,
    pub error: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ClassificationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            match r.label {
                Label::Yes => summary.yes += 1,
                Label::No => summary.no += 1,
                Label::Uncertain => summary.uncertain += 1,
                Label::Error => summary.error += 1,
            }
        }
        summary
    }
}

pub struct FeedbackBatchRunner<C: TextClassifier> {
    classifier: C,
    config: BatchConfig,
    trace: Option<Arc<dyn TraceSink>>,
}

impl<C: TextClassifier> FeedbackBatchRunner<C> {
    pub fn new(classifier: C, config: BatchConfig) -> Self {
        Self {
            classifier,
            config,
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub async fn run(&self, items: &[FeedbackItem]) -> Vec<ClassificationResult> {
        let total = items.len();
        let concurrency = self.config.concurrency.max(1);
        let delay = self.config.delay;

        info!(total, concurrency, "Classifying feedback");

        let identity = self.trace.as_ref().map(|_| self.classifier.identity());
        let identity = identity.as_ref();

        // `buffered` (not `buffer_unordered`) yields in submission order.
        let results: Vec<ClassificationResult> = stream::iter(items.iter().enumerate().map(
            move |(idx, item)| async move {
                let outcome = self.classifier.triage(&item.text).await;
                info!(
                    index = idx + 1,
                    total,
                    id = %item.id,
                    language = %item.language,
                    label = %outcome.label,
                    "Classified feedback"
                );
                if let (Some(sink), Some(identity)) = (self.trace.as_ref(), identity) {
                    let event = ClassificationTrace::new(idx, item, identity, &outcome);
                    if let Err(err) = sink.record(event) {
                        warn!(error = %err, "Failed to record classification trace");
                    }
                }
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                ClassificationResult::from_item(item, outcome.label)
            },
        ))
        .buffered(concurrency)
        .collect()
        .await;

        let summary = BatchSummary::from_results(&results);
        info!(
            total = summary.total,
            yes = summary.yes,
            no = summary.no,
            uncertain = summary.uncertain,
            error = summary.error,
            "Feedback classification complete"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_label() {
        let item = FeedbackItem::new("1", "x", "en");
        let results: Vec<ClassificationResult> = Label::ALL
            .iter()
            .chain([Label::Yes].iter())
            .map(|l| ClassificationResult::from_item(&item, *l))
            .collect();
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.yes, 2);
        assert_eq!(summary.no, 1);
        assert_eq!(summary.uncertain, 1);
        assert_eq!(summary.error, 1);
    }
}
