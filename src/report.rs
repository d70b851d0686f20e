//! Report generation for evaluation runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::batch::BatchSummary;
use crate::evaluation::{ClassMetrics, EvaluationReport, MetricSet, Qualitative};
use crate::fusion::{Alignment, AlignmentReport, FusionConfig};
use crate::prompts::PromptTemplate;

/// Characters of feedback text shown per qualitative example.
pub const TEXT_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct ReportStamp {
    pub model: String,
    pub prompt_template_slug: String,
    pub template_hash: String,
    pub log_weight: f64,
    pub feedback_weight: f64,
    pub threshold: f64,
    pub alignment: Alignment,
}

impl ReportStamp {
    pub fn new(model: impl Into<String>, prompt: &PromptTemplate, fusion: &FusionConfig) -> Self {
        Self {
            model: model.into(),
            prompt_template_slug: prompt.slug.to_string(),
            template_hash: prompt.hash(),
            log_weight: fusion.weights.log(),
            feedback_weight: fusion.weights.feedback(),
            threshold: fusion.threshold,
            alignment: fusion.alignment,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub stamp: ReportStamp,
    pub alignment: AlignmentReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
    pub evaluation: EvaluationReport,
}

pub fn build_report(
    stamp: ReportStamp,
    alignment: AlignmentReport,
    batch: Option<BatchSummary>,
    evaluation: EvaluationReport,
) -> RunReport {
    RunReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        stamp,
        alignment,
        batch,
        evaluation,
    }
}

/// First `max_chars` characters, with an ellipsis when something was cut.
pub fn text_preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn metrics_line(name: &str, m: &ClassMetrics) -> String {
    format!(
        "{name:>14} {:>9.3} {:>9.3} {:>9.3} {:>9}\n",
        m.precision, m.recall, m.f1, m.support
    )
}

/// Plain-text classification table (one row per class plus averages).
pub fn render_metrics_table(set: &MetricSet) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>14} {:>9} {:>9} {:>9} {:>9}\n\n",
        "", "precision", "recall", "f1-score", "support"
    ));
    for row in &set.classes {
        out.push_str(&metrics_line(&row.class.to_string(), &row.metrics));
    }
    out.push('\n');
    let support = set.macro_avg.support;
    out.push_str(&format!(
        "{:>14} {:>9} {:>9} {:>9.3} {:>9}\n",
        "accuracy", "", "", set.accuracy, support
    ));
    out.push_str(&metrics_line("macro avg", &set.macro_avg));
    out.push_str(&metrics_line("weighted avg", &set.weighted_avg));
    out
}

fn metrics_markdown(set: &MetricSet) -> String {
    let mut out = String::new();
    out.push_str("| class | precision | recall | f1 | support |\n");
    out.push_str("|---|---|---|---|---|\n");
    let mut row = |name: &str, m: &ClassMetrics| {
        out.push_str(&format!(
            "| {} | {:.3} | {:.3} | {:.3} | {} |\n",
            name, m.precision, m.recall, m.f1, m.support
        ));
    };
    for class in &set.classes {
        row(&class.class.to_string(), &class.metrics);
    }
    row("macro avg", &set.macro_avg);
    row("weighted avg", &set.weighted_avg);
    out.push_str(&format!("\nAccuracy: {:.3}\n", set.accuracy));
    out
}

pub fn render_report_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# Fused Risk Evaluation\n\n");
    out.push_str(&format!("- Run ID: `{}`\n", report.run_id));
    out.push_str(&format!(
        "- Generated: {}\n",
        report.generated_at.to_rfc3339()
    ));
    out.push_str(&format!("- Model: {}\n", report.stamp.model));
    out.push_str(&format!(
        "- Prompt: {} (`{}`)\n",
        report.stamp.prompt_template_slug,
        &report.stamp.template_hash[..report.stamp.template_hash.len().min(12)]
    ));
    out.push_str(&format!(
        "- Weights: log {:.2} / feedback {:.2}, threshold {:.2}\n",
        report.stamp.log_weight, report.stamp.feedback_weight, report.stamp.threshold
    ));

    let a = &report.alignment;
    out.push_str(&format!(
        "- Alignment: {:?} (requested {:?}), {} aligned from {} log records and {} feedback results\n",
        a.applied, a.requested, a.aligned, a.log_records, a.classification_results
    ));
    if a.dropped_logs > 0 || a.dropped_results > 0 {
        out.push_str(&format!(
            "- Dropped: {} log records, {} feedback results\n",
            a.dropped_logs, a.dropped_results
        ));
    }
    for w in &a.warnings {
        out.push_str(&format!("- Warning: {w}\n"));
    }
    if let Some(batch) = &report.batch {
        out.push_str(&format!(
            "- Feedback labels: {} YES / {} NO / {} UNCERTAIN / {} ERROR\n",
            batch.yes, batch.no, batch.uncertain, batch.error
        ));
    }

    out.push_str("\n## Logs-Only Model\n\n");
    out.push_str(&metrics_markdown(&report.evaluation.log_only));
    out.push_str("\n## Fused Model (Logs + LLM Feedback)\n\n");
    out.push_str(&metrics_markdown(&report.evaluation.fused));

    out.push_str("\n## Qualitative Examples\n\n");
    match &report.evaluation.qualitative {
        Qualitative::Examples(examples) => {
            for ex in examples {
                out.push_str(&format!(
                    "- [{}] \"{}\" → LLM: {}\n  Log prob: {:.2} | Fused risk: {:.2}\n",
                    ex.language,
                    text_preview(&ex.text, TEXT_PREVIEW_CHARS),
                    ex.label,
                    ex.log_prob,
                    ex.fused_risk
                ));
            }
        }
        Qualitative::NoPositiveExamples => {
            out.push_str(&format!("_{}._\n", capitalize(Qualitative::NO_POSITIVES_MESSAGE)));
        }
    }

    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let text = "é".repeat(70);
        let p = text_preview(&text, TEXT_PREVIEW_CHARS);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), TEXT_PREVIEW_CHARS + 3);
        assert_eq!(text_preview("short", TEXT_PREVIEW_CHARS), "short");
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("no positive examples found"), "No positive examples found");
    }
}
