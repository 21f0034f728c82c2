//! Plain-text rendering of pipeline state for the terminal

use imageid_classifiers::{HistoryEntry, ModelSummary, PipelineSnapshot, Readiness};
use imageid_core::ClassScore;
use imageid_telemetry::MetricsSnapshot;
use std::fmt::Write;

/// One line per class: `Class N  Confidence level: xx.xx%`
pub fn class_table(scores: &[ClassScore]) -> String {
    let mut out = String::new();
    for row in scores {
        let _ = writeln!(out, "{:<10} Confidence level: {}", row.label, row.confidence);
    }
    out
}

/// Numbered history, most recent first
pub fn history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "History is empty\n".to_string();
    }

    let mut out = String::new();
    for (index, entry) in entries.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", index, entry.reference);
    }
    out
}

/// Model readiness as shown to the user
pub fn readiness(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Loading => "Model Loading...".to_string(),
        Readiness::Ready => "Model ready".to_string(),
        Readiness::Failed(reason) => format!("Model failed to load: {}", reason),
    }
}

/// Summary of the controller state
pub fn status(snapshot: &PipelineSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", readiness(&snapshot.model));
    let _ = writeln!(out, "Phase:   {:?}", snapshot.phase);
    match &snapshot.current {
        Some(reference) => {
            let _ = writeln!(out, "Image:   {}", reference);
        }
        None => {
            let _ = writeln!(out, "Image:   (none)");
        }
    }
    if !snapshot.url_input.is_empty() {
        let _ = writeln!(out, "URL:     {}", snapshot.url_input);
    }
    let _ = writeln!(out, "History: {} entries", snapshot.history_len);
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "Error:   {}", error);
    }
    out.push_str(&class_table(&snapshot.class_scores()));
    out
}

/// What the loaded model expects
pub fn model_summary(summary: &ModelSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Model:   {}", summary.name);
    let _ = writeln!(
        out,
        "Input:   {} ({:?})",
        summary.input.shape, summary.input.layout
    );
    let _ = writeln!(out, "Classes: {}", summary.num_classes);
    let _ = writeln!(out, "Device:  {}", summary.device);
    out
}

/// Pipeline counters
pub fn stats(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Selections:      {}", snapshot.selections);
    let _ = writeln!(out, "Classifications: {}", snapshot.classifications);
    let _ = writeln!(out, "Failures:        {}", snapshot.failures());
    let _ = writeln!(out, "Avg latency:     {}us", snapshot.avg_latency_us());
    let _ = writeln!(out, "Failure rate:    {:.1}%", snapshot.failure_rate() * 100.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageid_core::ConfidenceVector;

    #[test]
    fn test_class_table() {
        let rows = ConfidenceVector::new(vec![0.9725, 0.025]).to_class_scores();
        let table = class_table(&rows);

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Class 1"));
        assert!(lines[0].ends_with("Confidence level: 97.25%"));
        assert!(lines[1].ends_with("Confidence level: 2.50%"));
    }

    #[test]
    fn test_readiness_text() {
        assert_eq!(readiness(&Readiness::Loading), "Model Loading...");
        assert!(readiness(&Readiness::Failed("bad weights".into())).contains("bad weights"));
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(history(&[]), "History is empty\n");
    }
}
