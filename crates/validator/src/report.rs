//! Run report rendering.
//!
//! The renderer is deliberately minimal: a fixed PDF object layout with
//! Helvetica text lines. The contract that matters is byte stability -
//! the same run document always renders to the same bytes, so the report
//! hash in the signed manifest is reproducible.

use crate::runner::{RunRecord, StepStatus};

const LINES_PER_PAGE: usize = 48;

/// Render the run document to PDF bytes.
pub fn render_pdf(run: &RunRecord) -> Vec<u8> {
    let lines = report_lines(run);
    let pages: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
    build_pdf(&pages)
}

fn report_lines(run: &RunRecord) -> Vec<String> {
    let mut lines = vec![
        "RansomEye Validation Run Report".to_string(),
        String::new(),
        format!("Run ID: {}", run.run_id),
        format!("Scenario: {} ({})", run.scenario_name, run.scenario_id),
        format!(
            "Status: {}",
            match run.status {
                crate::runner::RunStatus::Passed => "PASSED",
                crate::runner::RunStatus::Failed => "FAILED",
            }
        ),
        format!("Started: {}", run.start_time),
        format!("Finished: {}", run.end_time),
        String::new(),
        "Metrics".to_string(),
        format!("  avg latency ms: {:.1}", run.metrics.api_latency_avg),
        format!("  max latency ms: {:.1}", run.metrics.api_latency_max),
        format!("  errors: {}", run.metrics.error_count as u64),
        format!("  queue depth: {}", run.metrics.queue_depth as u64),
        format!("  steps: {}", run.metrics.total_steps as u64),
        format!("  success rate: {:.2}", run.metrics.success_rate),
        String::new(),
        "Health".to_string(),
        format!("  score: {:.4}", run.health.health_score),
        format!("  healthy: {}", run.health.is_healthy),
        format!("  {}", run.health.explanation),
    ];

    if !run.health.shap.is_empty() {
        lines.push("  contributions:".to_string());
        for (feature, contribution) in &run.health.shap {
            lines.push(format!("    {feature}: {contribution:+.4}"));
        }
    }

    lines.push(String::new());
    lines.push("Steps".to_string());
    for step in &run.steps {
        let marker = match step.status {
            StepStatus::Passed => "PASS",
            StepStatus::Failed => "FAIL",
        };
        lines.push(format!(
            "  [{marker}] {} ({} ms, {} attempt(s))",
            step.name, step.latency_ms, step.attempts
        ));
        if let Some(error) = &step.error {
            lines.push(format!("         error: {error}"));
        }
    }
    lines
}

/// Assemble a fixed-layout PDF: catalog, page tree, one Helvetica font and
/// a page+content pair per chunk of lines.
fn build_pdf(pages: &[&[String]]) -> Vec<u8> {
    let page_count = pages.len().max(1);
    let total_objects = 3 + page_count * 2;

    let mut body: Vec<u8> = Vec::new();
    let mut offsets: Vec<usize> = Vec::with_capacity(total_objects + 1);
    body.extend_from_slice(b"%PDF-1.4\n");

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", 4 + i * 2))
        .collect();

    push_object(
        &mut body,
        &mut offsets,
        1,
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
    );
    push_object(
        &mut body,
        &mut offsets,
        2,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_count
        )
        .into_bytes(),
    );
    push_object(
        &mut body,
        &mut offsets,
        3,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    );

    for (i, page_lines) in pages.iter().enumerate() {
        let page_id = 4 + i * 2;
        let content_id = page_id + 1;
        push_object(
            &mut body,
            &mut offsets,
            page_id,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {content_id} 0 R >>"
            )
            .into_bytes(),
        );

        let stream = content_stream(page_lines);
        let mut content = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        content.extend_from_slice(&stream);
        content.extend_from_slice(b"\nendstream");
        push_object(&mut body, &mut offsets, content_id, content);
    }
    if pages.is_empty() {
        let stream = content_stream(&[]);
        push_object(
            &mut body,
            &mut offsets,
            4,
            b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
              /Resources << /Font << /F1 3 0 R >> >> /Contents 5 0 R >>"
                .to_vec(),
        );
        let mut content = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        content.extend_from_slice(&stream);
        content.extend_from_slice(b"\nendstream");
        push_object(&mut body, &mut offsets, 5, content);
    }

    let xref_offset = body.len();
    let mut out = body;
    out.extend_from_slice(format!("xref\n0 {}\n", total_objects + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total_objects + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

fn push_object(body: &mut Vec<u8>, offsets: &mut Vec<usize>, id: usize, content: Vec<u8>) {
    offsets.push(body.len());
    body.extend_from_slice(format!("{id} 0 obj\n").as_bytes());
    body.extend_from_slice(&content);
    body.extend_from_slice(b"\nendobj\n");
}

fn content_stream(lines: &[String]) -> Vec<u8> {
    let mut stream = String::from("BT\n/F1 10 Tf\n50 742 Td\n14 TL\n");
    for line in lines {
        stream.push('(');
        stream.push_str(&escape_pdf_text(line));
        stream.push_str(") Tj\nT*\n");
    }
    stream.push_str("ET");
    stream.into_bytes()
}

fn escape_pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthReport;
    use crate::runner::{RunArtifacts, RunMetrics, RunStatus, StepResult, StepStatus};
    use ransomeye_crypto::hash_bytes;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn sample_run() -> RunRecord {
        RunRecord {
            run_id: Uuid::nil(),
            scenario_id: "scn-1".to_string(),
            scenario_name: "happy_path".to_string(),
            status: RunStatus::Passed,
            start_time: "2026-08-01T00:00:00.000Z".to_string(),
            end_time: "2026-08-01T00:01:00.000Z".to_string(),
            steps: vec![StepResult {
                name: "inject_alert".to_string(),
                status: StepStatus::Passed,
                latency_ms: 42,
                attempts: 1,
                details: serde_json::json!({"alert_id": "a-1"}),
                error: None,
            }],
            metrics: RunMetrics::default(),
            health: HealthReport {
                health_score: 0.9,
                is_healthy: true,
                shap: BTreeMap::from([("error_count".to_string(), -0.1)]),
                explanation: "Run is healthy (score: 0.90).".to_string(),
                model_artifact: None,
                warning: None,
            },
            artifacts: RunArtifacts::default(),
            entry_hash: None,
        }
    }

    #[test]
    fn test_pdf_structure() {
        let bytes = render_pdf(&sample_run());
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Helvetica"));
        assert!(text.contains("inject_alert"));
    }

    #[test]
    fn test_rendering_is_byte_stable() {
        let run = sample_run();
        let first = render_pdf(&run);
        let second = render_pdf(&run);
        assert_eq!(hash_bytes(&first), hash_bytes(&second));
    }

    #[test]
    fn test_changed_input_changes_bytes() {
        let run = sample_run();
        let mut changed = sample_run();
        changed.health.health_score = 0.1;
        assert_ne!(render_pdf(&run), render_pdf(&changed));
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(escape_pdf_text("a(b)c\\d"), "a\\(b\\)c\\\\d");
        assert_eq!(escape_pdf_text("naïve"), "na?ve");
    }

    #[test]
    fn test_many_steps_paginate() {
        let mut run = sample_run();
        for i in 0..200 {
            run.steps.push(StepResult {
                name: format!("step-{i}"),
                status: StepStatus::Passed,
                latency_ms: i,
                attempts: 1,
                details: serde_json::Value::Null,
                error: None,
            });
        }
        let bytes = render_pdf(&run);
        let text = String::from_utf8_lossy(&bytes);
        let page_objects = text.matches("/Type /Page ").count();
        assert!(page_objects >= 4, "expected pagination, got {page_objects}");
    }
}
