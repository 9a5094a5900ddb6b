//! Report generation.
//!
//! This module renders a completed run as Markdown, JSON or TSV and
//! writes the per-round aggregated updates.

use crate::models::{FeatureHit, Report, ReportMetadata, RoundOutcome};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# fedmeta Meta-Analysis Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(&report.rounds));

    for outcome in &report.rounds {
        output.push_str(&generate_round_section(outcome));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Input:** `{}`\n", metadata.input));
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        metadata.run_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Rounds:** {}\n", metadata.rounds));
    section.push_str(&format!(
        "- **Participant Updates:** {}\n",
        metadata.participant_updates
    ));
    section.push_str(&format!(
        "- **Params Type Check:** {}\n",
        if metadata.strict_params_type {
            "strict"
        } else {
            "first participant wins"
        }
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");

    for outcome in &report.rounds {
        toc.push_str(&format!("- [Round {}](#{})\n", outcome.round, anchor(&outcome.round)));
    }

    toc.push('\n');

    toc
}

/// Generate the cross-round summary table.
fn generate_summary_section(rounds: &[RoundOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    if rounds.is_empty() {
        section.push_str("No rounds were aggregated.\n\n");
        return section;
    }

    section.push_str(
        "| Round | Participants | Features | Significant | Exact | Median Precision Gain | Params Type |\n",
    );
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");

    for outcome in rounds {
        let s = &outcome.summary;
        let gain = s
            .median_precision_gain
            .map(|g| format!("{:.3}x", g))
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            outcome.round,
            s.participants,
            s.features,
            s.significant,
            s.exact_features,
            gain,
            outcome.params_type
        ));
    }
    section.push('\n');

    section
}

/// Generate the section for one round.
fn generate_round_section(outcome: &RoundOutcome) -> String {
    let mut section = String::new();

    section.push_str(&format!("## Round {}\n\n", outcome.round));
    section.push_str(&format!(
        "*Participants: {} | Features: {} | |z| threshold: {} | Duration: {:.2}s*\n\n",
        outcome.summary.participants,
        outcome.summary.features,
        outcome.summary.z_threshold,
        outcome.duration_seconds
    ));

    if outcome.summary.exact_features > 0 {
        section.push_str(&format!(
            "> {} features were taken verbatim from a zero-variance participant.\n\n",
            outcome.summary.exact_features
        ));
    }

    section.push_str(&generate_hits_table(&outcome.summary.top_hits));

    section.push_str("<details>\n<summary>Participant files</summary>\n\n");
    for participant in &outcome.participants {
        section.push_str(&format!("- `{}`\n", participant));
    }
    section.push_str("\n</details>\n\n");

    section
}

/// Generate the top features table.
fn generate_hits_table(hits: &[FeatureHit]) -> String {
    if hits.is_empty() {
        return "No features to list.\n\n".to_string();
    }

    let mut table = String::new();

    table.push_str("### Strongest Features\n\n");
    table.push_str("| Feature | Beta | SE | Z |\n");
    table.push_str("|:---:|---:|---:|---:|\n");

    for hit in hits {
        table.push_str(&format!(
            "| {} | {:.6} | {:.6} | {:.3} |\n",
            hit.feature, hit.beta, hit.se, hit.z
        ));
    }
    table.push('\n');

    table
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Fixed-effect inverse-variance weighted meta-analysis by fedmeta*\n");

    footer
}

/// GitHub-style slug of the `## Round <name>` heading.
fn anchor(name: &str) -> String {
    format!("Round {}", name)
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Generate a TSV table of every combined feature.
pub fn generate_tsv_report(report: &Report) -> String {
    let mut output = String::from("round\tfeature\tbeta\tse\tz\n");

    for outcome in &report.rounds {
        let result = &outcome.result;
        for (feature, (beta, se)) in result.beta().iter().zip(result.se()).enumerate() {
            output.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                outcome.round,
                feature,
                beta,
                se,
                beta / se
            ));
        }
    }

    output
}

/// Write each round's aggregated update as `<round>.aggregated.json`.
pub fn write_aggregated_results(rounds: &[RoundOutcome], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut written = Vec::with_capacity(rounds.len());
    for outcome in rounds {
        let path = dir.join(format!("{}.aggregated.json", outcome.round));
        let content = serde_json::to_string_pretty(&outcome.result)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stats;
    use crate::models::{AggregatedResult, ParamsType};
    use chrono::Utc;

    fn create_test_report() -> Report {
        let result = AggregatedResult::new(vec![2.4, -6.0], vec![0.8f64.sqrt(), 1.0], ParamsType::Full);
        let summary = stats::summarize(&result, 2, &[1.0, 1.5], 10, stats::GENOME_WIDE_Z);

        Report {
            metadata: ReportMetadata {
                input: "site_stats".to_string(),
                run_date: Utc::now(),
                rounds: 1,
                participant_updates: 2,
                strict_params_type: true,
                duration_seconds: 0.5,
            },
            rounds: vec![RoundOutcome {
                round: "round_0".to_string(),
                participants: vec!["site-1.json".to_string(), "site-2.json".to_string()],
                params_type: ParamsType::Full,
                result,
                summary,
                duration_seconds: 0.25,
            }],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# fedmeta Meta-Analysis Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Round round_0\n"));
        assert!(markdown.contains("site-2.json"));
        assert!(markdown.contains("-6.000000"));
    }

    #[test]
    fn test_round_headings_use_plain_links() {
        let markdown = generate_markdown_report(&create_test_report());

        assert!(!markdown.contains("{#"));
        assert!(markdown.contains("- [Round round_0](#round-round_0)"));
        assert_eq!(anchor("site.A/2"), "round-sitea2");
    }

    #[test]
    fn test_generate_metadata_section() {
        let report = create_test_report();
        let section = generate_metadata_section(&report.metadata);

        assert!(section.contains("site_stats"));
        assert!(section.contains("strict"));
        assert!(section.contains("Participant Updates:** 2"));
    }

    #[test]
    fn test_generate_hits_table_orders_by_strength() {
        let report = create_test_report();
        let table = generate_hits_table(&report.rounds[0].summary.top_hits);

        let strong = table.find("| 1 |").unwrap();
        let weak = table.find("| 0 |").unwrap();
        assert!(strong < weak);
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"rounds\""));
        assert!(json.contains("\"params_type\": \"FULL\""));
        assert!(json.contains("\"top_hits\""));
    }

    #[test]
    fn test_generate_tsv_report() {
        let report = create_test_report();
        let tsv = generate_tsv_report(&report);
        let lines: Vec<_> = tsv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "round\tfeature\tbeta\tse\tz");
        assert!(lines[2].starts_with("round_0\t1\t-6\t1\t-6"));
    }

    #[test]
    fn test_write_aggregated_results() {
        let dir = tempfile::tempdir().unwrap();
        let report = create_test_report();
        let out = dir.path().join("aggregated");

        let written = write_aggregated_results(&report.rounds, &out).unwrap();
        assert_eq!(written.len(), 1);

        let content = std::fs::read_to_string(&written[0]).unwrap();
        let parsed: AggregatedResult = serde_json::from_str(&content).unwrap();
        let expected = &report.rounds[0].result;
        assert_eq!(parsed.params_type, ParamsType::Full);
        for (a, b) in parsed.beta().iter().zip(expected.beta()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(parsed.se().len(), 2);
    }
}
