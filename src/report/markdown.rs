// SPDX-License-Identifier: PMPL-1.0-or-later
//! Markdown report.
//!
//! Sections, in order: executive summary, score at a glance, coverage,
//! one section per audit, recommendations, scoring methodology, artifacts.
//! An aborted run renders the summary, the abort reason and whatever
//! outcomes exist.

use crate::analyzers::dark_patterns::{DetectionTier, Evidence};
use crate::analyzers::{AccessibilityData, ContrastData, DarkPatternData};
use crate::fleet::Severity;
use crate::orchestrator::{AuditOutcomes, AuditRun};
use crate::outcome::{AuditKind, AuditOutcome};
use crate::report::{coverage_notes, format_score, recommendations, Narrative, NarrativeSource};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Entries listed per group before eliding the rest
const LIST_LIMIT: usize = 10;
const SEGMENT_EXCERPT_CHARS: usize = 150;

/// Render the run as markdown
pub fn render(run: &AuditRun, narrative: &Narrative) -> String {
    let mut out = String::new();

    out.push_str("# Design Fairness Audit Report\n\n");
    let _ = writeln!(out, "- **Subject**: {}", run.subject);
    let _ = writeln!(out, "- **Mode**: {}", run.mode);
    let _ = writeln!(out, "- **Run**: `{}`", run.id);
    let _ = writeln!(out, "- **Started**: {}", run.started_at.to_rfc3339());
    let _ = writeln!(out, "- **State**: {}", run.state);
    out.push_str("\n---\n\n");

    out.push_str("## Executive Summary\n\n");
    out.push_str(narrative.text.trim());
    out.push_str("\n\n");
    if narrative.source == NarrativeSource::Generative {
        out.push_str(
            "*This summary was written by a generative model from the audit results; \
             scores and findings below are authoritative.*\n\n",
        );
    }

    if let Some(reason) = run.abort_reason() {
        let _ = writeln!(out, "**The run was aborted: {}.**\n", reason);
    }

    if let Some(outcomes) = &run.outcomes {
        at_a_glance(&mut out, run, outcomes);
        coverage(&mut out, run);
        accessibility_section(&mut out, &outcomes.accessibility);
        contrast_section(&mut out, &outcomes.contrast);
        dark_pattern_section(&mut out, &outcomes.dark_patterns);
        recommendation_section(&mut out, run);
        methodology(&mut out, run);
    }

    artifacts(&mut out, run);
    out
}

fn at_a_glance(out: &mut String, run: &AuditRun, outcomes: &AuditOutcomes) {
    out.push_str("### At a Glance\n\n");
    if let Some(fused) = &run.fused {
        let _ = writeln!(
            out,
            "**Design Fairness Score: {:.2}** ({})\n",
            fused.overall,
            fused.assessment().label()
        );
    }
    out.push_str("| Audit | Status | Score | Findings |\n");
    out.push_str("|-------|--------|-------|----------|\n");
    for kind in AuditKind::all() {
        let summary = outcomes.summary(kind);
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            kind.label(),
            summary.status,
            format_score(summary.score),
            summary.findings
        );
    }
    out.push('\n');
}

fn coverage(out: &mut String, run: &AuditRun) {
    let notes = coverage_notes(run);
    out.push_str("### Coverage\n\n");
    if notes.is_empty() {
        out.push_str("All audits ran at full fidelity.\n\n");
        return;
    }
    for note in notes {
        let _ = writeln!(out, "- {}", note);
    }
    out.push('\n');
}

/// Heading plus score line, or the failure reason; returns the payload
fn section_header<'a, T>(
    out: &mut String,
    title: &str,
    outcome: &'a AuditOutcome<T>,
) -> Option<&'a T> {
    let _ = writeln!(out, "## {}\n", title);
    match outcome {
        AuditOutcome::Failed { reason, detail } => {
            let _ = write!(out, "Not scored: {}", reason);
            if let Some(detail) = detail {
                let _ = write!(out, " ({})", detail);
            }
            out.push_str(".\n\n");
            None
        }
        _ => {
            let _ = write!(out, "**Score**: {}", format_score(outcome.score()));
            if let Some(reason) = outcome.degradation_reason() {
                let _ = write!(out, " (degraded: {})", reason);
            }
            out.push_str("\n\n");
            outcome.data()
        }
    }
}

fn accessibility_section(out: &mut String, outcome: &AuditOutcome<AccessibilityData>) {
    let Some(data) = section_header(out, "Accessibility (WCAG)", outcome) else {
        return;
    };
    let _ = writeln!(
        out,
        "Engine `{}` reported {} violation(s), weighted count {:.1} against a normalisation of {:.1}.\n",
        data.engine,
        data.violations.len(),
        data.weighted_violation_count,
        data.normalization
    );

    for severity in Severity::all() {
        let mut by_rule: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for v in data.violations.iter().filter(|v| v.severity == severity) {
            by_rule.entry(v.rule_id.as_str()).or_default().push(v);
        }
        if by_rule.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {} ({})\n", severity, data.count(severity));
        for (rule, instances) in by_rule {
            let _ = writeln!(out, "**{}** ({} instance(s)): {}", rule, instances.len(), instances[0].message);
            if let Some(url) = &instances[0].help_url {
                let _ = writeln!(out, "- Learn more: {}", url);
            }
            for v in instances.iter().take(LIST_LIMIT) {
                let _ = writeln!(out, "- `{}`", v.target);
            }
            if instances.len() > LIST_LIMIT {
                let _ = writeln!(out, "- ...and {} more", instances.len() - LIST_LIMIT);
            }
            out.push('\n');
        }
    }
}

fn contrast_section(out: &mut String, outcome: &AuditOutcome<ContrastData>) {
    let Some(data) = section_header(out, "Visual Contrast", outcome) else {
        return;
    };
    let _ = writeln!(
        out,
        "Thresholds: {:.1}:1 for normal text, {:.1}:1 for large text.\n",
        data.normal_text_ratio, data.large_text_ratio
    );
    let _ = write!(
        out,
        "Detector `{}` measured {} region(s), {} passing",
        data.detector,
        data.regions.len(),
        data.passing
    );
    if let Some(avg) = data.average_ratio {
        let _ = write!(out, ", average ratio {:.2}:1", avg);
    }
    out.push_str(".\n\n");

    let failing: Vec<_> = data.failing().collect();
    if failing.is_empty() {
        return;
    }
    out.push_str("| Region | Ratio | Required |\n");
    out.push_str("|--------|-------|----------|\n");
    for region in failing.iter().take(LIST_LIMIT) {
        let _ = writeln!(
            out,
            "| `{}` | {:.2}:1 | {:.1}:1{} |",
            region.locator,
            region.measured_ratio,
            region.required_ratio,
            if region.large_text { " (large)" } else { "" }
        );
    }
    if failing.len() > LIST_LIMIT {
        let _ = writeln!(out, "\n*...and {} more regions*", failing.len() - LIST_LIMIT);
    }
    out.push('\n');
}

fn category_explanation(category: &str) -> &'static str {
    match category.to_lowercase().as_str() {
        "urgency" => "Creates artificial time pressure to rush decisions",
        "scarcity" => "Suggests limited availability to force a choice",
        "confirm-shaming" | "confirmshaming" => "Uses guilt or shame to steer the choice",
        "misdirection" => "Draws attention away from important information",
        "forced continuity" | "forced-continuity" => "Hides ongoing charges behind a free start",
        "sneaking" => "Adds items or commitments the user did not ask for",
        _ => "Potentially manipulative wording",
    }
}

fn dark_pattern_section(out: &mut String, outcome: &AuditOutcome<DarkPatternData>) {
    let Some(data) = section_header(out, "Ethical UX (Dark Patterns)", outcome) else {
        return;
    };
    let tier = match data.tier {
        DetectionTier::Classifier => "text classifier",
        DetectionTier::Lexicon => "keyword lexicon",
    };
    let _ = writeln!(
        out,
        "{} of {} text segment(s) flagged using the {}.\n",
        data.flags.len(),
        data.segments_total,
        tier
    );
    if data.flags.is_empty() {
        out.push_str("No manipulative language was detected.\n\n");
        return;
    }

    let mut by_category: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for flag in &data.flags {
        by_category.entry(flag.category.as_str()).or_default().push(flag);
    }
    for (category, flags) in by_category {
        let _ = writeln!(out, "### {} ({})\n", category, flags.len());
        let _ = writeln!(out, "*{}*\n", category_explanation(category));
        for (i, flag) in flags.iter().take(LIST_LIMIT).enumerate() {
            let excerpt: String = flag.segment.chars().take(SEGMENT_EXCERPT_CHARS).collect();
            let ellipsis = if flag.segment.chars().count() > SEGMENT_EXCERPT_CHARS {
                "..."
            } else {
                ""
            };
            let evidence = match &flag.evidence {
                Evidence::Classifier { confidence } => format!("confidence {:.0}%", confidence * 100.0),
                Evidence::Keyword { matched_phrase } => format!("matched \"{}\"", matched_phrase),
            };
            let _ = writeln!(out, "{}. \"{}{}\" ({})", i + 1, excerpt, ellipsis, evidence);
        }
        if flags.len() > LIST_LIMIT {
            let _ = writeln!(out, "\n*...and {} more*", flags.len() - LIST_LIMIT);
        }
        out.push('\n');
    }
}

fn recommendation_section(out: &mut String, run: &AuditRun) {
    out.push_str("## Recommendations\n\n");
    for (i, rec) in recommendations(run).iter().enumerate() {
        let _ = writeln!(out, "### {}. [{}] {}\n", i + 1, rec.priority, rec.area);
        let _ = writeln!(out, "**Action**: {}\n", rec.action);
        let _ = writeln!(out, "**Impact**: {}\n", rec.impact);
    }
}

fn methodology(out: &mut String, run: &AuditRun) {
    out.push_str("## Scoring Methodology\n\n");
    out.push_str(
        "Design Fairness Score = sum of score x effective weight over the audits that produced \
         a score. Effective weights are the configured weights renormalised to sum to 1 over \
         those audits; failed audits are excluded rather than scored as zero.\n\n",
    );
    out.push_str("- Accessibility: 1 - (severity-weighted violation count / normalisation)\n");
    out.push_str("- Visual Contrast: share of detected regions meeting their required ratio\n");
    out.push_str("- Ethical UX: 1 - (flagged segments / total segments)\n\n");

    let Some(fused) = &run.fused else {
        out.push_str("No fused score was produced.\n\n");
        return;
    };
    out.push_str("| Audit | Configured weight | Effective weight | Score | Contribution |\n");
    out.push_str("|-------|-------------------|------------------|-------|--------------|\n");
    for (kind, component) in &fused.components {
        let _ = writeln!(
            out,
            "| {} | {:.2} | {:.3} | {} | {:.3} |",
            kind.label(),
            component.configured_weight,
            component.effective_weight,
            format_score(component.score),
            component.contribution
        );
    }
    let _ = writeln!(out, "| **Total** | | | | **{:.3}** |\n", fused.overall);
}

fn artifacts(out: &mut String, run: &AuditRun) {
    let Some(bundle) = &run.bundle else {
        return;
    };
    out.push_str("## Artifacts\n\n");
    let _ = writeln!(out, "- **Screenshot**: `{}`", bundle.image_path.display());
    match &bundle.markup_path {
        Some(path) => {
            let _ = writeln!(out, "- **Markup**: `{}`", path.display());
        }
        None => out.push_str("- **Markup**: not captured\n"),
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::{aborted_run, done_run};

    #[test]
    fn test_markdown_sections_in_order() {
        let run = done_run();
        let report = render(&run, &Narrative::template(&run));
        let order = [
            "## Executive Summary",
            "### At a Glance",
            "### Coverage",
            "## Accessibility (WCAG)",
            "## Visual Contrast",
            "## Ethical UX (Dark Patterns)",
            "## Recommendations",
            "## Scoring Methodology",
            "## Artifacts",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|h| report.find(h).unwrap_or_else(|| panic!("missing {}", h)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_markdown_content() {
        let run = done_run();
        let report = render(&run, &Narrative::template(&run));
        assert!(report.contains("**Design Fairness Score: 0.94** (excellent)"));
        assert!(report.contains("| Ethical UX | failed | n/a | 0 |"));
        assert!(report.contains("Not scored: no text content."));
        assert!(report.contains("**Score**: 1.00 (degraded: no text regions detected)"));
        assert!(report.contains("**image-alt** (1 instance(s))"));
        assert!(report.contains("### 1. [MEDIUM] User Testing"));
        assert!(report.contains("- **Markup**: `/tmp/out/page_dom.html`"));
        assert!(!report.contains("generative model"));
    }

    #[test]
    fn test_generative_narrative_is_labelled() {
        let run = done_run();
        let narrative = Narrative {
            source: NarrativeSource::Generative,
            text: "A thoughtful summary.".to_string(),
        };
        let report = render(&run, &narrative);
        assert!(report.contains("A thoughtful summary."));
        assert!(report.contains("generative model"));
    }

    #[test]
    fn test_aborted_markdown() {
        let run = aborted_run();
        let report = render(&run, &Narrative::template(&run));
        assert!(report.contains("**The run was aborted: no audit produced a usable score.**"));
        assert!(report.contains("No fused score was produced."));
        assert!(!report.contains("**Design Fairness Score"));
    }

    #[test]
    fn test_category_explanation_fallback() {
        assert_eq!(
            category_explanation("Urgency"),
            "Creates artificial time pressure to rush decisions"
        );
        assert_eq!(category_explanation("Nagging"), "Potentially manipulative wording");
    }
}
