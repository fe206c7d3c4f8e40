// SPDX-License-Identifier: PMPL-1.0-or-later
//! SARIF 2.1.0 output.
//!
//! One result per finding. Accessibility results point at the captured
//! markup, contrast results at the screenshot; the element or pixel-region
//! descriptor goes into a logical location. Audits that were degraded or
//! excluded are listed in the invocation properties.

use crate::fleet::{Finding, Severity};
use crate::orchestrator::AuditRun;
use crate::outcome::AuditKind;
use serde::Serialize;
use std::collections::BTreeMap;

const SCHEMA: &str = "https://json.schemastore.org/sarif-2.1.0.json";

#[derive(Debug, Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: String,
    version: String,
    runs: Vec<SarifRun>,
}

#[derive(Debug, Serialize)]
struct SarifRun {
    tool: SarifTool,
    invocations: Vec<SarifInvocation>,
    results: Vec<SarifResult>,
}

#[derive(Debug, Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: String,
    version: String,
    information_uri: String,
    rules: Vec<SarifRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    help_uri: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifInvocation {
    execution_successful: bool,
    properties: SarifInvocationProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifInvocationProperties {
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    design_fairness_score: Option<f64>,
    degraded: Vec<AuditKind>,
    excluded: Vec<AuditKind>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: String,
    level: String,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    properties: SarifResultProperties,
}

#[derive(Debug, Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: SarifPhysicalLocation,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    logical_locations: Vec<SarifLogicalLocation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
}

#[derive(Debug, Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLogicalLocation {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResultProperties {
    audit: AuditKind,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    measured_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
}

fn level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::Serious => "error",
        Severity::Moderate => "warning",
        Severity::Minor => "note",
    }
}

/// Artifact a finding refers to
fn artifact_uri(run: &AuditRun, finding: &Finding) -> String {
    let bundle = run.bundle.as_ref();
    let path = match finding.audit {
        AuditKind::Accessibility => bundle.and_then(|b| b.markup_path.as_ref()),
        AuditKind::Contrast => bundle.map(|b| &b.image_path),
        AuditKind::DarkPatterns => None,
    };
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| run.subject.clone())
}

fn result(run: &AuditRun, finding: &Finding) -> SarifResult {
    let logical_locations = if finding.location.is_empty() {
        Vec::new()
    } else {
        vec![SarifLogicalLocation {
            name: finding.location.clone(),
        }]
    };

    let mut text = finding.message.clone();
    if let Some(ref suggestion) = finding.suggestion {
        text.push_str(&format!(" Fix: {}", suggestion));
    }

    SarifResult {
        rule_id: finding.rule_id.clone(),
        level: level(finding.severity).to_string(),
        message: SarifMessage { text },
        locations: vec![SarifLocation {
            physical_location: SarifPhysicalLocation {
                artifact_location: SarifArtifactLocation {
                    uri: artifact_uri(run, finding),
                },
            },
            logical_locations,
        }],
        properties: SarifResultProperties {
            audit: finding.audit,
            severity: finding.severity,
            category: finding.category.clone(),
            measured_ratio: finding.measured_ratio,
            confidence: finding.confidence,
        },
    }
}

/// Render the run as a SARIF log
pub fn render(run: &AuditRun) -> String {
    let findings = run.findings();

    let mut rules: BTreeMap<String, Option<String>> = BTreeMap::new();
    for finding in &findings.findings {
        let help = rules.entry(finding.rule_id.clone()).or_default();
        if help.is_none() {
            help.clone_from(&finding.help_url);
        }
    }

    let results = findings.findings.iter().map(|f| result(run, f)).collect();

    let (degraded, excluded) = run
        .fused
        .as_ref()
        .map(|f| (f.degraded.clone(), f.excluded.clone()))
        .unwrap_or_default();

    let report = SarifReport {
        schema: SCHEMA.to_string(),
        version: "2.1.0".to_string(),
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "fairnessbot".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    information_uri: env!("CARGO_PKG_REPOSITORY").to_string(),
                    rules: rules
                        .into_iter()
                        .map(|(id, help_uri)| SarifRule { id, help_uri })
                        .collect(),
                },
            },
            invocations: vec![SarifInvocation {
                execution_successful: run.is_done(),
                properties: SarifInvocationProperties {
                    state: run.state.to_string(),
                    design_fairness_score: run.fused.as_ref().map(|f| f.overall),
                    degraded,
                    excluded,
                },
            }],
            results,
        }],
    };

    serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
        format!("{{\"error\": \"Failed to serialize SARIF report: {}\"}}", e)
    })
}
