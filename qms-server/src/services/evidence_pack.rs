//! Evidence pack assembly
//!
//! Collects the quality records of a reporting period and turns them into a
//! flat outline of headings and text lines. Output formats implement
//! [`EvidencePackRenderer`] and only ever see that outline.

use chrono::{DateTime, Utc};
use qms_common::query::DateRange;
use qms_common::Result;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

use crate::db::audit_logs::{self, AuditLogEntry};
use crate::db::audits::{self, Audit};
use crate::db::capas::{self, Capa};
use crate::db::findings::{self, AuditFinding};
use crate::db::ideas::{self, ImprovementIdea};
use crate::db::ncrs::{self, Ncr};
use crate::db::tasks::{self, ImplementationTask};

fn yes() -> bool {
    true
}

/// Request body of `POST /api/evidence-pack/generate`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackRequest {
    #[serde(default = "yes")]
    pub include_audits: bool,
    #[serde(default = "yes")]
    pub include_findings: bool,
    #[serde(default = "yes")]
    pub include_ncrs: bool,
    #[serde(default = "yes")]
    pub include_capas: bool,
    #[serde(default = "yes")]
    pub include_improvement_ideas: bool,
    #[serde(default = "yes")]
    pub include_audit_log: bool,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Default for EvidencePackRequest {
    fn default() -> Self {
        Self {
            include_audits: true,
            include_findings: true,
            include_ncrs: true,
            include_capas: true,
            include_improvement_ideas: true,
            include_audit_log: true,
            start_date: None,
            end_date: None,
        }
    }
}

impl EvidencePackRequest {
    /// Validated reporting period
    pub fn period(&self) -> Result<DateRange> {
        DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())
    }
}

/// Records gathered for one pack; `None` means the section was not requested
#[derive(Debug, Clone)]
pub struct EvidencePack {
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub period: DateRange,
    pub audits: Option<Vec<Audit>>,
    pub findings: Option<Vec<AuditFinding>>,
    pub ncrs: Option<Vec<Ncr>>,
    pub capas: Option<Vec<Capa>>,
    pub ideas: Option<Vec<ImprovementIdea>>,
    /// Implementation tasks of the listed ideas, by idea id
    pub idea_tasks: HashMap<i64, Vec<ImplementationTask>>,
    pub audit_log: Option<Vec<AuditLogEntry>>,
}

/// One line of the rendered outline
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Title(String),
    Heading(String),
    Text(String),
    Blank,
}

/// Turns an evidence pack into a downloadable document
pub trait EvidencePackRenderer: Send + Sync {
    /// MIME type of [`render`](Self::render) output
    fn content_type(&self) -> &'static str;

    /// File name extension without the dot
    fn file_extension(&self) -> &'static str;

    fn render(&self, pack: &EvidencePack) -> Result<Vec<u8>>;
}

/// Load every requested section for the period
///
/// Findings belong to the audits scheduled in the period, whether or not
/// the audit section itself is included.
pub async fn collect(
    pool: &SqlitePool,
    request: &EvidencePackRequest,
    period: DateRange,
    generated_by: &str,
) -> Result<EvidencePack> {
    let audits_in_period = if request.include_audits || request.include_findings {
        Some(audits::find_in_range(pool, &period).await?)
    } else {
        None
    };

    let findings = match (&audits_in_period, request.include_findings) {
        (Some(audits), true) => {
            let ids: Vec<i64> = audits.iter().map(|a| a.id).collect();
            Some(findings::find_by_audits(pool, &ids).await?)
        }
        _ => None,
    };

    let ncrs = if request.include_ncrs {
        Some(ncrs::find_in_range(pool, &period).await?)
    } else {
        None
    };
    let capas = if request.include_capas {
        Some(capas::find_in_range(pool, &period).await?)
    } else {
        None
    };
    let ideas = if request.include_improvement_ideas {
        Some(ideas::find_in_range(pool, &period).await?)
    } else {
        None
    };
    let mut idea_tasks = HashMap::new();
    for idea in ideas.iter().flatten() {
        let tasks = tasks::find_by_idea(pool, idea.id).await?;
        if !tasks.is_empty() {
            idea_tasks.insert(idea.id, tasks);
        }
    }
    let audit_log = if request.include_audit_log {
        Some(audit_logs::find_in_range(pool, &period).await?)
    } else {
        None
    };

    let pack = EvidencePack {
        generated_at: qms_common::time::now(),
        generated_by: generated_by.to_string(),
        period,
        audits: audits_in_period.filter(|_| request.include_audits),
        findings,
        ncrs,
        capas,
        ideas,
        idea_tasks,
        audit_log,
    };
    debug!(records = pack.record_count(), "Evidence pack collected");
    Ok(pack)
}

fn opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

fn section<T>(
    lines: &mut Vec<Line>,
    heading: &str,
    records: &Option<Vec<T>>,
    describe: impl Fn(&T) -> Vec<String>,
) {
    let Some(records) = records else {
        return;
    };
    lines.push(Line::Heading(format!("{} ({})", heading, records.len())));
    if records.is_empty() {
        lines.push(Line::Text("No records in this period.".to_string()));
    }
    for record in records {
        lines.extend(describe(record).into_iter().map(Line::Text));
    }
    lines.push(Line::Blank);
}

impl EvidencePack {
    pub fn record_count(&self) -> usize {
        fn len<T>(v: &Option<Vec<T>>) -> usize {
            v.as_ref().map_or(0, Vec::len)
        }
        len(&self.audits)
            + len(&self.findings)
            + len(&self.ncrs)
            + len(&self.capas)
            + len(&self.ideas)
            + len(&self.audit_log)
    }

    pub fn period_label(&self) -> String {
        match (self.period.start, self.period.end) {
            (None, None) => "All records".to_string(),
            (Some(start), None) => format!("From {}", start),
            (None, Some(end)) => format!("Up to {}", end),
            (Some(start), Some(end)) => format!("{} to {}", start, end),
        }
    }

    /// Document outline shared by all renderers
    pub fn outline(&self) -> Vec<Line> {
        let mut lines = vec![
            Line::Title("QMS Evidence Pack".to_string()),
            Line::Text(format!("Period: {}", self.period_label())),
            Line::Text(format!(
                "Generated: {} by {}",
                self.generated_at.format("%Y-%m-%d %H:%M UTC"),
                self.generated_by
            )),
            Line::Blank,
        ];

        section(&mut lines, "Audits", &self.audits, |a| {
            vec![
                format!("{}  {}  [{}]", a.audit_number, a.title, a.status),
                format!(
                    "    Type: {}  Scheduled: {}  Department: {}  Lead auditor: {}  Findings: {}",
                    a.audit_type,
                    a.scheduled_date,
                    opt(&a.department_name),
                    opt(&a.lead_auditor_name),
                    a.finding_count
                ),
            ]
        });
        section(&mut lines, "Audit Findings", &self.findings, |f| {
            vec![
                format!("{}  {}  [{} / {}]", opt(&f.audit_number), f.title, f.severity, f.status),
                format!(
                    "    Clause: {}  NCR: {}  Due: {}",
                    opt(&f.clause_reference),
                    opt(&f.ncr_number),
                    opt(&f.due_date)
                ),
            ]
        });
        section(&mut lines, "Non-Conformance Reports", &self.ncrs, |n| {
            vec![
                format!("{}  {}  [{} / {}]", n.ncr_number, n.title, n.severity, n.status),
                format!(
                    "    Source: {}  Detected: {}  Department: {}  CAPAs: {}",
                    n.source,
                    n.detected_date,
                    opt(&n.department_name),
                    n.capa_count
                ),
            ]
        });
        section(&mut lines, "Corrective and Preventive Actions", &self.capas, |c| {
            vec![
                format!("{}  {}  [{} / {}]", c.capa_number, c.title, c.priority, c.status),
                format!(
                    "    Type: {}  NCR: {}  Target: {}  Verified: {}",
                    c.capa_type,
                    opt(&c.ncr_number),
                    opt(&c.target_date),
                    c.verified_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string())
                ),
            ]
        });
        section(&mut lines, "Improvement Ideas", &self.ideas, |i| {
            let mut text = vec![
                format!("{}  {}  [{}]", i.idea_number, i.title, i.status),
                format!(
                    "    Category: {}  Submitted by: {}  Reviewed by: {}",
                    opt(&i.category),
                    opt(&i.submitter_name),
                    opt(&i.reviewer_name)
                ),
            ];
            for t in self.idea_tasks.get(&i.id).into_iter().flatten() {
                text.push(format!(
                    "    Task: {}  [{}]  {}%  Assigned to: {}",
                    t.task_name,
                    t.status,
                    t.progress_percentage,
                    opt(&t.assigned_to_name)
                ));
            }
            text
        });
        section(&mut lines, "Audit Trail", &self.audit_log, |e| {
            vec![format!(
                "{}  {}  {} {}#{}",
                e.created_at.format("%Y-%m-%d %H:%M"),
                opt(&e.username),
                e.action,
                e.entity_type,
                opt(&e.entity_id)
            )]
        });

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pack() -> EvidencePack {
        EvidencePack {
            generated_at: qms_common::time::now(),
            generated_by: "auditor".to_string(),
            period: DateRange::default(),
            audits: Some(Vec::new()),
            findings: None,
            ncrs: Some(Vec::new()),
            capas: None,
            ideas: None,
            idea_tasks: HashMap::new(),
            audit_log: None,
        }
    }

    #[test]
    fn test_request_flags_default_to_true() {
        let request: EvidencePackRequest =
            serde_json::from_str(r#"{"includeCapas": false, "startDate": "2026-01-01"}"#).unwrap();
        assert!(request.include_audits);
        assert!(request.include_audit_log);
        assert!(!request.include_capas);
        assert_eq!(request.start_date.as_deref(), Some("2026-01-01"));
    }

    #[test]
    fn test_period_rejects_reversed_dates() {
        let request = EvidencePackRequest {
            start_date: Some("2026-05-01".to_string()),
            end_date: Some("2026-04-01".to_string()),
            ..Default::default()
        };
        assert!(request.period().is_err());
    }

    #[test]
    fn test_outline_lists_only_requested_sections() {
        let outline = empty_pack().outline();
        assert_eq!(outline[0], Line::Title("QMS Evidence Pack".to_string()));
        assert!(outline.contains(&Line::Heading("Audits (0)".to_string())));
        assert!(outline.contains(&Line::Heading("Non-Conformance Reports (0)".to_string())));
        assert!(!outline.iter().any(|l| matches!(l, Line::Heading(h) if h.starts_with("Audit Trail"))));
        assert!(outline.contains(&Line::Text("Period: All records".to_string())));
    }
}
