//! Prompt construction and plan parsing for the model-backed stages.

use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::model::extract_json_object;
use crate::prompts::{PromptRole, frame, system_prompt};
use crate::types::{Alert, ContextItem, Provenance};

pub const DEFAULT_PLAN_TITLE: &str = "Remediation Plan";
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Retrieval query for an alert.
pub fn retrieval_query(alert: &Alert) -> String {
    format!("{} {} {}", alert.source, alert.severity, alert.summary)
}

pub fn analyst_prompt(alert: &Alert, context: &[ContextItem]) -> String {
    let alert_json = serde_json::to_string(alert).unwrap_or_else(|_| alert.summary.clone());
    let context_lines = context
        .iter()
        .map(|c| format!("- {}", c.content))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!(
        "Alert: {alert_json}\n\n\
         Context:\n{context_lines}\n\n\
         Task: Perform a deep-dive analysis. Is this a false positive? Map to MITRE ATT&CK."
    );
    frame(system_prompt(PromptRole::Analyst), &user)
}

pub fn planner_prompt(alert: &Alert, analysis: &str, context: &[ContextItem]) -> String {
    let context_json = serde_json::to_string(context).unwrap_or_else(|_| "[]".to_string());
    let user = format!(
        "Analyst Findings: {analysis}\n\
         Original Alert: {}\n\
         Severity: {}\n\n\
         Context:\n{context_json}\n\n\
         Generate a strict JSON remediation plan based on the findings and context.",
        alert.summary, alert.severity
    );
    frame(system_prompt(PromptRole::Planner), &user)
}

/// The parsed shape of a planner reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub title: String,
    pub steps: Vec<String>,
    pub confidence: f64,
}

/// Parse a planner reply into a draft plan.
///
/// Missing keys take defaults; present keys of the wrong type, or a
/// confidence outside [0, 1], are errors.
pub fn parse_plan(reply: &str) -> Result<PlanDraft, ValidationError> {
    let object = extract_json_object(reply)?;

    let title = match object.get("title") {
        None | Some(Value::Null) => DEFAULT_PLAN_TITLE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(malformed("title must be a string")),
    };

    let steps = parse_steps(&object)?;

    let confidence = match object.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| malformed("confidence must be a number"))?,
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(malformed(&format!("confidence {confidence} outside [0, 1]")));
    }

    Ok(PlanDraft {
        title,
        steps,
        confidence,
    })
}

fn parse_steps(object: &Map<String, Value>) -> Result<Vec<String>, ValidationError> {
    match object.get("steps") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(&format!("step {i} is not a string")))
            })
            .collect(),
        Some(_) => Err(malformed("steps must be an array")),
    }
}

fn malformed(message: &str) -> ValidationError {
    ValidationError::MalformedJson {
        message: message.to_string(),
    }
}

/// Provenance for a plan, derived from the top context item.
pub fn provenance_for(context: &[ContextItem]) -> Vec<Provenance> {
    context
        .first()
        .map(|top| Provenance {
            doc_id: top.doc_id.clone(),
            chunk_id: format!("{}#0", top.doc_id),
            score: top.fusion_score,
        })
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, compute_payload_hash};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn alert() -> Alert {
        Alert::new(
            "a-1",
            "auth-log",
            Severity::High,
            "brute force",
            compute_payload_hash("raw"),
        )
        .unwrap()
    }

    fn item(id: &str, content: &str) -> ContextItem {
        ContextItem {
            doc_id: id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
            fusion_score: 0.032,
        }
    }

    #[test]
    fn test_retrieval_query() {
        assert_eq!(retrieval_query(&alert()), "auth-log HIGH brute force");
    }

    #[test]
    fn test_analyst_prompt_lists_context() {
        let prompt = analyst_prompt(&alert(), &[item("ssh", "Block the IP")]);
        assert!(prompt.starts_with("System: "));
        assert!(prompt.contains("- Block the IP"));
        assert!(prompt.contains("\"summary\":\"brute force\""));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn test_planner_prompt_fields() {
        let prompt = planner_prompt(&alert(), "credential stuffing", &[]);
        assert!(prompt.contains("Analyst Findings: credential stuffing"));
        assert!(prompt.contains("Original Alert: brute force"));
        assert!(prompt.contains("Severity: HIGH"));
    }

    #[test]
    fn test_parse_plan_full() {
        let plan = parse_plan(
            "```json\n{\"title\": \"Block IP\", \"steps\": [\"Block 1.2.3.4\", \"Reset password\"], \"confidence\": 0.9}\n```",
        )
        .unwrap();
        assert_eq!(
            plan,
            PlanDraft {
                title: "Block IP".into(),
                steps: vec!["Block 1.2.3.4".into(), "Reset password".into()],
                confidence: 0.9,
            }
        );
    }

    #[test]
    fn test_parse_plan_defaults() {
        let plan = parse_plan("Here is the plan: {} done").unwrap();
        assert_eq!(plan.title, DEFAULT_PLAN_TITLE);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_parse_plan_after_command_fence() {
        let plan = parse_plan(
            "First check:\n```bash\nlast -n 20\n```\n{\"title\": \"Contain\", \"steps\": [\"Block IP\"], \"confidence\": 0.7}",
        )
        .unwrap();
        assert_eq!(plan.title, "Contain");
        assert_eq!(plan.steps, vec!["Block IP".to_string()]);
    }

    #[test]
    fn test_parse_plan_rejects_bad_shapes() {
        for reply in [
            "I'm not sure what to do here.",
            r#"{"steps": [1, 2]}"#,
            r#"{"steps": "block it"}"#,
            r#"{"confidence": 1.5}"#,
            r#"{"confidence": "high"}"#,
            r#"{"title": 7}"#,
        ] {
            assert!(
                matches!(parse_plan(reply), Err(ValidationError::MalformedJson { .. })),
                "{reply:?} should fail"
            );
        }
    }

    #[test]
    fn test_provenance_from_top_item() {
        let p = provenance_for(&[item("ssh", "a"), item("phish", "b")]);
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].doc_id, "ssh");
        assert_eq!(p[0].chunk_id, "ssh#0");
        assert_eq!(p[0].score, 0.032);
        assert!(provenance_for(&[]).is_empty());
    }
}
