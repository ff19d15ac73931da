// src/validate.rs
//! Boundary validation: raw JSON in, `FetchRequest` out.
//!
//! All problems are collected (not just the first) so the caller sees the
//! whole list in one response.

use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{ErrorCode, SkillError};
use crate::types::{
    FetchContext, FetchParameters, FetchRequest, TimeRange, DEFAULT_MAX_TOPICS,
    DEFAULT_MIN_ENGAGEMENT, MAX_SUBMOLTS, MAX_TOPICS, MIN_TOPICS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub problem: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Echoed back; nil when the input carried no usable task id.
    pub task_id: Uuid,
    pub issues: Vec<FieldIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.problem))
            .collect();
        write!(f, "invalid input: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn to_skill_error(&self) -> SkillError {
        SkillError::new(ErrorCode::InvalidInput, self.to_string())
    }

    pub fn has_issue(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, field: &'static str, problem: impl Into<String>) {
        self.0.push(FieldIssue {
            field,
            problem: problem.into(),
        });
    }
}

fn uuid_field(obj: &Map<String, Value>, field: &'static str, issues: &mut Issues) -> Option<Uuid> {
    match obj.get(field) {
        Some(Value::String(s)) => match Uuid::parse_str(s.trim()) {
            Ok(u) => Some(u),
            Err(_) => {
                issues.push(field, "not a valid UUID");
                None
            }
        },
        Some(Value::Null) | None => {
            issues.push(field, "required");
            None
        }
        Some(_) => {
            issues.push(field, "must be a UUID string");
            None
        }
    }
}

fn optional_uuid(obj: &Map<String, Value>, field: &'static str, issues: &mut Issues) -> Option<Uuid> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(_) => uuid_field(obj, field, issues),
    }
}

fn string_list(v: &Value, field: &'static str, issues: &mut Issues) -> Option<Vec<String>> {
    let Value::Array(items) = v else {
        issues.push(field, "must be a list of strings");
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        match it {
            Value::String(s) => out.push(s.clone()),
            _ => {
                issues.push(field, "must contain only strings");
                return None;
            }
        }
    }
    Some(out)
}

/// Trim, drop blanks, dedup case-insensitively keeping first spelling.
fn dedup_names(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

fn int_field(
    obj: &Map<String, Value>,
    field: &'static str,
    default: u64,
    issues: &mut Issues,
) -> Option<u64> {
    match obj.get(field) {
        None | Some(Value::Null) => Some(default),
        Some(v) => match v.as_u64() {
            Some(n) => Some(n),
            None => {
                issues.push(field, "must be a non-negative integer");
                None
            }
        },
    }
}

fn parse_parameters(obj: &Map<String, Value>, issues: &mut Issues) -> FetchParameters {
    let mut p = FetchParameters::default();

    match obj.get("submolts") {
        None | Some(Value::Null) => {}
        Some(v) => {
            if let Some(list) = string_list(v, "submolts", issues) {
                if list.len() > MAX_SUBMOLTS {
                    issues.push("submolts", format!("at most {MAX_SUBMOLTS} allowed, got {}", list.len()));
                } else {
                    let list = dedup_names(list);
                    p.submolts = if list.is_empty() { None } else { Some(list) };
                }
            }
        }
    }

    match obj.get("time_range") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => match TimeRange::parse(s) {
            Some(tr) => p.time_range = tr,
            None => issues.push("time_range", format!("unsupported value {s:?}")),
        },
        Some(_) => issues.push("time_range", "must be one of 1h, 4h, 24h, 7d"),
    }

    if let Some(n) = int_field(obj, "min_engagement", DEFAULT_MIN_ENGAGEMENT as u64, issues) {
        match u32::try_from(n) {
            Ok(n) if n >= 1 => p.min_engagement = n,
            _ => issues.push("min_engagement", "must be between 1 and 4294967295"),
        }
    }

    match obj.get("persona_tags") {
        None | Some(Value::Null) => {}
        Some(v) => {
            if let Some(list) = string_list(v, "persona_tags", issues) {
                p.persona_tags = list;
            }
        }
    }

    if let Some(n) = int_field(obj, "max_topics", DEFAULT_MAX_TOPICS as u64, issues) {
        if (MIN_TOPICS as u64..=MAX_TOPICS as u64).contains(&n) {
            p.max_topics = n as usize;
        } else {
            issues.push("max_topics", format!("must be between {MIN_TOPICS} and {MAX_TOPICS}"));
        }
    }

    p
}

fn parse_context(obj: &Map<String, Value>, issues: &mut Issues) -> Option<FetchContext> {
    let agent_id = uuid_field(obj, "agent_id", issues);
    let campaign_id = optional_uuid(obj, "campaign_id", issues);

    let budget = match obj.get("budget_remaining") {
        None | Some(Value::Null) => {
            issues.push("budget_remaining", "required");
            None
        }
        Some(v) => match v.as_f64() {
            Some(b) if b.is_finite() && b >= 0.0 => Some(b),
            Some(_) => {
                issues.push("budget_remaining", "must be >= 0");
                None
            }
            None => {
                issues.push("budget_remaining", "must be a number");
                None
            }
        },
    };

    let persona_constraints = match obj.get("persona_constraints") {
        None | Some(Value::Null) => None,
        Some(v) => string_list(v, "persona_constraints", issues),
    };

    Some(FetchContext {
        agent_id: agent_id?,
        campaign_id,
        budget_remaining: budget?,
        persona_constraints,
    })
}

/// Best-effort task id, used to echo it even on invalid input.
pub fn peek_task_id(raw: &Value) -> Uuid {
    raw.get("task_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::nil)
}

pub fn parse_request(raw: &Value) -> Result<FetchRequest, ValidationError> {
    let task_id = peek_task_id(raw);
    let mut issues = Issues::default();

    let Some(root) = raw.as_object() else {
        issues.push("request", "must be a JSON object");
        return Err(ValidationError {
            task_id,
            issues: issues.0,
        });
    };

    let parsed_task = uuid_field(root, "task_id", &mut issues);

    let parameters = match root.get("parameters") {
        None | Some(Value::Null) => FetchParameters::default(),
        Some(Value::Object(p)) => parse_parameters(p, &mut issues),
        Some(_) => {
            issues.push("parameters", "must be an object");
            FetchParameters::default()
        }
    };

    let context = match root.get("context") {
        Some(Value::Object(c)) => parse_context(c, &mut issues),
        None | Some(Value::Null) => {
            issues.push("context", "required");
            None
        }
        Some(_) => {
            issues.push("context", "must be an object");
            None
        }
    };

    match (parsed_task, context) {
        (Some(task_id), Some(context)) if issues.0.is_empty() => Ok(FetchRequest {
            task_id,
            parameters,
            context,
        }),
        _ => Err(ValidationError {
            task_id,
            issues: issues.0,
        }),
    }
}

/// Re-check the invariants `parse_request` guarantees, for requests built
/// in code rather than parsed from JSON.
pub fn check_request(req: &FetchRequest) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    let p = &req.parameters;

    if let Some(list) = &p.submolts {
        if list.len() > MAX_SUBMOLTS {
            issues.push("submolts", format!("at most {MAX_SUBMOLTS} allowed, got {}", list.len()));
        } else if list.is_empty() || list.iter().any(|s| s.trim().is_empty()) {
            issues.push("submolts", "names must not be blank");
        }
    }
    if p.min_engagement < 1 {
        issues.push("min_engagement", "must be between 1 and 4294967295");
    }
    if !(MIN_TOPICS..=MAX_TOPICS).contains(&p.max_topics) {
        issues.push("max_topics", format!("must be between {MIN_TOPICS} and {MAX_TOPICS}"));
    }
    let budget = req.context.budget_remaining;
    if !budget.is_finite() || budget < 0.0 {
        issues.push("budget_remaining", "must be >= 0");
    }

    if issues.0.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            task_id: req.task_id,
            issues: issues.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "task_id": "550e8400-e29b-41d4-a716-446655440000",
            "parameters": {
                "submolts": ["r/AgentTech", "r/AICollaboration"],
                "time_range": "4h",
                "min_engagement": 50,
                "persona_tags": ["tech", "genz"],
                "max_topics": 10
            },
            "context": {
                "agent_id": "660e8400-e29b-41d4-a716-446655440001",
                "campaign_id": "770e8400-e29b-41d4-a716-446655440002",
                "budget_remaining": 45.25
            }
        })
    }

    #[test]
    fn accepts_contract_example() {
        let req = parse_request(&valid()).unwrap();
        assert_eq!(req.parameters.submolts.as_ref().unwrap().len(), 2);
        assert_eq!(req.parameters.time_range, TimeRange::FourHours);
        assert_eq!(req.context.budget_remaining, 45.25);
        assert!(req.context.campaign_id.is_some());
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let mut v = valid();
        v["parameters"] = json!({});
        let req = parse_request(&v).unwrap();
        assert_eq!(req.parameters, FetchParameters::default());
    }

    #[test]
    fn eleven_submolts_are_rejected() {
        let mut v = valid();
        v["parameters"]["submolts"] = json!((0..11).map(|i| format!("r/S{i}")).collect::<Vec<_>>());
        let err = parse_request(&v).unwrap_err();
        assert!(err.has_issue("submolts"));
        assert_eq!(err.task_id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn submolts_are_deduped_and_empty_means_auto() {
        let mut v = valid();
        v["parameters"]["submolts"] = json!(["r/AgentTech", " r/agenttech ", ""]);
        assert_eq!(parse_request(&v).unwrap().parameters.submolts, Some(vec!["r/AgentTech".to_string()]));

        v["parameters"]["submolts"] = json!([]);
        assert_eq!(parse_request(&v).unwrap().parameters.submolts, None);
    }

    #[test]
    fn collects_every_problem() {
        let mut v = valid();
        v["parameters"]["time_range"] = json!("2h");
        v["parameters"]["max_topics"] = json!(51);
        v["parameters"]["min_engagement"] = json!(0);
        v["context"]["budget_remaining"] = json!(-1);
        v["context"]["agent_id"] = json!("not-a-uuid");
        let err = parse_request(&v).unwrap_err();
        for f in ["time_range", "max_topics", "min_engagement", "budget_remaining", "agent_id"] {
            assert!(err.has_issue(f), "missing issue for {f}: {err}");
        }
        assert_eq!(err.to_skill_error().code, ErrorCode::InvalidInput);
    }

    #[test]
    fn parsed_requests_pass_the_typed_recheck() {
        let req = parse_request(&valid()).unwrap();
        assert!(check_request(&req).is_ok());
    }

    #[test]
    fn typed_recheck_catches_what_parsing_would_reject() {
        let mut req = parse_request(&valid()).unwrap();
        req.parameters.submolts = Some((0..11).map(|i| format!("r/S{i}")).collect());
        req.parameters.max_topics = 0;
        req.parameters.min_engagement = 0;
        req.context.budget_remaining = f64::NAN;

        let err = check_request(&req).unwrap_err();
        assert_eq!(err.task_id, req.task_id);
        for f in ["submolts", "max_topics", "min_engagement", "budget_remaining"] {
            assert!(err.has_issue(f), "missing issue for {f}: {err}");
        }

        req = parse_request(&valid()).unwrap();
        req.parameters.submolts = Some(vec![]);
        assert!(check_request(&req).unwrap_err().has_issue("submolts"));
    }

    #[test]
    fn missing_context_and_bad_task_id() {
        let err = parse_request(&json!({"task_id": 7})).unwrap_err();
        assert!(err.has_issue("task_id"));
        assert!(err.has_issue("context"));
        assert!(err.task_id.is_nil());
        assert!(parse_request(&json!("nope")).is_err());
    }
}
