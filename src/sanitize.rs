// src/sanitize.rs
//! Prompt-injection defense for request parameters and incoming topics.
//!
//! Every free-text field (submolt names, persona tags, persona constraints) is
//! run through the same pipeline:
//! 1) drop invisible / control characters (soft)
//! 2) detect and strip LLM control tokens and instruction overrides (hard)
//! 3) detect base64 blobs, shell sequences, SQL injection (hard)
//! 4) enforce the per-field length ceiling (soft, see `OVERSIZE_POLICY`)
//!
//! Any hard finding makes the verdict `REJECT`; soft findings alone make it
//! `SUSPECT`. The functions here are pure: no logging, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{FetchRequest, SanitizationVerdict, MAX_TOPIC_CHARS};

/// Hard per-field ceiling, in characters.
pub const MAX_FIELD_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversizePolicy {
    Truncate,
    Reject,
}

/// Oversized fields are cut at `MAX_FIELD_CHARS` and the request is flagged
/// `SUSPECT`.
pub const OVERSIZE_POLICY: OversizePolicy = OversizePolicy::Truncate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    ControlToken,
    InstructionOverride,
    Base64Blob,
    ShellCommand,
    SqlInjection,
    Oversize,
    InvisibleChars,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::ControlToken => "control_token",
            Rule::InstructionOverride => "instruction_override",
            Rule::Base64Blob => "base64_blob",
            Rule::ShellCommand => "shell_command",
            Rule::SqlInjection => "sql_injection",
            Rule::Oversize => "oversize",
            Rule::InvisibleChars => "invisible_chars",
        }
    }

    pub fn is_hard(&self) -> bool {
        match self {
            Rule::Oversize => OVERSIZE_POLICY == OversizePolicy::Reject,
            Rule::InvisibleChars => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Field path, e.g. `persona_tags[1]`.
    pub field: String,
    pub rule: Rule,
}

impl Finding {
    pub fn label(&self) -> String {
        format!("{}:{}", self.field, self.rule.as_str())
    }
}

/// Result of sanitizing one request.
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub request: FetchRequest,
    pub verdict: SanitizationVerdict,
    pub findings: Vec<Finding>,
}

/* ----------------------------
Patterns
---------------------------- */

static RE_CONTROL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)<\|[a-z0-9_]{1,32}\|>|\[/?INST\]|<</?SYS>>|</?\s*(system|assistant|user)\s*>|^\s*(system|assistant|human|user)\s*:|###\s*(system|instruction|response)\b",
    )
    .expect("control token regex")
});

static RE_OVERRIDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(ignore|disregard|forget|override)\s+(all\s+|any\s+)?(the\s+|your\s+)?(previous|prior|above|earlier|preceding|system)\s+(instructions?|prompts?|rules?|context)\b|\byou\s+are\s+now\b|\bnew\s+instructions?\s*:|\b(reveal|print|show|repeat)\s+(your\s+|the\s+)?system\s+prompt\b|\bdeveloper\s+mode\b|\bjailbreak\b",
    )
    .expect("override regex")
});

static RE_SHELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\$\(|`[^`]*`|(;|&&|\|\|)\s*(rm|curl|wget|bash|sh|zsh|nc|ncat|chmod|chown|python3?|perl|cat|echo)\b|\|\s*(sh|bash|zsh)\b|\brm\s+-[a-z]*[rf]|/etc/(passwd|shadow)|\bsudo\s+\S|\bmkfifo\b|>\s*/dev/",
    )
    .expect("shell regex")
});

static RE_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bunion\s+(all\s+)?select\b|;\s*(drop|delete|insert|update|alter|truncate|create)\s|'\s*(or|and)\s+'?[\w]+'?\s*=\s*'?[\w]+|\bdrop\s+(table|database)\b|--\s*$|/\*.*?\*/|\bxp_cmdshell\b|\b(sleep|benchmark|pg_sleep)\s*\(\s*\d+|\binformation_schema\b",
    )
    .expect("sql regex")
});

static RE_B64_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/]{40,}={0,2}").expect("base64 regex"));

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Long runs of the base64 alphabet that mix cases and digits. Plain long
/// words or hex-free identifiers do not qualify.
fn contains_base64_blob(text: &str) -> bool {
    RE_B64_RUN.find_iter(text).any(|m| {
        let s = m.as_str();
        let upper = s.chars().any(|c| c.is_ascii_uppercase());
        let lower = s.chars().any(|c| c.is_ascii_lowercase());
        let digit_or_sym = s.chars().any(|c| c.is_ascii_digit() || c == '+' || c == '/');
        upper && lower && digit_or_sym
    })
}

fn is_invisible(c: char) -> bool {
    (c.is_control() && c != '\n' && c != '\t')
        || matches!(c,
            '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}')
}

/// Sanitize a single field. Returns the cleaned text and the rules it hit.
pub fn sanitize_field(text: &str) -> (String, Vec<Rule>) {
    let mut rules = Vec::new();

    // 1) invisible characters
    let mut out: String = text.chars().filter(|c| !is_invisible(*c)).collect();
    if out.chars().count() != text.chars().count() {
        rules.push(Rule::InvisibleChars);
    }

    // 2) control tokens and overrides are stripped, but still count as hard hits
    if RE_CONTROL_TOKEN.is_match(&out) {
        rules.push(Rule::ControlToken);
        out = RE_CONTROL_TOKEN.replace_all(&out, "").into_owned();
    }
    if RE_OVERRIDE.is_match(&out) {
        rules.push(Rule::InstructionOverride);
        out = RE_OVERRIDE.replace_all(&out, "").into_owned();
    }

    // 3) payload heuristics
    if contains_base64_blob(&out) {
        rules.push(Rule::Base64Blob);
    }
    if RE_SHELL.is_match(&out) {
        rules.push(Rule::ShellCommand);
    }
    if RE_SQL.is_match(&out) {
        rules.push(Rule::SqlInjection);
    }

    // 4) length ceiling
    if out.chars().count() > MAX_FIELD_CHARS {
        rules.push(Rule::Oversize);
        out = out.chars().take(MAX_FIELD_CHARS).collect();
    }

    (out.trim().to_string(), rules)
}

pub fn verdict_for(findings: &[Finding]) -> SanitizationVerdict {
    if findings.iter().any(|f| f.rule.is_hard()) {
        SanitizationVerdict::Reject
    } else if findings.is_empty() {
        SanitizationVerdict::Ok
    } else {
        SanitizationVerdict::Suspect
    }
}

fn sanitize_list(name: &str, items: &[String], findings: &mut Vec<Finding>) -> Vec<String> {
    items
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let (clean, rules) = sanitize_field(raw);
            findings.extend(rules.into_iter().map(|rule| Finding {
                field: format!("{name}[{i}]"),
                rule,
            }));
            clean
        })
        .collect()
}

/// Sanitize every free-text field of a request.
pub fn sanitize(request: &FetchRequest) -> Sanitized {
    let mut findings = Vec::new();
    let mut cleaned = request.clone();

    if let Some(subs) = &request.parameters.submolts {
        cleaned.parameters.submolts = Some(sanitize_list("submolts", subs, &mut findings));
    }
    cleaned.parameters.persona_tags =
        sanitize_list("persona_tags", &request.parameters.persona_tags, &mut findings);
    if let Some(pc) = &request.context.persona_constraints {
        cleaned.context.persona_constraints =
            Some(sanitize_list("persona_constraints", pc, &mut findings));
    }

    Sanitized {
        request: cleaned,
        verdict: verdict_for(&findings),
        findings,
    }
}

/// Clean a topic coming back from the trend source. Entities are decoded and
/// whitespace collapsed; topics with a hard finding are dropped (`None`).
/// The result is capped at `MAX_TOPIC_CHARS`.
pub fn clean_topic(topic: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(topic);
    let (clean, rules) = sanitize_field(&decoded);
    if rules.iter().any(|r| r.is_hard()) {
        return None;
    }
    let collapsed = RE_WS.replace_all(&clean, " ").trim().to_string();
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_TOPIC_CHARS).collect())
}
