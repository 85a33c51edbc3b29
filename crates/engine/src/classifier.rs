// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classifier / Dispatcher (C10): sanitizes inbound content, builds a
//! bounded-context prompt for the small-LM, and parses its sentinel-string
//! response into a [`ClassifierOutcome`] (spec §4.10).

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tf_core::{BackgroundTaskSpec, ClassifierOutcome};
use thiserror::Error;

// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static ROLE_OVERRIDE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ignore (all |the )?(previous|prior|above) instructions|you are now|disregard (your|the) (system|instructions)|new system prompt")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static CONTROL_SEQUENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?(system|role|assistant|user)>|\[/?INST]|<\|[a-z_]+\|>")
        .expect("constant regex pattern is valid")
});

/// Number of recent chat messages admitted to the prompt (spec §4.10).
pub const CONTEXT_RECENT_MESSAGES: usize = 2;
/// Maximum active-task descriptions admitted to the prompt.
pub const CONTEXT_MAX_ACTIVE_TASKS: usize = 3;
/// Maximum log lines admitted to the prompt.
pub const CONTEXT_MAX_LOG_LINES: usize = 50;
/// Content longer than this is rejected outright as likely injection.
const MAX_CONTENT_LEN: usize = 4_000;

const SENTINEL_PREFIX: &str = "BACKGROUND_TASK|";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("malicious input: {0}")]
    MaliciousInput(String),
    #[error("small-LM call failed: {0}")]
    LmFailure(String),
}

/// The small-LM call, abstracted so the crate doesn't hardcode a model
/// provider (mirrors [`crate::runner`]'s pruned-env abstraction for the
/// coding-agent subprocess, one level up).
#[async_trait]
pub trait SmallLmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;
}

/// Everything the classifier is allowed to see about the requester's state
/// (spec §4.10 "Given `{userId, content, history, currentWorkspace,
/// activeTasks}`"), pre-trimmed to the context budget by the caller's
/// choice of inputs but re-truncated here defensively.
pub struct ClassifierRequest {
    pub content: String,
    pub recent_messages: Vec<String>,
    pub active_task_descriptions: Vec<String>,
    pub recent_log_lines: Vec<String>,
}

/// Sanitizes `content`, rejecting it outright on injection heuristics.
/// HTML-escapes the remainder and strips control-channel lookalike tokens
/// (spec §4.10 "Input sanitization").
pub fn sanitize(content: &str) -> Result<String, ClassifierError> {
    if content.len() > MAX_CONTENT_LEN {
        return Err(ClassifierError::MaliciousInput(format!(
            "content length {} exceeds the {} character cap",
            content.len(),
            MAX_CONTENT_LEN
        )));
    }
    if ROLE_OVERRIDE_PATTERN.is_match(content) {
        return Err(ClassifierError::MaliciousInput(
            "role-override vocabulary detected".to_string(),
        ));
    }
    if CONTROL_SEQUENCE_PATTERN.is_match(content) {
        return Err(ClassifierError::MaliciousInput(
            "control sequence detected".to_string(),
        ));
    }
    let escaped = html_escape(content);
    Ok(CONTROL_SEQUENCE_PATTERN.replace_all(&escaped, "").into_owned())
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Builds the bounded-context prompt sent to the small-LM (spec §4.10).
fn build_prompt(sanitized_content: &str, request: &ClassifierRequest) -> String {
    let messages: Vec<String> = request
        .recent_messages
        .iter()
        .rev()
        .take(CONTEXT_RECENT_MESSAGES)
        .rev()
        .map(|m| truncate_chars(m, 500))
        .collect();
    let tasks: Vec<&String> = request
        .active_task_descriptions
        .iter()
        .take(CONTEXT_MAX_ACTIVE_TASKS)
        .collect();
    let log_lines: Vec<&String> = request
        .recent_log_lines
        .iter()
        .rev()
        .take(CONTEXT_MAX_LOG_LINES)
        .collect();

    let mut prompt = String::new();
    prompt.push_str("recent messages:\n");
    for m in &messages {
        prompt.push_str("- ");
        prompt.push_str(m);
        prompt.push('\n');
    }
    prompt.push_str("active tasks:\n");
    for t in &tasks {
        prompt.push_str("- ");
        prompt.push_str(t);
        prompt.push('\n');
    }
    prompt.push_str("recent log:\n");
    for line in log_lines.iter().rev() {
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("request:\n");
    prompt.push_str(sanitized_content);
    prompt
}

/// Strips decorative code fences and blank lines before sentinel parsing
/// (spec §4.10 "tolerating surrounding decorative noise").
fn strip_decoration(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .collect()
}

/// Parses the small-LM's response into a routing decision. Any output that
/// doesn't match the sentinel form exactly is treated as `DirectAnswer`
/// (spec §4.10 "Any other output is treated as DirectAnswer").
fn parse_response(raw: &str) -> ClassifierOutcome {
    for line in strip_decoration(raw) {
        if let Some(rest) = line.strip_prefix(SENTINEL_PREFIX) {
            let mut parts = rest.splitn(2, '|');
            if let (Some(description), Some(user_reply_text)) = (parts.next(), parts.next()) {
                if !description.trim().is_empty() {
                    return ClassifierOutcome::Background(BackgroundTaskSpec::new(
                        description.trim(),
                        user_reply_text.trim(),
                    ));
                }
            }
        }
    }
    ClassifierOutcome::DirectAnswer(raw.trim().to_string())
}

/// Sanitizes `request.content`, calls `client`, and parses the result.
pub async fn classify(
    client: &dyn SmallLmClient,
    request: ClassifierRequest,
) -> Result<ClassifierOutcome, ClassifierError> {
    let sanitized = sanitize(&request.content)?;
    let prompt = build_prompt(&sanitized, &request);
    let raw = client.complete(&prompt).await?;
    Ok(parse_response(&raw))
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
