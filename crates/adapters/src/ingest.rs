// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook ingestor (C4): tails the `pre.jsonl`/`post.jsonl` side-channel logs
//! the agent subprocess's hook scripts append to, parses each line, and
//! extracts the `filePaths` set per spec §4.4.
//!
//! Mirrors the teacher's incremental JSONL watcher in `agent/watcher.rs`
//! (same offset-tracking, same `notify`-with-polling-fallback shape) but
//! generalized to two append-only files per session instead of one, and to
//! structured hook records instead of Claude's own transcript format.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use serde::Deserialize;
use tf_core::TokenUsage;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fallback poll interval when the `notify` file watcher cannot be set up
/// (default 1s; override with `HOOK_POLL_MS`).
pub fn hook_poll_interval() -> Duration {
    std::env::var("HOOK_POLL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
}

/// A hook record as written by the pre/post hook scripts (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RawHookRecord {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    #[serde(rename = "sessionUuid")]
    pub session_uuid: Uuid,
    /// Present on `pre` records.
    pub parameters: Option<serde_json::Value>,
    /// Present on `post` records.
    pub output: Option<String>,
    #[serde(rename = "outputLength")]
    pub output_length: Option<u64>,
    #[serde(rename = "hasError")]
    pub has_error: Option<bool>,
    #[serde(rename = "durationMillis")]
    pub duration_millis: Option<f64>,
    #[serde(rename = "tokenUsage")]
    pub token_usage: Option<TokenUsage>,
}

/// A parsed hook record, one file's worth of ambiguity resolved: pre
/// records carry `parameters`, post records carry the rest.
#[derive(Debug, Clone)]
pub enum IngestedEvent {
    Pre {
        session_uuid: Uuid,
        tool: String,
        timestamp: DateTime<Utc>,
        parameters: serde_json::Value,
        file_paths: BTreeSet<String>,
    },
    Post {
        session_uuid: Uuid,
        tool: String,
        timestamp: DateTime<Utc>,
        output: String,
        output_length: u64,
        has_error: bool,
        duration_millis: f64,
        usage: Option<TokenUsage>,
        file_paths: BTreeSet<String>,
    },
}

/// Bash verbs whose trailing whitespace-separated token is treated as a
/// file path candidate (spec §4.4).
const BASH_PATH_VERBS: &[&str] = &[
    "cat", "head", "tail", "less", "more", "vim", "nano", "cp", "mv", "rm", "chmod", "chown",
    "mkdir", "rmdir", "touch", "open", "code",
];

fn bash_verb_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let verbs = BASH_PATH_VERBS.join("|");
        Regex::new(&format!(r"(?:^|[;&|]\s*)(?:{verbs})\s+(\S+)")).expect("static regex")
    })
}

fn redirection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">{1,2}\s*(\S+)").expect("static regex"))
}

fn path_like_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:/[\w.\-]+){2,}").expect("static regex"))
}

/// Drop noise paths and dedup, preserving the order-insensitive contract
/// of spec testable property 13.
fn finalize_paths(paths: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    paths
        .into_iter()
        .filter(|p| !p.starts_with("/tmp/") && !p.starts_with("/dev/") && !p.starts_with("/proc/"))
        .collect()
}

fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Extract the `filePaths` set for a `pre` record's parameters (spec §4.4).
pub fn extract_pre_file_paths(tool: &str, parameters: &serde_json::Value) -> BTreeSet<String> {
    let mut paths = Vec::new();
    match tool {
        "Read" | "Write" | "Edit" => {
            if let Some(p) = str_field(parameters, "file_path") {
                paths.push(p.to_string());
            }
        }
        "NotebookEdit" => {
            if let Some(p) = str_field(parameters, "notebook_path") {
                paths.push(p.to_string());
            }
        }
        "Glob" | "Grep" => {
            if let Some(p) = str_field(parameters, "pattern") {
                paths.push(format!("glob:{p}"));
            }
            if let Some(p) = str_field(parameters, "path") {
                paths.push(p.to_string());
            }
        }
        "Bash" => {
            if let Some(command) = str_field(parameters, "command") {
                for cap in bash_verb_regex().captures_iter(command) {
                    paths.push(cap[1].to_string());
                }
                for cap in redirection_regex().captures_iter(command) {
                    paths.push(cap[1].to_string());
                }
            }
        }
        _ => {}
    }
    finalize_paths(paths)
}

/// Extract the `filePaths` set for a `post` record's output (spec §4.4).
pub fn extract_post_file_paths(output: &str) -> BTreeSet<String> {
    let mut paths = Vec::new();
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(output) {
        for key in ["files", "paths", "matches", "results"] {
            if let Some(arr) = json.get(key).and_then(|v| v.as_array()) {
                for item in arr {
                    if let Some(s) = item.as_str() {
                        paths.push(s.to_string());
                    }
                }
            }
        }
        if !paths.is_empty() {
            return finalize_paths(paths);
        }
    }
    for cap in path_like_regex().find_iter(output) {
        paths.push(cap.as_str().to_string());
    }
    finalize_paths(paths)
}

/// Parse one JSON line from a hook log into an [`IngestedEvent`].
fn parse_line(line: &str) -> Option<IngestedEvent> {
    let raw: RawHookRecord = serde_json::from_str(line).ok()?;
    if let Some(parameters) = raw.parameters {
        let file_paths = extract_pre_file_paths(&raw.tool, &parameters);
        return Some(IngestedEvent::Pre {
            session_uuid: raw.session_uuid,
            tool: raw.tool,
            timestamp: raw.timestamp,
            parameters,
            file_paths,
        });
    }
    let output = raw.output.unwrap_or_default();
    let file_paths = extract_post_file_paths(&output);
    Some(IngestedEvent::Post {
        session_uuid: raw.session_uuid,
        tool: raw.tool,
        timestamp: raw.timestamp,
        output,
        output_length: raw.output_length.unwrap_or_default(),
        has_error: raw.has_error.unwrap_or_default(),
        duration_millis: raw.duration_millis.unwrap_or_default(),
        usage: raw.token_usage,
        file_paths,
    })
}

/// Tracks a single append-only hook log file, reading only the bytes
/// appended since the previous call (the same offset-tracking shape as
/// the teacher's `SessionLogParser`).
struct TailState {
    offset: u64,
}

impl TailState {
    fn new() -> Self {
        Self { offset: 0 }
    }

    fn read_new_lines(&mut self, path: &Path) -> Vec<String> {
        let Ok(file) = File::open(path) else {
            return Vec::new();
        };
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if file_len < self.offset {
            self.offset = 0;
        }
        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }
        let mut lines = Vec::new();
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if !buf.ends_with('\n') {
                        break;
                    }
                    self.offset += n as u64;
                    let trimmed = buf.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                Err(_) => break,
            }
        }
        lines
    }
}

/// Watches `sessions/{sessionUuid}/pre.jsonl` and `/post.jsonl` under
/// `sessions_root`, emitting a parsed [`IngestedEvent`] per new line.
pub struct HookTailer {
    sessions_root: PathBuf,
}

impl HookTailer {
    pub fn new(sessions_root: PathBuf) -> Self {
        Self { sessions_root }
    }

    /// Starts a background task tailing both hook logs for `session_uuid`.
    /// Returns a channel of parsed events; dropping the receiver stops the
    /// tailer on its next poll tick.
    pub fn watch_session(&self, session_uuid: Uuid) -> mpsc::Receiver<IngestedEvent> {
        let (tx, rx) = mpsc::channel(256);
        let dir = self.sessions_root.join(session_uuid.to_string());
        tokio::spawn(tail_session_dir(dir, tx));
        rx
    }
}

async fn tail_session_dir(dir: PathBuf, tx: mpsc::Sender<IngestedEvent>) {
    let pre_path = dir.join("pre.jsonl");
    let post_path = dir.join("post.jsonl");
    let mut pre_state = TailState::new();
    let mut post_state = TailState::new();

    let (notify_tx, mut notify_rx) = mpsc::channel(32);
    let _watcher = create_dir_watcher(&dir, notify_tx);

    loop {
        for line in pre_state.read_new_lines(&pre_path) {
            if let Some(event) = parse_line(&line) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        for line in post_state.read_new_lines(&post_path) {
            if let Some(event) = parse_line(&line) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }

        tokio::select! {
            recv = notify_rx.recv() => {
                if recv.is_none() {
                    tokio::time::sleep(hook_poll_interval()).await;
                }
            }
            _ = tokio::time::sleep(hook_poll_interval()) => {}
        }
    }
}

fn create_dir_watcher(
    dir: &Path,
    tx: mpsc::Sender<()>,
) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
        if res.is_ok() {
            let _ = tx.blocking_send(());
        }
    })
    .ok()?;
    watcher.watch(dir, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

/// Collapses consecutive identical `(tool, parameters)` events within a
/// window for the live dashboard stream only (spec §4.4); storage always
/// keeps every event.
pub struct DisplayDedup {
    window: Duration,
    last: Option<(String, String, Instant)>,
}

impl DisplayDedup {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns `true` if this `(tool, parameters)` pair should be forwarded
    /// to dashboard subscribers, `false` if it's a duplicate of the
    /// immediately preceding event within the dedup window.
    pub fn should_display(&mut self, tool: &str, parameters_json: &str, now: Instant) -> bool {
        let is_dup = match &self.last {
            Some((last_tool, last_params, last_seen)) => {
                last_tool == tool
                    && last_params == parameters_json
                    && now.duration_since(*last_seen) < self.window
            }
            None => false,
        };
        self.last = Some((tool.to_string(), parameters_json.to_string(), now));
        !is_dup
    }
}

impl Default for DisplayDedup {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
