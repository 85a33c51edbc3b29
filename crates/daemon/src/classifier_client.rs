// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A [`SmallLmClient`] implementation that shells out to a configured CLI,
//! writing the prompt to stdin and reading the completion from stdout.
//! Grounded on `tf_adapters::runner`'s pruned-env subprocess pattern, but
//! one-shot rather than supervised: there is no workspace, no pid to
//! track, and no timeout beyond [`CLASSIFY_TIMEOUT`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tf_engine::{ClassifierError, SmallLmClient};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(20);

pub struct CliSmallLmClient {
    command: String,
    args: Vec<String>,
}

impl CliSmallLmClient {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl SmallLmClient for CliSmallLmClient {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ClassifierError::LmFailure(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ClassifierError::LmFailure(e.to_string()))?;
        }

        let output = tokio::time::timeout(CLASSIFY_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::LmFailure("classifier call timed out".to_string()))?
            .map_err(|e| ClassifierError::LmFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(ClassifierError::LmFailure(format!(
                "classifier exited with {}",
                output.status
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| ClassifierError::LmFailure(e.to_string()))
    }
}
