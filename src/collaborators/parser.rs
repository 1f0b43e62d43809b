//! Document parser boundary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::ParserConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::ParsedDocument;

/// Extracts slides, texts and rendered slide images from a source file
#[async_trait]
pub trait DocumentParser: Send + Sync + std::fmt::Debug {
    /// Parse `source`, writing rendered images under `output_dir`.
    ///
    /// Any failure is a file-level `PipelineError::Parse`.
    async fn parse(&self, source: &Path, output_dir: &Path) -> PipelineResult<ParsedDocument>;
}

/// Runs an external parser program: `<command> <args...> <source> <output_dir>`.
///
/// The program prints the parsed document as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandDocumentParser {
    command: String,
    args: Vec<String>,
}

impl CommandDocumentParser {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

fn file_name(source: &Path) -> String {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}

#[async_trait]
impl DocumentParser for CommandDocumentParser {
    #[instrument(skip(self), fields(command = %self.command))]
    async fn parse(&self, source: &Path, output_dir: &Path) -> PipelineResult<ParsedDocument> {
        let name = file_name(source);

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(source)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::parse(&name, format!("failed to start parser: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(file = %name, status = %output.status, "Parser exited unsuccessfully");
            return Err(PipelineError::parse(
                &name,
                format!("parser exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let document: ParsedDocument = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::parse(&name, format!("invalid parser output: {e}")))?;

        debug!(file = %name, slides = document.slides.len(), "Document parsed");
        Ok(document)
    }
}
