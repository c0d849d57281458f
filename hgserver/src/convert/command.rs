//! Converter that shells out to external tools.
//!
//! Each file kind maps to a command template. Templates are split on
//! whitespace and the placeholders `{input}`, `{output}` and `{kind}` are
//! substituted per argument, so paths containing spaces stay intact. No shell
//! is involved.
//!
//! ```text
//! [converter]
//! matrix = hictools-tiles cool {input} {output}
//! ```

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::{manifest, BoxFuture, ConversionError, ConversionOutput, ConversionRequest, Converter};
use crate::catalog::FileKind;

/// Bytes of stderr kept in tool error messages.
const STDERR_TAIL_BYTES: usize = 2048;

/// Runs a configured external command per file kind.
#[derive(Debug, Clone, Default)]
pub struct CommandConverter {
    templates: HashMap<FileKind, String>,
}

impl CommandConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command template for a kind. Blank templates are ignored.
    pub fn with_template(mut self, kind: FileKind, template: impl Into<String>) -> Self {
        let template = template.into();
        if !template.trim().is_empty() {
            self.templates.insert(kind, template);
        }
        self
    }

    /// Kinds that have a command configured.
    pub fn configured_kinds(&self) -> Vec<FileKind> {
        let mut kinds: Vec<FileKind> = self.templates.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Expand the template for `request` into program and arguments.
    pub fn command_line(
        &self,
        request: &ConversionRequest,
    ) -> Result<(String, Vec<String>), ConversionError> {
        let template = self
            .templates
            .get(&request.kind)
            .ok_or(ConversionError::UnsupportedKind(request.kind))?;

        let input = request.source_path.to_string_lossy();
        let output = request.output_dir.to_string_lossy();
        let mut parts = template.split_whitespace().map(|token| {
            token
                .replace("{input}", &input)
                .replace("{output}", &output)
                .replace("{kind}", request.kind.as_str())
        });

        let program = parts
            .next()
            .ok_or(ConversionError::UnsupportedKind(request.kind))?;
        Ok((program, parts.collect()))
    }

    async fn run(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConversionError> {
        let (program, args) = self.command_line(request)?;
        tokio::fs::create_dir_all(&request.output_dir).await?;

        debug!(program = %program, args = ?args, "Running converter");
        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConversionError::Tool(format!("failed to start {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(ConversionError::Tool(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let result = manifest::read_manifest(&request.output_dir).await?;
        info!(
            source = %request.source_path.display(),
            kind = %request.kind,
            zoom_levels = result.resolutions.len(),
            "Converter finished"
        );
        Ok(result)
    }
}

impl Converter for CommandConverter {
    fn convert<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<ConversionOutput, ConversionError>> {
        Box::pin(self.run(request))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
