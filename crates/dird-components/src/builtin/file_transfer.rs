//! ADD and COPY: pull a file from the server onto the client

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use dird_core::job::JobDefinition;
use dird_core::sha;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs, FlagKind};
use crate::blueprint;
use crate::builtin::apply_chown;
use crate::error::ComponentError;

/// One instance per verb; ADD and COPY share their semantics.
pub struct FileTransfer {
    verb: &'static str,
}

impl FileTransfer {
    /// The ADD component
    pub fn add() -> Self {
        Self { verb: "ADD" }
    }

    /// The COPY component
    pub fn copy() -> Self {
        Self { verb: "COPY" }
    }
}

#[async_trait]
impl Component for FileTransfer {
    fn name(&self) -> &'static str {
        self.verb
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common()
            .flag("chown", FlagKind::Str)
            .flag("blueprint", FlagKind::Bool)
            .greedy("files", true)
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);

        let files = bound
            .values
            .get("files")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if files.len() < 2 {
            return Err(ComponentError::InvalidArguments(format!(
                "{} requires FROM... TO",
                self.verb
            )));
        }

        let (to, from) = files.split_last().expect("length checked above");
        definition.set(
            "from",
            Value::Array(from.iter().cloned().map(Value::String).collect()),
        );
        definition.set("to", Value::String(to.clone()));
        if bound.get_flag("blueprint") {
            definition.set("blueprint", Value::Bool(true));
        }
        if let Some(chown) = bound.get_str("chown") {
            definition.set("chown", Value::String(chown.to_string()));
        }
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let sources = ctx.job.definition.get_list("from");
        let to = ctx
            .job
            .definition
            .get_str("to")
            .ok_or_else(|| ComponentError::InvalidArguments("missing destination".to_string()))?
            .to_string();
        if sources.is_empty() {
            return Ok(TaskOutcome::failure("no source files"));
        }
        // The dispatcher fingerprints every source before fan-out
        let shas = ctx
            .job
            .definition
            .get("file_sha")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let Some(transfer) = ctx.transfer else {
            return Ok(TaskOutcome::failure("no transfer channel available"));
        };

        let mut written = Vec::new();
        for file_from in &sources {
            let mut bytes = transfer.fetch(ctx.job.job_id, file_from).await?;

            if let Some(expected) = shas.get(file_from).and_then(|v| v.as_str()) {
                let actual = sha::bytes_sha(&bytes);
                if actual != expected {
                    return Ok(TaskOutcome::failure(format!(
                        "checksum mismatch for {}: expected {}, got {}",
                        file_from, expected, actual
                    )));
                }
            }

            if ctx.job.definition.get_flag("blueprint") {
                let content = String::from_utf8(bytes).map_err(|_| {
                    ComponentError::Blueprint(format!("{} is not valid UTF-8", file_from))
                })?;
                let args = ctx.args_map().await?;
                bytes = blueprint::render(&content, &args)?.into_bytes();
            }

            let destination = destination_for(&to, file_from);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&destination, &bytes).await?;

            if let Some(chown) = ctx.job.definition.get_str("chown") {
                apply_chown(&destination, chown)?;
            }
            written.push(format!("{} -> {}", file_from, destination.display()));
        }

        Ok(TaskOutcome::success(written.join(", ")))
    }
}

/// A trailing separator means "into this directory"; anything else is the
/// literal destination file.
fn destination_for(to: &str, file_from: &str) -> std::path::PathBuf {
    if to.ends_with('/') {
        let name = Path::new(file_from)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_from.to_string());
        Path::new(to).join(name)
    } else {
        std::path::PathBuf::from(to)
    }
}
