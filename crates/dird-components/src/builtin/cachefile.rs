//! CACHEFILE: load a client-local YAML file into the args cache

use async_trait::async_trait;
use serde_json::Value;

use dird_core::cache::CacheTag;
use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs};
use crate::error::ComponentError;

/// Process cachefile commands
pub struct CacheFile;

#[async_trait]
impl Component for CacheFile {
    fn name(&self) -> &'static str {
        "CACHEFILE"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common().positional("cachefile")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let path = bound.get_str("cachefile").ok_or_else(|| {
            ComponentError::InvalidArguments("CACHEFILE requires a file path".to_string())
        })?;
        definition.set("cachefile", Value::String(path.to_string()));
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let path = ctx
            .job
            .definition
            .get_str("cachefile")
            .ok_or_else(|| ComponentError::InvalidArguments("missing cachefile".to_string()))?;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(TaskOutcome::failure(format!(
                    "failed to read {}: {}",
                    path, e
                )))
            }
        };

        let entries: serde_json::Map<String, Value> = match serde_yaml::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                return Ok(TaskOutcome::failure(format!(
                    "{} is not a YAML mapping: {}",
                    path, e
                )))
            }
        };

        for (key, value) in &entries {
            ctx.cache.put(CacheTag::Args, key, value.clone()).await?;
        }
        Ok(TaskOutcome::success(format!(
            "{} arguments cached from {}",
            entries.len(),
            path
        )))
    }
}
