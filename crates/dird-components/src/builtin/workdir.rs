//! WORKDIR: create a directory on the client

use async_trait::async_trait;
use serde_json::Value;

use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs, FlagKind};
use crate::blueprint;
use crate::builtin::apply_chown;
use crate::error::ComponentError;

/// Process workdir commands
pub struct Workdir;

#[async_trait]
impl Component for Workdir {
    fn name(&self) -> &'static str {
        "WORKDIR"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common()
            .flag("chown", FlagKind::Str)
            .positional("workdir")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let path = bound.get_str("workdir").ok_or_else(|| {
            ComponentError::InvalidArguments("WORKDIR requires a path".to_string())
        })?;
        definition.set("workdir", Value::String(path.to_string()));
        if let Some(chown) = bound.get_str("chown") {
            definition.set("chown", Value::String(chown.to_string()));
        }
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let template = ctx
            .job
            .definition
            .get_str("workdir")
            .ok_or_else(|| ComponentError::InvalidArguments("missing workdir".to_string()))?;
        let args = ctx.args_map().await?;
        let path = blueprint::render(template, &args)?;

        tokio::fs::create_dir_all(&path).await?;
        if let Some(chown) = ctx.job.definition.get_str("chown") {
            apply_chown(std::path::Path::new(&path), chown)?;
        }
        Ok(TaskOutcome::success(format!("created {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_words;

    #[test]
    fn test_normalize_requires_path() {
        let workdir = Workdir;
        let bound = workdir.spec().bind(&[]).err();
        // The required positional is enforced by the binder
        assert!(bound.is_some());
    }

    #[test]
    fn test_normalize_with_chown() {
        let workdir = Workdir;
        let tokens = split_words("--chown root:root /opt/data").unwrap();
        let bound = workdir.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        workdir.normalize(&bound, &mut def).unwrap();
        assert_eq!(def.get_str("workdir"), Some("/opt/data"));
        assert_eq!(def.get_str("chown"), Some("root:root"));
    }
}
