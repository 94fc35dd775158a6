//! RUN: execute a shell command

use async_trait::async_trait;
use serde_json::Value;

use dird_core::cache::CacheTag;
use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs};
use crate::blueprint;
use crate::error::ComponentError;
use crate::proc::run_shell;

/// Process run commands
pub struct Run;

#[async_trait]
impl Component for Run {
    fn name(&self) -> &'static str {
        "RUN"
    }

    fn spec(&self) -> ArgSpec {
        // Everything unrecognized is the command line itself
        ArgSpec::common()
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let command = match bound.values.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => bound.remainder.join(" "),
        };
        if command.trim().is_empty() {
            return Err(ComponentError::InvalidArguments(
                "RUN requires a command".to_string(),
            ));
        }
        definition.set("command", Value::String(command));
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let command_template = ctx
            .job
            .definition
            .get_str("command")
            .ok_or_else(|| ComponentError::InvalidArguments("missing command".to_string()))?;

        let args = ctx.args_map().await?;
        let command = blueprint::render(command_template, &args)?;
        let envs = ctx.cache.get_map(CacheTag::Envs).await?;

        let result = run_shell(&command, &envs, &ctx.cancel).await?;
        Ok(TaskOutcome {
            stdout: result.stdout,
            stderr: result.stderr,
            success: result.success,
            info: Some(command),
            new_tasks: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_words;

    #[test]
    fn test_normalize_joins_remainder() {
        let run = Run;
        let tokens = split_words("--run-once echo hello world").unwrap();
        let bound = run.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        run.normalize(&bound, &mut def).unwrap();

        assert_eq!(def.get_str("command"), Some("echo hello world"));
        assert!(def.run_once());
    }

    #[test]
    fn test_normalize_rejects_empty_command() {
        let run = Run;
        let bound = run.spec().bind(&[]).unwrap();
        let mut def = JobDefinition::new();
        assert!(run.normalize(&bound, &mut def).is_err());
    }

    #[test]
    fn test_normalize_accepts_command_var() {
        let run = Run;
        let mut vars = serde_json::Map::new();
        vars.insert("command".to_string(), Value::String("uptime".to_string()));
        let bound = BoundArgs::from_vars(vars);

        let mut def = JobDefinition::new();
        run.normalize(&bound, &mut def).unwrap();
        assert_eq!(def.get_str("command"), Some("uptime"));
    }
}
