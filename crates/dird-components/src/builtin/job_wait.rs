//! JOB_WAIT: block until a job sha has a terminal outcome in the local
//! jobs cache

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use dird_core::cache::CacheTag;
use dird_core::clock;
use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs, FlagKind};
use crate::error::ComponentError;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_WAIT_SECS: u64 = 600;

/// Process job_wait commands
pub struct JobWait;

#[async_trait]
impl Component for JobWait {
    fn name(&self) -> &'static str {
        "JOB_WAIT"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common()
            .flag("wait-timeout", FlagKind::Int)
            .positional("sha")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let sha = bound.get_str("sha").ok_or_else(|| {
            ComponentError::InvalidArguments("JOB_WAIT requires a job sha".to_string())
        })?;
        definition.set("job_sha_wait", Value::String(sha.to_string()));
        if let Some(timeout) = bound.values.get("wait_timeout") {
            definition.set("wait_timeout", timeout.clone());
        }
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let sha = ctx
            .job
            .definition
            .get_str("job_sha_wait")
            .ok_or_else(|| ComponentError::InvalidArguments("missing job sha".to_string()))?
            .to_string();
        let wait_secs = ctx
            .job
            .definition
            .get("wait_timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_WAIT_SECS);

        let deadline = clock::deadline_millis(wait_secs);
        loop {
            if let Some(outcome) = ctx.cache.get(CacheTag::Jobs, &sha).await? {
                let success = outcome
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if success {
                    return Ok(TaskOutcome::success(format!("job {} succeeded", sha)));
                }
                return Ok(TaskOutcome::failure(format!(
                    "job {} finished unsuccessfully",
                    sha
                )));
            }

            if clock::now_millis() >= deadline {
                return Ok(TaskOutcome::failure(format!(
                    "timed out after {}s waiting for job {}",
                    wait_secs, sha
                )));
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Ok(TaskOutcome::failure("cancelled"));
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn no_block(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_words;

    #[test]
    fn test_normalize() {
        let component = JobWait;
        let tokens = split_words("--wait-timeout 10 abc123").unwrap();
        let bound = component.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        component.normalize(&bound, &mut def).unwrap();
        assert_eq!(def.get_str("job_sha_wait"), Some("abc123"));
        assert_eq!(def.get("wait_timeout").unwrap().as_u64(), Some(10));
    }
}
