//! QUERY_WAIT: block until an item appears in the query cache

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

/// Process query_wait commands
pub struct QueryWait;

#[async_trait]
impl Component for QueryWait {
    fn name(&self) -> &'static str {
        "QUERY_WAIT"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common()
            .flag("query-timeout", FlagKind::Int)
            .flag("identity", FlagKind::Str)
            .positional("item")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let item = bound.get_str("item").ok_or_else(|| {
            ComponentError::InvalidArguments("QUERY_WAIT requires an item".to_string())
        })?;
        definition.set("item", Value::String(item.to_string()));
        if let Some(timeout) = bound.values.get("query_timeout") {
            definition.set("query_timeout", timeout.clone());
        }
        if let Some(identities) = bound.get_str("identity") {
            let list: Vec<Value> = identities
                .split(',')
                .map(|s| Value::String(s.trim().to_string()))
                .filter(|v| v.as_str().map_or(false, |s| !s.is_empty()))
                .collect();
            definition.set("identity", Value::Array(list));
        }
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let item = ctx
            .job
            .definition
            .get_str("item")
            .ok_or_else(|| ComponentError::InvalidArguments("missing item".to_string()))?
            .to_string();
        let wait_secs = ctx
            .job
            .definition
            .get("query_timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_WAIT_SECS);
        let identities = ctx.job.definition.get_list("identity");

        let deadline = clock::deadline_millis(wait_secs);
        loop {
            if let Some(Value::Object(entry)) =
                ctx.cache.get(CacheTag::Query, &item).await?
            {
                if identities.is_empty() {
                    return Ok(TaskOutcome::success(format!(
                        "item {} found in the query cache",
                        item
                    )));
                }
                let missing: Vec<&str> = identities
                    .iter()
                    .filter(|identity| !entry.contains_key(identity.as_str()))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    return Ok(TaskOutcome::success(format!(
                        "item {} found for identities {}",
                        item,
                        identities.join(", ")
                    )));
                }
                tracing::debug!("query_wait on {}: missing {:?}", item, missing);
            }

            if clock::now_millis() >= deadline {
                return Ok(TaskOutcome::failure(format!(
                    "timed out after {}s waiting for query item {}",
                    wait_secs, item
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
    fn test_normalize_with_identities() {
        let component = QueryWait;
        let tokens =
            split_words("--query-timeout 30 --identity n1,n2 release").unwrap();
        let bound = component.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        component.normalize(&bound, &mut def).unwrap();
        assert_eq!(def.get_str("item"), Some("release"));
        assert_eq!(def.get("query_timeout").unwrap().as_u64(), Some(30));
        assert_eq!(def.get_list("identity"), vec!["n1", "n2"]);
    }
}
