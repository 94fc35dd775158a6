//! QUERY: scan the cluster for a cached argument
//!
//! Lookup mode runs everywhere, reads the local `args` cache, and emits a
//! store-mode callback scoped to the query's original targets. Store mode
//! merges `query[key][origin] = value` into the accumulative query cache.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dird_core::cache::CacheTag;
use dird_core::job::{JobDefinition, JobSpec};

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs};
use crate::error::ComponentError;

/// Process query commands
pub struct Query;

impl Query {
    fn store_callback(ctx: &TaskContext<'_>, key: &str, value: &Value) -> JobSpec {
        let mut definition = JobDefinition::new();
        definition.set("query", Value::String(key.to_string()));
        definition.set(
            "query_store",
            json!({
                "identity": ctx.identity.as_str(),
                "value": value,
            }),
        );
        // Scope the callback to the nodes the query was aimed at
        let scoped = ctx.job.definition.get_list("targets");
        if !scoped.is_empty() {
            definition.set(
                "targets",
                Value::Array(scoped.into_iter().map(Value::String).collect()),
            );
        }
        definition.set("skip_cache", Value::Bool(true));
        definition.set("parent_async_bypass", Value::Bool(true));

        JobSpec::new("QUERY", definition).with_parent(ctx.job.parent_id, ctx.job.parent_async)
    }
}

#[async_trait]
impl Component for Query {
    fn name(&self) -> &'static str {
        "QUERY"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common().positional("query")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let key = bound.get_str("query").ok_or_else(|| {
            ComponentError::InvalidArguments("QUERY requires an argument name".to_string())
        })?;
        definition.set("query", Value::String(key.to_string()));
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let key = ctx
            .job
            .definition
            .get_str("query")
            .ok_or_else(|| ComponentError::InvalidArguments("missing query key".to_string()))?
            .to_string();

        // Store mode: merge the origin node's value into the query cache
        if let Some(store) = ctx.job.definition.get("query_store") {
            let origin = store
                .get("identity")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ComponentError::InvalidArguments("query_store missing identity".to_string())
                })?;
            let value = store.get("value").cloned().unwrap_or(Value::Null);

            let mut update = Map::new();
            update.insert(origin.to_string(), value);
            ctx.cache
                .merge_object(CacheTag::Query, &key, update)
                .await?;
            return Ok(TaskOutcome::success(format!(
                "query cache updated: {}[{}]",
                key, origin
            )));
        }

        // Lookup mode: report the local value and fan the result back out
        let value = ctx
            .cache
            .get(CacheTag::Args, &key)
            .await?
            .unwrap_or(Value::Null);
        let stdout = value.to_string();

        Ok(TaskOutcome {
            stdout,
            stderr: String::new(),
            success: true,
            info: Some(format!("query {}", key)),
            new_tasks: vec![Self::store_callback(ctx, &key, &value)],
        })
    }

    fn cacheable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_words;

    #[test]
    fn test_normalize() {
        let query = Query;
        let tokens = split_words("release").unwrap();
        let bound = query.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        query.normalize(&bound, &mut def).unwrap();
        assert_eq!(def.get_str("query"), Some("release"));
    }

    #[test]
    fn test_normalize_requires_key() {
        let query = Query;
        assert!(query.spec().bind(&[]).is_err());
    }
}
