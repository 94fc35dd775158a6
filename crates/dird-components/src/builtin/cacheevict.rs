//! CACHEEVICT: evict tagged cache entries on the client

use async_trait::async_trait;
use serde_json::Value;

use dird_core::cache::CacheTag;
use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs};
use crate::error::ComponentError;

/// Process cacheevict commands
pub struct CacheEvict;

#[async_trait]
impl Component for CacheEvict {
    fn name(&self) -> &'static str {
        "CACHEEVICT"
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common().positional("cacheevict")
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);
        let tag = bound.get_str("cacheevict").ok_or_else(|| {
            ComponentError::InvalidArguments("CACHEEVICT requires a cache tag".to_string())
        })?;
        if tag != "all" && tag.parse::<CacheTag>().is_err() {
            return Err(ComponentError::InvalidArguments(format!(
                "unknown cache tag: {} (expected args, envs, jobs, parents, query, or all)",
                tag
            )));
        }
        definition.set("cacheevict", Value::String(tag.to_string()));
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let tag = ctx
            .job
            .definition
            .get_str("cacheevict")
            .ok_or_else(|| ComponentError::InvalidArguments("missing cache tag".to_string()))?;

        if tag == "all" {
            let evicted = ctx.cache.evict_all().await?;
            return Ok(TaskOutcome::success(format!(
                "All cache has been cleared ({} items)",
                evicted
            )));
        }

        let tag: CacheTag = tag
            .parse()
            .map_err(ComponentError::InvalidArguments)?;
        let evicted = ctx.cache.evict(tag).await?;
        Ok(TaskOutcome::success(format!(
            "Evicted {} items, tagged {}",
            evicted, tag
        )))
    }

    fn cacheable(&self) -> bool {
        false
    }
}
