//! ARG and ENV: seed the client-side argument and environment caches

use async_trait::async_trait;
use serde_json::{Map, Value};

use dird_core::cache::CacheTag;
use dird_core::job::JobDefinition;

use crate::abi::{apply_common_fields, Component, TaskContext, TaskOutcome};
use crate::argspec::{ArgSpec, BoundArgs};
use crate::error::ComponentError;

/// One instance per verb: `ARG` fills the `args` cache, `ENV` fills `envs`.
pub struct CacheSet {
    verb: &'static str,
    field: &'static str,
    tag: CacheTag,
}

impl CacheSet {
    /// The ARG component
    pub fn arg() -> Self {
        Self {
            verb: "ARG",
            field: "args",
            tag: CacheTag::Args,
        }
    }

    /// The ENV component
    pub fn env() -> Self {
        Self {
            verb: "ENV",
            field: "envs",
            tag: CacheTag::Envs,
        }
    }
}

#[async_trait]
impl Component for CacheSet {
    fn name(&self) -> &'static str {
        self.verb
    }

    fn spec(&self) -> ArgSpec {
        ArgSpec::common().greedy("pair", true)
    }

    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError> {
        apply_common_fields(bound, definition);

        // Dict form supplies the mapping directly
        if let Some(Value::Object(map)) = bound.values.get(self.field) {
            if map.is_empty() {
                return Err(ComponentError::InvalidArguments(format!(
                    "{} requires at least one key/value pair",
                    self.verb
                )));
            }
            definition.set(self.field, Value::Object(map.clone()));
            return Ok(());
        }

        // Inline form: KEY VALUE, where VALUE is everything after the key
        let words = bound
            .values
            .get("pair")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if words.len() < 2 {
            return Err(ComponentError::InvalidArguments(format!(
                "{} requires KEY VALUE",
                self.verb
            )));
        }
        let mut map = Map::new();
        map.insert(words[0].clone(), Value::String(words[1..].join(" ")));
        definition.set(self.field, Value::Object(map));
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError> {
        let entries = ctx
            .job
            .definition
            .get(self.field)
            .and_then(|v| v.as_object())
            .cloned()
            .ok_or_else(|| {
                ComponentError::InvalidArguments(format!("missing {} mapping", self.field))
            })?;

        for (key, value) in &entries {
            ctx.cache.put(self.tag, key, value.clone()).await?;
        }
        Ok(TaskOutcome::success(format!(
            "{} added to cache: {}",
            self.field,
            entries
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_words;

    #[test]
    fn test_normalize_inline_pair() {
        let arg = CacheSet::arg();
        let tokens = split_words("release epoxy stable").unwrap();
        let bound = arg.spec().bind(&tokens).unwrap();

        let mut def = JobDefinition::new();
        arg.normalize(&bound, &mut def).unwrap();
        assert_eq!(
            def.get("args").unwrap(),
            &serde_json::json!({"release": "epoxy stable"})
        );
    }

    #[test]
    fn test_normalize_requires_value() {
        let env = CacheSet::env();
        let tokens = split_words("ONLYKEY").unwrap();
        let bound = env.spec().bind(&tokens).unwrap();
        let mut def = JobDefinition::new();
        assert!(env.normalize(&bound, &mut def).is_err());
    }

    #[test]
    fn test_normalize_dict_form() {
        let env = CacheSet::env();
        let mut vars = Map::new();
        vars.insert(
            "envs".to_string(),
            serde_json::json!({"HTTP_PROXY": "http://proxy:3128"}),
        );
        let bound = BoundArgs::from_vars(vars);

        let mut def = JobDefinition::new();
        env.normalize(&bound, &mut def).unwrap();
        assert_eq!(
            def.get("envs").unwrap(),
            &serde_json::json!({"HTTP_PROXY": "http://proxy:3128"})
        );
    }
}
