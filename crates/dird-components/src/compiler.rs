//! Orchestration compiler
//!
//! Turns orchestration YAML into an ordered stream of typed jobs. Each
//! orchestration gets a fresh parent id; its jobs inherit the `async` flag,
//! targets, and submission-time options. Inline job strings are tokenized
//! shell-style and bound against the component's argument spec; dict-form
//! jobs bind their `vars` directly. Submission-time variables interpolate
//! `{{ var }}` here; client-side cache values interpolate later, on the
//! client.

use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use dird_core::job::{JobDefinition, JobSpec};

use crate::argspec::BoundArgs;
use crate::blueprint;
use crate::error::ComponentError;
use crate::registry::Registry;
use crate::tokenizer::split_words;

/// One orchestration stanza
#[derive(Debug, Clone, Deserialize)]
pub struct Orchestration {
    /// Display name, unused by the engine
    #[serde(default)]
    pub name: Option<String>,

    /// Target identities for every job in the stanza
    #[serde(default)]
    pub targets: Vec<String>,

    /// Relax per-identity ordering for this parent
    #[serde(default, rename = "async")]
    pub run_async: bool,

    /// The job entries, each a single-key verb mapping
    pub jobs: Vec<Map<String, Value>>,
}

/// Submission-time options
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Override every stanza's targets
    pub targets: Vec<String>,

    /// Restrict execution to these identities
    pub restrict: Vec<String>,

    /// Force `skip_cache` on every job
    pub ignore_cache: bool,

    /// Interpolation variables from the submitting process
    pub vars: Map<String, Value>,
}

/// Parse orchestration YAML (a list of stanzas).
pub fn parse_orchestrations(content: &str) -> Result<Vec<Orchestration>, ComponentError> {
    serde_yaml::from_str(content)
        .map_err(|e| ComponentError::InvalidArguments(format!("orchestration parse error: {}", e)))
}

/// Compile parsed orchestrations into a job stream.
pub fn compile_orchestrations(
    registry: &Registry,
    orchestrations: &[Orchestration],
    options: &CompileOptions,
) -> Result<Vec<JobSpec>, ComponentError> {
    let mut jobs = Vec::new();
    for orchestration in orchestrations {
        let parent_id = Uuid::new_v4();
        let targets = if !options.targets.is_empty() {
            options.targets.clone()
        } else {
            orchestration.targets.clone()
        };

        for entry in &orchestration.jobs {
            if entry.len() != 1 {
                return Err(ComponentError::InvalidArguments(format!(
                    "job entries must have exactly one verb key, got {}",
                    entry.len()
                )));
            }
            let (verb, body) = entry.iter().next().expect("length checked above");
            let spec = compile_job(registry, verb, body, &targets, parent_id, orchestration, options)?;
            jobs.push(spec);
        }
    }
    Ok(jobs)
}

/// Compile a single `exec` invocation (one-shot submission).
pub fn compile_exec(
    registry: &Registry,
    verb: &str,
    exec: &str,
    options: &CompileOptions,
) -> Result<JobSpec, ComponentError> {
    let stanza = Orchestration {
        name: None,
        targets: Vec::new(),
        run_async: false,
        jobs: Vec::new(),
    };
    let mut spec = compile_job(
        registry,
        verb,
        &Value::String(exec.to_string()),
        &options.targets,
        Uuid::new_v4(),
        &stanza,
        options,
    )?;
    // One-shot submissions are their own parent
    spec.parent_id = spec.job_id;
    Ok(spec)
}

#[allow(clippy::too_many_arguments)]
fn compile_job(
    registry: &Registry,
    verb: &str,
    body: &Value,
    targets: &[String],
    parent_id: Uuid,
    orchestration: &Orchestration,
    options: &CompileOptions,
) -> Result<JobSpec, ComponentError> {
    if verb != verb.to_uppercase() {
        return Err(ComponentError::InvalidArguments(format!(
            "verbs are uppercase identifiers, got {:?}",
            verb
        )));
    }
    let component = registry.get(verb)?;

    let bound = match body {
        // Inline form: interpolate submission vars, tokenize, bind.
        // Unknown variables survive for the client-side cache pass.
        Value::String(line) => {
            let rendered = blueprint::render_partial(line, &options.vars);
            let tokens = split_words(&rendered)?;
            component.spec().bind(&tokens)?
        }
        // Dict form: `vars` keys map to argument names directly
        Value::Object(map) => {
            let mut vars = map
                .get("vars")
                .and_then(|v| v.as_object())
                .cloned()
                .ok_or_else(|| {
                    ComponentError::InvalidArguments(format!(
                        "dict-form {} job requires a `vars` mapping",
                        verb
                    ))
                })?;
            for (_, value) in vars.iter_mut() {
                blueprint::render_value_partial(value, &options.vars);
            }
            BoundArgs::from_vars(vars)
        }
        other => {
            return Err(ComponentError::InvalidArguments(format!(
                "job body must be a string or a mapping, got {}",
                other
            )))
        }
    };

    let mut definition = JobDefinition::new();
    component.normalize(&bound, &mut definition)?;

    if !targets.is_empty() {
        definition.set(
            "targets",
            Value::Array(targets.iter().cloned().map(Value::String).collect()),
        );
    }
    if !options.restrict.is_empty() {
        definition.set(
            "restrict",
            Value::Array(options.restrict.iter().cloned().map(Value::String).collect()),
        );
    }
    if options.ignore_cache {
        definition.set("skip_cache", Value::Bool(true));
    }
    if !options.vars.is_empty() {
        definition.set("extend_args", Value::Object(options.vars.clone()));
    }

    Ok(JobSpec::new(verb, definition).with_parent(parent_id, orchestration.run_async))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(yaml: &str, options: &CompileOptions) -> Vec<JobSpec> {
        let registry = Registry::builtin();
        let orchestrations = parse_orchestrations(yaml).unwrap();
        compile_orchestrations(&registry, &orchestrations, options).unwrap()
    }

    #[test]
    fn test_single_echo() {
        let jobs = compile(
            "- jobs:\n  - RUN: echo hello world\n",
            &CompileOptions::default(),
        );
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].verb, "RUN");
        assert_eq!(
            jobs[0].definition.get_str("command"),
            Some("echo hello world")
        );
        assert_ne!(jobs[0].parent_id, jobs[0].job_id);
        assert!(!jobs[0].parent_async);
    }

    #[test]
    fn test_shared_parent_and_order() {
        let yaml = "- name: setup\n  jobs:\n  - WORKDIR: /opt/app\n  - RUN: echo one\n  - RUN: echo two\n";
        let jobs = compile(yaml, &CompileOptions::default());
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].verb, "WORKDIR");
        assert!(jobs.iter().all(|j| j.parent_id == jobs[0].parent_id));
    }

    #[test]
    fn test_separate_stanzas_get_separate_parents() {
        let yaml = "- jobs:\n  - RUN: echo a\n- jobs:\n  - RUN: echo b\n";
        let jobs = compile(yaml, &CompileOptions::default());
        assert_ne!(jobs[0].parent_id, jobs[1].parent_id);
    }

    #[test]
    fn test_async_flag_propagates() {
        let yaml = "- async: true\n  jobs:\n  - RUN: sleep 1\n  - RUN: sleep 1\n";
        let jobs = compile(yaml, &CompileOptions::default());
        assert!(jobs.iter().all(|j| j.parent_async));
    }

    #[test]
    fn test_stanza_targets() {
        let yaml = "- targets:\n  - n1\n  - n2\n  jobs:\n  - RUN: echo x\n";
        let jobs = compile(yaml, &CompileOptions::default());
        assert_eq!(jobs[0].definition.get_list("targets"), vec!["n1", "n2"]);
    }

    #[test]
    fn test_target_override_wins() {
        let yaml = "- targets: [n1]\n  jobs:\n  - RUN: echo x\n";
        let options = CompileOptions {
            targets: vec!["n9".to_string()],
            ..Default::default()
        };
        let jobs = compile(yaml, &options);
        assert_eq!(jobs[0].definition.get_list("targets"), vec!["n9"]);
    }

    #[test]
    fn test_ignore_cache_forces_skip() {
        let options = CompileOptions {
            ignore_cache: true,
            ..Default::default()
        };
        let jobs = compile("- jobs:\n  - RUN: echo x\n", &options);
        assert!(jobs[0].definition.skip_cache());
    }

    #[test]
    fn test_dict_form_vars() {
        let yaml = "- jobs:\n  - RUN:\n      vars:\n        command: sleep 10\n        timeout: 1\n";
        let jobs = compile(yaml, &CompileOptions::default());
        assert_eq!(jobs[0].definition.get_str("command"), Some("sleep 10"));
        assert_eq!(jobs[0].definition.timeout_secs(), 1);
    }

    #[test]
    fn test_submission_vars_interpolate() {
        let mut vars = Map::new();
        vars.insert("greeting".to_string(), json!("hello"));
        let options = CompileOptions {
            vars,
            ..Default::default()
        };
        let jobs = compile("- jobs:\n  - RUN: echo {{ greeting }}\n", &options);
        assert_eq!(jobs[0].definition.get_str("command"), Some("echo hello"));
        // Submission vars also ride along for client-side rendering
        assert!(jobs[0].definition.extend_args().is_some());
    }

    #[test]
    fn test_sha_identical_for_identical_jobs() {
        let a = compile("- jobs:\n  - RUN: echo same\n", &CompileOptions::default());
        let b = compile("- jobs:\n  - RUN: echo same\n", &CompileOptions::default());
        assert_eq!(a[0].job_sha, b[0].job_sha);
    }

    #[test]
    fn test_unknown_verb_rejected() {
        let registry = Registry::builtin();
        let orchestrations = parse_orchestrations("- jobs:\n  - FROBNICATE: x\n").unwrap();
        let result =
            compile_orchestrations(&registry, &orchestrations, &CompileOptions::default());
        assert!(matches!(result, Err(ComponentError::UnknownVerb(_))));
    }

    #[test]
    fn test_lowercase_verb_rejected() {
        let registry = Registry::builtin();
        let orchestrations = parse_orchestrations("- jobs:\n  - run: echo x\n").unwrap();
        let result =
            compile_orchestrations(&registry, &orchestrations, &CompileOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_compile_exec_one_shot() {
        let registry = Registry::builtin();
        let spec = compile_exec(
            &registry,
            "RUN",
            "--timeout 5 echo hi",
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(spec.definition.get_str("command"), Some("echo hi"));
        assert_eq!(spec.definition.timeout_secs(), 5);
        assert!(!spec.parent_async);
    }
}
