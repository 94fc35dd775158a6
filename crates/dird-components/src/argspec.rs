//! Declarative argument specs for DSL binding
//!
//! Each component declares the flags and positionals it understands; the
//! binder walks tokenized input and produces a JSON map. Unrecognized
//! tokens are kept as a remainder so verbs like RUN can treat them as the
//! command line itself.

use serde_json::{Map, Value};

use crate::error::ComponentError;

/// How a flag consumes input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// Presence sets the field to true
    Bool,
    /// Consumes one string value
    Str,
    /// Consumes one integer value
    Int,
}

/// A named `--flag` definition
#[derive(Debug, Clone)]
pub struct FlagDef {
    /// Flag name without the leading dashes, hyphenated
    pub name: &'static str,
    /// Consumption rule
    pub kind: FlagKind,
}

/// A positional argument definition
#[derive(Debug, Clone)]
pub struct PositionalDef {
    /// Field name the value binds to
    pub name: &'static str,
    /// Whether binding fails when absent
    pub required: bool,
    /// A greedy positional absorbs all remaining words as a list
    pub greedy: bool,
}

/// A component's argument surface
#[derive(Debug, Clone, Default)]
pub struct ArgSpec {
    flags: Vec<FlagDef>,
    positionals: Vec<PositionalDef>,
}

impl ArgSpec {
    /// Spec with the flags every component accepts
    pub fn common() -> Self {
        Self::default()
            .flag("skip-cache", FlagKind::Bool)
            .flag("run-once", FlagKind::Bool)
            .flag("timeout", FlagKind::Int)
            .flag("stdout-arg", FlagKind::Str)
            .flag("stderr-arg", FlagKind::Str)
    }

    /// Add a flag
    pub fn flag(mut self, name: &'static str, kind: FlagKind) -> Self {
        self.flags.push(FlagDef { name, kind });
        self
    }

    /// Add a required positional
    pub fn positional(mut self, name: &'static str) -> Self {
        self.positionals.push(PositionalDef {
            name,
            required: true,
            greedy: false,
        });
        self
    }

    /// Add a greedy trailing positional (binds the rest as a list)
    pub fn greedy(mut self, name: &'static str, required: bool) -> Self {
        self.positionals.push(PositionalDef {
            name,
            required,
            greedy: true,
        });
        self
    }

    fn find_flag(&self, name: &str) -> Option<&FlagDef> {
        self.flags.iter().find(|f| f.name == name)
    }

    /// Bind tokenized input against this spec.
    ///
    /// Known flags land in `values` (hyphens turned into underscores);
    /// unknown tokens become the remainder, then positionals consume from
    /// the remainder in declaration order.
    pub fn bind(&self, tokens: &[String]) -> Result<BoundArgs, ComponentError> {
        let mut values = Map::new();
        let mut remainder: Vec<String> = Vec::new();
        let mut iter = tokens.iter().peekable();

        while let Some(token) = iter.next() {
            let Some(stripped) = token.strip_prefix("--") else {
                remainder.push(token.clone());
                continue;
            };

            let (name, inline_value) = match stripped.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (stripped, None),
            };

            let Some(flag) = self.find_flag(name) else {
                remainder.push(token.clone());
                continue;
            };
            let field = flag.name.replace('-', "_");

            match flag.kind {
                FlagKind::Bool => {
                    if inline_value.is_some() {
                        return Err(ComponentError::InvalidArguments(format!(
                            "--{} takes no value",
                            name
                        )));
                    }
                    values.insert(field, Value::Bool(true));
                }
                FlagKind::Str | FlagKind::Int => {
                    let raw = match inline_value {
                        Some(v) => v,
                        None => iter
                            .next()
                            .cloned()
                            .ok_or_else(|| {
                                ComponentError::InvalidArguments(format!(
                                    "--{} requires a value",
                                    name
                                ))
                            })?,
                    };
                    let value = if flag.kind == FlagKind::Int {
                        let n: i64 = raw.parse().map_err(|_| {
                            ComponentError::InvalidArguments(format!(
                                "--{} expects an integer, got {:?}",
                                name, raw
                            ))
                        })?;
                        Value::from(n)
                    } else {
                        Value::String(raw)
                    };
                    values.insert(field, value);
                }
            }
        }

        // Positionals consume from the remainder in order
        let mut rest = remainder.into_iter();
        for pos in &self.positionals {
            if pos.greedy {
                let items: Vec<Value> = rest.by_ref().map(Value::String).collect();
                if items.is_empty() && pos.required {
                    return Err(ComponentError::InvalidArguments(format!(
                        "missing required argument: {}",
                        pos.name
                    )));
                }
                values.insert(pos.name.replace('-', "_"), Value::Array(items));
            } else {
                match rest.next() {
                    Some(word) => {
                        values.insert(pos.name.replace('-', "_"), Value::String(word));
                    }
                    None if pos.required => {
                        return Err(ComponentError::InvalidArguments(format!(
                            "missing required argument: {}",
                            pos.name
                        )));
                    }
                    None => {}
                }
            }
        }

        Ok(BoundArgs {
            values,
            remainder: rest.collect(),
        })
    }
}

/// Result of binding tokens against an `ArgSpec`
#[derive(Debug, Clone, Default)]
pub struct BoundArgs {
    /// Bound flag and positional values
    pub values: Map<String, Value>,
    /// Tokens no flag or positional claimed
    pub remainder: Vec<String>,
}

impl BoundArgs {
    /// Build bound args directly from a `vars` mapping (dict form jobs)
    pub fn from_vars(vars: Map<String, Value>) -> Self {
        Self {
            values: vars,
            remainder: Vec::new(),
        }
    }

    /// Fetch a string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Fetch a boolean value, defaulting to false
    pub fn get_flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_common_flags_bind() {
        let spec = ArgSpec::common();
        let bound = spec
            .bind(&tokens(&["--run-once", "--timeout", "30", "echo", "hi"]))
            .unwrap();

        assert_eq!(bound.values["run_once"], Value::Bool(true));
        assert_eq!(bound.values["timeout"], Value::from(30));
        assert_eq!(bound.remainder, vec!["echo", "hi"]);
    }

    #[test]
    fn test_equals_form() {
        let spec = ArgSpec::common();
        let bound = spec
            .bind(&tokens(&["--stdout-arg=result", "uptime"]))
            .unwrap();
        assert_eq!(bound.get_str("stdout_arg"), Some("result"));
        assert_eq!(bound.remainder, vec!["uptime"]);
    }

    #[test]
    fn test_positional_binding() {
        let spec = ArgSpec::common().positional("workdir");
        let bound = spec.bind(&tokens(&["/opt/data"])).unwrap();
        assert_eq!(bound.get_str("workdir"), Some("/opt/data"));

        assert!(spec.bind(&tokens(&[])).is_err());
    }

    #[test]
    fn test_greedy_positional() {
        let spec = ArgSpec::common().greedy("files", true);
        let bound = spec
            .bind(&tokens(&["--run-once", "a.txt", "b.txt", "/dest/"]))
            .unwrap();
        assert_eq!(
            bound.values["files"],
            Value::Array(vec![
                Value::String("a.txt".into()),
                Value::String("b.txt".into()),
                Value::String("/dest/".into()),
            ])
        );
    }

    #[test]
    fn test_missing_flag_value() {
        let spec = ArgSpec::common();
        assert!(spec.bind(&tokens(&["--timeout"])).is_err());
        assert!(spec.bind(&tokens(&["--timeout", "soon"])).is_err());
    }

    #[test]
    fn test_bool_flag_rejects_value() {
        let spec = ArgSpec::common();
        assert!(spec.bind(&tokens(&["--run-once=yes"])).is_err());
    }

    #[test]
    fn test_unknown_flags_stay_in_remainder() {
        let spec = ArgSpec::common();
        let bound = spec.bind(&tokens(&["ls", "--color", "auto"])).unwrap();
        assert_eq!(bound.remainder, vec!["ls", "--color", "auto"]);
    }
}
