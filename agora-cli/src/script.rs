//! Script files replayed by `agora run`.
//!
//! ```yaml
//! shapes:
//!   session: 2
//! actors:
//!   - name: directory
//!     assert: ['account("a@x")']
//!     observe: ['session($, _)']
//! steps:
//!   - assert: { actor: directory, value: 'session("a@x", "pw")' }
//!   - send: 'ping(1)'
//!   - stop: directory
//! ```

use agora::assertion::SyntaxError;
use agora::{Pattern, PatternError, ShapeRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse script: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("{location}: cannot parse `{source_text}`: {error}")]
    Syntax {
        location: String,
        source_text: String,
        error: SyntaxError,
    },

    #[error("{location}: {error}")]
    Malformed {
        location: String,
        error: PatternError,
    },

    #[error("{location}: unknown actor `{name}`")]
    UnknownActor { location: String, name: String },

    #[error("actor `{0}` is declared twice")]
    DuplicateActor(String),
}

/// An actor started before the first step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorSpec {
    pub name: String,

    /// Values asserted for the actor's whole life
    #[serde(default)]
    pub assert: Vec<String>,

    /// Patterns whose assertion events are reported
    #[serde(default)]
    pub observe: Vec<String>,

    /// Patterns whose messages are reported
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub actor: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Assert(Target),
    Retract(Target),
    Send(String),
    Spawn(ActorSpec),
    Stop(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    /// Declared record arities
    #[serde(default)]
    pub shapes: BTreeMap<String, usize>,

    #[serde(default)]
    pub actors: Vec<ActorSpec>,

    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

/// A script whose values and patterns have all been parsed
#[derive(Debug, Clone)]
pub struct Checked {
    pub shapes: BTreeMap<String, usize>,
    pub actors: Vec<CheckedActor>,
    pub steps: Vec<CheckedStep>,
}

#[derive(Debug, Clone)]
pub struct CheckedActor {
    pub name: String,
    pub assert: Vec<Value>,
    pub observe: Vec<Pattern>,
    pub messages: Vec<Pattern>,
}

#[derive(Debug, Clone)]
pub enum CheckedStep {
    Assert { actor: String, value: Value },
    Retract { actor: String, value: Value },
    Send(Value),
    Spawn(CheckedActor),
    Stop(String),
}

impl Script {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ScriptError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Parse every value and pattern and resolve actor names
    pub fn check(&self) -> Result<Checked, ScriptError> {
        let mut shapes = ShapeRegistry::new();
        for (label, arity) in &self.shapes {
            shapes.declare(label, *arity).map_err(|error| ScriptError::Malformed {
                location: "shapes".to_string(),
                error,
            })?;
        }

        let mut names = BTreeSet::new();
        let mut actors = Vec::new();
        for spec in &self.actors {
            actors.push(check_actor(spec, &shapes, &mut names)?);
        }

        let mut steps = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            let location = format!("step {index}");
            let known = |name: &String| {
                if names.contains(name) {
                    Ok(name.clone())
                } else {
                    Err(ScriptError::UnknownActor {
                        location: location.clone(),
                        name: name.clone(),
                    })
                }
            };
            let checked = match step {
                Step::Assert(target) => CheckedStep::Assert {
                    actor: known(&target.actor)?,
                    value: value(&location, &target.value, &shapes)?,
                },
                Step::Retract(target) => CheckedStep::Retract {
                    actor: known(&target.actor)?,
                    value: value(&location, &target.value, &shapes)?,
                },
                Step::Send(text) => CheckedStep::Send(value(&location, text, &shapes)?),
                Step::Stop(name) => CheckedStep::Stop(known(name)?),
                Step::Spawn(spec) => CheckedStep::Spawn(check_actor(spec, &shapes, &mut names)?),
            };
            steps.push(checked);
        }

        Ok(Checked {
            shapes: self.shapes.clone(),
            actors,
            steps,
        })
    }
}

fn check_actor(
    spec: &ActorSpec,
    shapes: &ShapeRegistry,
    names: &mut BTreeSet<String>,
) -> Result<CheckedActor, ScriptError> {
    if !names.insert(spec.name.clone()) {
        return Err(ScriptError::DuplicateActor(spec.name.clone()));
    }
    let location = format!("actor `{}`", spec.name);
    let assert = spec
        .assert
        .iter()
        .map(|text| value(&location, text, shapes))
        .collect::<Result<_, _>>()?;
    let observe = spec
        .observe
        .iter()
        .map(|text| pattern(&location, text, shapes))
        .collect::<Result<_, _>>()?;
    let messages = spec
        .messages
        .iter()
        .map(|text| pattern(&location, text, shapes))
        .collect::<Result<_, _>>()?;
    Ok(CheckedActor {
        name: spec.name.clone(),
        assert,
        observe,
        messages,
    })
}

fn value(location: &str, text: &str, shapes: &ShapeRegistry) -> Result<Value, ScriptError> {
    let value: Value = text.parse().map_err(|error| ScriptError::Syntax {
        location: location.to_string(),
        source_text: text.to_string(),
        error,
    })?;
    shapes
        .check_value(&value)
        .map_err(|error| ScriptError::Malformed {
            location: location.to_string(),
            error,
        })?;
    Ok(value)
}

fn pattern(location: &str, text: &str, shapes: &ShapeRegistry) -> Result<Pattern, ScriptError> {
    let pattern: Pattern = text.parse().map_err(|error| ScriptError::Syntax {
        location: location.to_string(),
        source_text: text.to_string(),
        error,
    })?;
    pattern
        .validate(shapes)
        .map_err(|error| ScriptError::Malformed {
            location: location.to_string(),
            error,
        })?;
    Ok(pattern)
}
