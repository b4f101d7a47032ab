//! Parameter signatures of the task implementations and the name corrections
//! applied on top of them.

use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::{PipelineError, Result};
use super::TaskDefinition;

/// How a parameter appears in a preprocessing signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Receiver,
    Named,
    /// Catch-all positional or keyword sink; never exposed to callers.
    Variadic,
}

/// Compile-time default value of a declared parameter.
#[derive(Debug, Clone, Copy)]
pub enum StaticDefault {
    Null,
    Bool(bool),
    Int(i64),
    Str(&'static str),
    StrList(&'static [&'static str]),
}

impl StaticDefault {
    pub fn to_value(&self) -> Value {
        match self {
            StaticDefault::Null => Value::Null,
            StaticDefault::Bool(b) => json!(b),
            StaticDefault::Int(i) => json!(i),
            StaticDefault::Str(s) => json!(s),
            StaticDefault::StrList(items) => json!(items),
        }
    }
}

/// A parameter as declared by the implementation, before corrections.
#[derive(Debug, Clone, Copy)]
pub struct RawParameter {
    pub name: &'static str,
    pub kind: RawKind,
    pub type_hint: Option<&'static str>,
    pub default: Option<StaticDefault>,
}

impl RawParameter {
    pub const fn receiver() -> Self {
        Self { name: "self", kind: RawKind::Receiver, type_hint: None, default: None }
    }

    pub const fn required(name: &'static str, type_hint: &'static str) -> Self {
        Self { name, kind: RawKind::Named, type_hint: Some(type_hint), default: None }
    }

    pub const fn optional(name: &'static str, type_hint: &'static str, default: StaticDefault) -> Self {
        Self { name, kind: RawKind::Named, type_hint: Some(type_hint), default: Some(default) }
    }

    pub const fn variadic(name: &'static str) -> Self {
        Self { name, kind: RawKind::Variadic, type_hint: None, default: None }
    }

    pub fn is_required(&self) -> bool {
        self.kind == RawKind::Named && self.default.is_none()
    }
}

/// Default of a resolved parameter; `Required` serialises as the `"REQUIRED"` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    Required,
    Value(Value),
}

impl Serialize for ParamDefault {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ParamDefault::Required => serializer.serialize_str("REQUIRED"),
            ParamDefault::Value(v) => v.serialize(serializer),
        }
    }
}

/// A caller-facing parameter of a task, named the way the task must be called.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: String,
    #[serde(rename = "default_value")]
    pub default: ParamDefault,
}

impl ParameterSpec {
    pub fn is_required(&self) -> bool {
        self.default == ParamDefault::Required
    }
}

/// Known discrepancies between declared and actually-required argument names,
/// regenerated by `hfpipe discover`.
const BUILTIN_OVERRIDES: &[(&str, &[(&str, &str)])] = &[
    ("token-classification", &[("sentence", "inputs")]),
    ("zero-shot-classification", &[("inputs", "sequences")]),
    ("text-generation", &[("prompt_text", "text_inputs")]),
];

static BUILTIN: Lazy<OverrideTable> = Lazy::new(|| {
    OverrideTable::from_entries(BUILTIN_OVERRIDES.iter().flat_map(|(task, pairs)| {
        pairs.iter().map(move |(raw, fixed)| (*task, *raw, *fixed))
    }))
});

/// Mapping task_name -> (raw parameter name -> corrected name).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideTable {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl OverrideTable {
    pub fn builtin() -> &'static OverrideTable {
        &BUILTIN
    }

    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut table = OverrideTable::default();
        for (task, raw, fixed) in entries {
            table.insert(task, raw, fixed);
        }
        table
    }

    pub fn insert(&mut self, task: &str, raw: &str, fixed: &str) {
        self.entries
            .entry(task.to_string())
            .or_default()
            .insert(raw.to_string(), fixed.to_string());
    }

    pub fn lookup(&self, task: &str, raw: &str) -> Option<&str> {
        self.entries.get(task)?.get(raw).map(String::as_str)
    }

    /// Corrections registered for one task, if any.
    pub fn corrections(&self, task: &str) -> Option<&BTreeMap<String, String>> {
        self.entries.get(task)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lists the caller-facing parameters of a task.
///
/// Receiver and variadic parameters are dropped, override names replace the
/// declared ones, and missing hints/defaults become `"any"` / `REQUIRED`.
/// Fails when an override names a parameter the signature does not declare,
/// or when two parameters end up with the same name.
pub fn resolve_parameters(definition: &TaskDefinition, overrides: &OverrideTable) -> Result<Vec<ParameterSpec>> {
    let task = definition.name;
    let fail = |reason: String| PipelineError::Introspection { task: task.to_string(), reason };

    if let Some(corrections) = overrides.corrections(task) {
        for raw in corrections.keys() {
            let declared = definition
                .signature
                .iter()
                .any(|p| p.kind == RawKind::Named && p.name == raw);
            if !declared {
                return Err(fail(format!("override refers to undeclared parameter '{}'", raw)));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for param in definition.signature.iter().filter(|p| p.kind == RawKind::Named) {
        let name = overrides.lookup(task, param.name).unwrap_or(param.name);
        if !seen.insert(name) {
            return Err(fail(format!("parameter '{}' is declared twice", name)));
        }
        resolved.push(ParameterSpec {
            name: name.to_string(),
            type_hint: param.type_hint.unwrap_or("any").to_string(),
            default: match param.default {
                Some(d) => ParamDefault::Value(d.to_value()),
                None => ParamDefault::Required,
            },
        });
    }

    Ok(resolved)
}
