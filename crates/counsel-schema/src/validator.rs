//! Descriptor compilation and value checking.
//!
//! Compilation is the expensive step: it validates the descriptor itself,
//! compiles regexes, and flattens references into a node tree. Checking a
//! value walks that tree and never allocates anything but the errors it
//! reports.

use std::collections::HashSet;

use counsel_core::{CoreError, FieldError};
use regex::Regex;
use serde_json::Value;

use crate::descriptor::{NumberRules, SchemaDescriptor, SchemaKind};

#[derive(Debug)]
enum Node {
    Any,
    Null,
    Boolean,
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        pattern: Option<Regex>,
        allowed: Option<Vec<String>>,
    },
    Number(NumberRules),
    Literal(Value),
    Array {
        items: Box<Node>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        properties: Vec<(String, Node, bool)>,
        allow_unknown: bool,
    },
    Union(Vec<Node>),
    Nullable(Box<Node>),
    Named {
        id: String,
        inner: Box<Node>,
    },
}

/// A compiled, reusable validator for one named descriptor.
#[derive(Debug)]
pub struct CompiledValidator {
    id: String,
    root: Node,
}

impl CompiledValidator {
    /// Id of the descriptor this validator was compiled from.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check `value`; an empty list means valid.
    pub fn check(&self, value: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_node(&self.root, value, "", None, &mut errors);
        errors
    }

    /// Whether `value` passes.
    pub fn is_valid(&self, value: &Value) -> bool {
        self.check(value).is_empty()
    }
}

/// Compile a named descriptor. Malformed descriptors are configuration errors.
pub(crate) fn compile(descriptor: &SchemaDescriptor) -> Result<CompiledValidator, CoreError> {
    let id = descriptor
        .id()
        .ok_or_else(|| CoreError::configuration("top-level schema descriptors must be named"))?;
    let root = compile_node(descriptor, id)?;
    Ok(CompiledValidator {
        id: id.to_owned(),
        root,
    })
}

fn malformed(at: &str, message: impl std::fmt::Display) -> CoreError {
    CoreError::configuration(format!("malformed schema '{at}': {message}"))
}

fn compile_node(descriptor: &SchemaDescriptor, at: &str) -> Result<Node, CoreError> {
    let here = descriptor.id().unwrap_or(at);
    if let Some(misuse) = descriptor.misuse().first() {
        return Err(malformed(here, misuse));
    }

    let node = match descriptor.kind() {
        SchemaKind::Any => Node::Any,
        SchemaKind::Null => Node::Null,
        SchemaKind::Boolean => Node::Boolean,
        SchemaKind::String(rules) => {
            if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
                if min > max {
                    return Err(malformed(here, format!("min_length {min} > max_length {max}")));
                }
            }
            let pattern = match &rules.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| malformed(here, e))?),
                None => None,
            };
            if rules.allowed.as_ref().is_some_and(Vec::is_empty) {
                return Err(malformed(here, "one_of needs at least one value"));
            }
            Node::String {
                min_length: rules.min_length,
                max_length: rules.max_length,
                pattern,
                allowed: rules.allowed.clone(),
            }
        }
        SchemaKind::Number(rules) => {
            if let (Some(min), Some(max)) = (rules.minimum, rules.maximum) {
                if min > max {
                    return Err(malformed(here, format!("minimum {min} > maximum {max}")));
                }
            }
            Node::Number(rules.clone())
        }
        SchemaKind::Literal(value) => Node::Literal(value.clone()),
        SchemaKind::Array {
            items,
            min_items,
            max_items,
        } => {
            if let (Some(min), Some(max)) = (min_items, max_items) {
                if min > max {
                    return Err(malformed(here, format!("min_items {min} > max_items {max}")));
                }
            }
            Node::Array {
                items: Box::new(compile_node(items, here)?),
                min_items: *min_items,
                max_items: *max_items,
            }
        }
        SchemaKind::Object {
            properties,
            allow_unknown,
        } => {
            let mut seen = HashSet::new();
            let mut compiled = Vec::with_capacity(properties.len());
            for prop in properties {
                if !seen.insert(prop.name.as_str()) {
                    return Err(malformed(here, format!("duplicate property '{}'", prop.name)));
                }
                compiled.push((prop.name.clone(), compile_node(&prop.schema, here)?, prop.required));
            }
            Node::Object {
                properties: compiled,
                allow_unknown: *allow_unknown,
            }
        }
        SchemaKind::Union(branches) => {
            if branches.is_empty() {
                return Err(malformed(here, "union needs at least one branch"));
            }
            Node::Union(
                branches
                    .iter()
                    .map(|b| compile_node(b, here))
                    .collect::<Result<_, _>>()?,
            )
        }
        SchemaKind::Nullable(inner) => Node::Nullable(Box::new(compile_node(inner, here)?)),
        SchemaKind::Ref(target) => compile_node(target, here)?,
    };

    // Refs are already wrapped by their own named descriptor.
    Ok(match descriptor.id() {
        Some(id) if !matches!(descriptor.kind(), SchemaKind::Ref(_)) => Node::Named {
            id: id.to_owned(),
            inner: Box::new(node),
        },
        _ => node,
    })
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn push(errors: &mut Vec<FieldError>, path: &str, message: String, value: &Value, schema_id: Option<&str>) {
    let mut err = FieldError::new(path, message, value.clone());
    if let Some(id) = schema_id {
        err = err.with_schema_id(id);
    }
    errors.push(err);
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[allow(clippy::too_many_lines)]
fn check_node(node: &Node, value: &Value, path: &str, schema_id: Option<&str>, errors: &mut Vec<FieldError>) {
    match node {
        Node::Any => {}
        Node::Null => {
            if !value.is_null() {
                push(errors, path, format!("must be null, got {}", type_name(value)), value, schema_id);
            }
        }
        Node::Boolean => {
            if !value.is_boolean() {
                push(errors, path, format!("must be a boolean, got {}", type_name(value)), value, schema_id);
            }
        }
        Node::String {
            min_length,
            max_length,
            pattern,
            allowed,
        } => {
            let Some(s) = value.as_str() else {
                push(errors, path, format!("must be a string, got {}", type_name(value)), value, schema_id);
                return;
            };
            let len = s.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    push(errors, path, format!("must be at least {min} characters"), value, schema_id);
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    push(errors, path, format!("must be at most {max} characters"), value, schema_id);
                }
            }
            if let Some(re) = pattern {
                if !re.is_match(s) {
                    push(errors, path, format!("must match pattern {}", re.as_str()), value, schema_id);
                }
            }
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == s) {
                    push(errors, path, format!("must be one of {}", allowed.join(", ")), value, schema_id);
                }
            }
        }
        Node::Number(rules) => {
            let Some(n) = value.as_f64() else {
                push(errors, path, format!("must be a number, got {}", type_name(value)), value, schema_id);
                return;
            };
            if rules.integer && n.fract() != 0.0 {
                push(errors, path, "must be an integer".into(), value, schema_id);
            }
            if let Some(min) = rules.minimum {
                if n < min {
                    push(errors, path, format!("must be >= {min}"), value, schema_id);
                }
            }
            if let Some(max) = rules.maximum {
                if n > max {
                    push(errors, path, format!("must be <= {max}"), value, schema_id);
                }
            }
        }
        Node::Literal(expected) => {
            if value != expected {
                push(errors, path, format!("must equal {expected}"), value, schema_id);
            }
        }
        Node::Array {
            items,
            min_items,
            max_items,
        } => {
            let Some(arr) = value.as_array() else {
                push(errors, path, format!("must be an array, got {}", type_name(value)), value, schema_id);
                return;
            };
            if let Some(min) = min_items {
                if arr.len() < *min {
                    push(errors, path, format!("must have at least {min} items"), value, schema_id);
                }
            }
            if let Some(max) = max_items {
                if arr.len() > *max {
                    push(errors, path, format!("must have at most {max} items"), value, schema_id);
                }
            }
            for (i, item) in arr.iter().enumerate() {
                check_node(items, item, &format!("{path}/{i}"), schema_id, errors);
            }
        }
        Node::Object {
            properties,
            allow_unknown,
        } => {
            let Some(obj) = value.as_object() else {
                push(errors, path, format!("must be an object, got {}", type_name(value)), value, schema_id);
                return;
            };
            for (name, prop, required) in properties {
                let prop_path = format!("{path}/{}", escape_pointer(name));
                match obj.get(name) {
                    Some(v) => check_node(prop, v, &prop_path, schema_id, errors),
                    None if *required => {
                        push(errors, &prop_path, "is required".into(), &Value::Null, schema_id);
                    }
                    None => {}
                }
            }
            if !allow_unknown {
                for (key, v) in obj {
                    if !properties.iter().any(|(name, _, _)| name == key) {
                        let prop_path = format!("{path}/{}", escape_pointer(key));
                        push(errors, &prop_path, "is not allowed".into(), v, schema_id);
                    }
                }
            }
        }
        Node::Union(branches) => {
            let mut closest: Option<Vec<FieldError>> = None;
            for branch in branches {
                let mut branch_errors = Vec::new();
                check_node(branch, value, path, schema_id, &mut branch_errors);
                if branch_errors.is_empty() {
                    return;
                }
                if closest.as_ref().is_none_or(|c| branch_errors.len() < c.len()) {
                    closest = Some(branch_errors);
                }
            }
            errors.extend(closest.unwrap_or_default());
        }
        Node::Nullable(inner) => {
            if !value.is_null() {
                check_node(inner, value, path, schema_id, errors);
            }
        }
        Node::Named { id, inner } => check_node(inner, value, path, Some(id), errors),
    }
}
