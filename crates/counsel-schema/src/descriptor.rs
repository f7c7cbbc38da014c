//! Declarative schema descriptors.
//!
//! A [`SchemaDescriptor`] describes the shape of a JSON value. Descriptors are
//! plain immutable data built with a fluent API; they do nothing until
//! compiled into a [`CompiledValidator`](crate::CompiledValidator).
//!
//! ```ignore
//! let join = SchemaDescriptor::object()
//!     .field("channelKey", SchemaDescriptor::string().min_length(1))
//!     .strict()
//!     .named("join.request");
//! ```
//!
//! Modifiers applied to the wrong kind (e.g. `min_length` on an integer) are
//! recorded and rejected at compile time.

use std::sync::Arc;

use serde_json::Value;

/// Constraints on a string value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringRules {
    /// Minimum length in characters.
    pub min_length: Option<usize>,
    /// Maximum length in characters.
    pub max_length: Option<usize>,
    /// Regex the whole value must match.
    pub pattern: Option<String>,
    /// Closed set of allowed values.
    pub allowed: Option<Vec<String>>,
}

/// Constraints on a numeric value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumberRules {
    /// Reject values with a fractional part.
    pub integer: bool,
    /// Inclusive lower bound.
    pub minimum: Option<f64>,
    /// Inclusive upper bound.
    pub maximum: Option<f64>,
}

/// One property of an object schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property schema.
    pub schema: SchemaDescriptor,
    /// Whether the property must be present.
    pub required: bool,
}

/// The shape a descriptor describes.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaKind {
    /// Any value.
    Any,
    /// JSON `null`.
    Null,
    /// `true` or `false`.
    Boolean,
    /// A string with optional constraints.
    String(StringRules),
    /// A number with optional constraints.
    Number(NumberRules),
    /// Exactly this value.
    Literal(Value),
    /// An array of homogeneous items.
    Array {
        /// Item schema.
        items: Box<SchemaDescriptor>,
        /// Minimum item count.
        min_items: Option<usize>,
        /// Maximum item count.
        max_items: Option<usize>,
    },
    /// An object with declared properties.
    Object {
        /// Declared properties in declaration order.
        properties: Vec<Property>,
        /// Whether undeclared properties are accepted.
        allow_unknown: bool,
    },
    /// Any-of: the value must match at least one branch.
    Union(Vec<SchemaDescriptor>),
    /// The inner schema or `null`.
    Nullable(Box<SchemaDescriptor>),
    /// Another named descriptor, shared.
    Ref(Arc<SchemaDescriptor>),
}

/// A named, composable description of a value's shape.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDescriptor {
    id: Option<String>,
    kind: SchemaKind,
    misuse: Vec<String>,
}

impl SchemaDescriptor {
    fn of(kind: SchemaKind) -> Self {
        Self {
            id: None,
            kind,
            misuse: Vec::new(),
        }
    }

    /// Accept any value.
    pub fn any() -> Self {
        Self::of(SchemaKind::Any)
    }

    /// Accept only `null`.
    pub fn null() -> Self {
        Self::of(SchemaKind::Null)
    }

    /// Accept a boolean.
    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    /// Accept a string.
    pub fn string() -> Self {
        Self::of(SchemaKind::String(StringRules::default()))
    }

    /// Accept any number.
    pub fn number() -> Self {
        Self::of(SchemaKind::Number(NumberRules::default()))
    }

    /// Accept an integral number.
    pub fn integer() -> Self {
        Self::of(SchemaKind::Number(NumberRules {
            integer: true,
            ..NumberRules::default()
        }))
    }

    /// Accept exactly `value`.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::of(SchemaKind::Literal(value.into()))
    }

    /// Accept an array whose items match `items`.
    pub fn array(items: SchemaDescriptor) -> Self {
        Self::of(SchemaKind::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        })
    }

    /// Accept an object; add properties with [`field`](Self::field) and
    /// [`optional`](Self::optional).
    pub fn object() -> Self {
        Self::of(SchemaKind::Object {
            properties: Vec::new(),
            allow_unknown: true,
        })
    }

    /// Accept a value matching any of `branches`.
    pub fn union(branches: Vec<SchemaDescriptor>) -> Self {
        Self::of(SchemaKind::Union(branches))
    }

    /// Accept `inner` or `null`.
    pub fn nullable(inner: SchemaDescriptor) -> Self {
        Self::of(SchemaKind::Nullable(Box::new(inner)))
    }

    /// Reuse a shared named descriptor.
    pub fn reference(target: Arc<SchemaDescriptor>) -> Self {
        Self::of(SchemaKind::Ref(target))
    }

    /// Give this descriptor a stable id. Required for top-level descriptors.
    #[must_use]
    pub fn named(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Stable id, if named.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The described shape.
    pub fn kind(&self) -> &SchemaKind {
        &self.kind
    }

    /// Modifiers that were applied to an incompatible kind.
    pub fn misuse(&self) -> &[String] {
        &self.misuse
    }

    fn string_rules(mut self, modifier: &str, f: impl FnOnce(&mut StringRules)) -> Self {
        if let SchemaKind::String(rules) = &mut self.kind {
            f(rules);
        } else {
            self.misuse.push(format!("{modifier} applies to strings only"));
        }
        self
    }

    fn number_rules(mut self, modifier: &str, f: impl FnOnce(&mut NumberRules)) -> Self {
        if let SchemaKind::Number(rules) = &mut self.kind {
            f(rules);
        } else {
            self.misuse.push(format!("{modifier} applies to numbers only"));
        }
        self
    }

    /// Minimum string length.
    #[must_use]
    pub fn min_length(self, n: usize) -> Self {
        self.string_rules("min_length", |r| r.min_length = Some(n))
    }

    /// Maximum string length.
    #[must_use]
    pub fn max_length(self, n: usize) -> Self {
        self.string_rules("max_length", |r| r.max_length = Some(n))
    }

    /// Regex the whole string must match.
    #[must_use]
    pub fn pattern(self, regex: impl Into<String>) -> Self {
        let regex = regex.into();
        self.string_rules("pattern", |r| r.pattern = Some(regex))
    }

    /// Closed set of allowed string values.
    #[must_use]
    pub fn one_of(self, values: &[&str]) -> Self {
        let values = values.iter().map(|v| (*v).to_owned()).collect();
        self.string_rules("one_of", |r| r.allowed = Some(values))
    }

    /// Inclusive lower bound.
    #[must_use]
    pub fn minimum(self, n: f64) -> Self {
        self.number_rules("minimum", |r| r.minimum = Some(n))
    }

    /// Inclusive upper bound.
    #[must_use]
    pub fn maximum(self, n: f64) -> Self {
        self.number_rules("maximum", |r| r.maximum = Some(n))
    }

    /// Minimum array length.
    #[must_use]
    pub fn min_items(mut self, n: usize) -> Self {
        if let SchemaKind::Array { min_items, .. } = &mut self.kind {
            *min_items = Some(n);
        } else {
            self.misuse.push("min_items applies to arrays only".into());
        }
        self
    }

    /// Maximum array length.
    #[must_use]
    pub fn max_items(mut self, n: usize) -> Self {
        if let SchemaKind::Array { max_items, .. } = &mut self.kind {
            *max_items = Some(n);
        } else {
            self.misuse.push("max_items applies to arrays only".into());
        }
        self
    }

    fn property(mut self, name: &str, schema: SchemaDescriptor, required: bool) -> Self {
        if let SchemaKind::Object { properties, .. } = &mut self.kind {
            properties.push(Property {
                name: name.to_owned(),
                schema,
                required,
            });
        } else {
            self.misuse.push(format!("property '{name}' added to a non-object"));
        }
        self
    }

    /// Add a required property.
    #[must_use]
    pub fn field(self, name: &str, schema: SchemaDescriptor) -> Self {
        self.property(name, schema, true)
    }

    /// Add an optional property.
    #[must_use]
    pub fn optional(self, name: &str, schema: SchemaDescriptor) -> Self {
        self.property(name, schema, false)
    }

    /// Reject properties that were not declared.
    #[must_use]
    pub fn strict(mut self) -> Self {
        if let SchemaKind::Object { allow_unknown, .. } = &mut self.kind {
            *allow_unknown = false;
        } else {
            self.misuse.push("strict applies to objects only".into());
        }
        self
    }
}
