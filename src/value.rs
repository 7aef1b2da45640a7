//! Type-erased values moved through the engine.

use std::any::{type_name, Any, TypeId};
use std::fmt;

use crate::variant::{MappingSelector, MappingVariant};

/// Any value the engine can read, produce or assign
pub type Object = dyn Any + Send + Sync;

/// An owned type-erased value
pub type Value = Box<Object>;

/// Boxes a value for hand-off to the engine
pub fn value<T: Any + Send + Sync>(value: T) -> Value {
    Box::new(value)
}

/// Runtime type of an erased value (never the type of the box around it)
pub fn runtime_type(value: &Object) -> TypeId {
    let any: &dyn Any = value;
    any.type_id()
}

/// Identity of a Rust type plus a readable name for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an erased value is of exactly this type
    pub fn matches(&self, value: &Object) -> bool {
        runtime_type(value) == self.id
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A plain ordered sequence of raw elements returned by a transform
pub struct Sequence(Vec<Value>);

impl Sequence {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Boxes every item of a typed collection
    pub fn of<T, I>(items: I) -> Self
    where
        T: Any + Send + Sync,
        I: IntoIterator<Item = T>,
    {
        Self(items.into_iter().map(value).collect())
    }

    pub fn push<T: Any + Send + Sync>(&mut self, item: T) {
        self.0.push(value(item));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_elements(self) -> Vec<Value> {
        self.0
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Sequence {
    fn from(elements: Vec<Value>) -> Self {
        Self(elements)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence").field("len", &self.0.len()).finish()
    }
}

/// Wraps a source (or a nested value) with a variant and/or mapping name that
/// take precedence over the selector the engine would otherwise use for it.
pub struct Override {
    variant: Option<MappingVariant>,
    name: Option<String>,
    inner: Value,
}

impl Override {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self::from_value(value(inner))
    }

    pub fn from_value(inner: Value) -> Self {
        Self {
            variant: None,
            name: None,
            inner,
        }
    }

    pub fn with_variant(mut self, variant: MappingVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn variant(&self) -> Option<MappingVariant> {
        self.variant
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn inner(&self) -> &Object {
        &*self.inner
    }

    /// Applies the embedded overrides on top of `fallback`
    pub fn selector(&self, fallback: &MappingSelector) -> MappingSelector {
        MappingSelector {
            variant: self.variant.unwrap_or(fallback.variant),
            name: self.name.clone().unwrap_or_else(|| fallback.name.clone()),
        }
    }

    pub fn into_parts(self) -> (Option<MappingVariant>, Option<String>, Value) {
        (self.variant, self.name, self.inner)
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Override")
            .field("variant", &self.variant)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
