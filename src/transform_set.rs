use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use crate::value::{value, Object, Sequence, TypeInfo, Value};
use crate::variant::{MappingVariant, DEFAULT_MAPPING_NAME};

/// Erased per-property transform: source in, raw value (or nothing) out
pub type TransformFn = Arc<dyn Fn(&Object) -> Result<Option<Value>, TransformError> + Send + Sync>;

/// Failures a transform function can report
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// A value on the way to the result was missing; treated as "no value"
    #[error("value absent")]
    Absent,

    #[error("transform failed: {0}")]
    Failed(String),

    #[error("transform expected source {expected}")]
    SourceType { expected: &'static str },

    #[error("transform panicked: {0}")]
    Panicked(String),
}

impl TransformError {
    pub fn failed(message: impl Into<String>) -> Self {
        TransformError::Failed(message.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, TransformError::Absent)
    }
}

/// Turns a missing link in a property chain into [`TransformError::Absent`]
pub trait OrAbsent<T> {
    fn or_absent(self) -> Result<T, TransformError>;
}

impl<T> OrAbsent<T> for Option<T> {
    fn or_absent(self) -> Result<T, TransformError> {
        self.ok_or(TransformError::Absent)
    }
}

/// Named bundle of per-property transform functions for one source type
#[derive(Clone)]
pub struct TransformSet {
    source: TypeInfo,
    variant: MappingVariant,
    name: String,
    parallel: bool,
    transforms: BTreeMap<String, TransformFn>,
}

impl TransformSet {
    /// Starts a set that reads from `S`, applied with `variant`
    pub fn builder<S: Any + Send + Sync>(variant: MappingVariant) -> TransformSetBuilder<S> {
        TransformSetBuilder {
            variant,
            name: DEFAULT_MAPPING_NAME.to_string(),
            parallel: false,
            transforms: BTreeMap::new(),
            _source: PhantomData,
        }
    }

    pub fn source(&self) -> TypeInfo {
        self.source
    }

    pub fn variant(&self) -> MappingVariant {
        self.variant
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&TransformFn> {
        self.transforms.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TransformFn)> {
        self.transforms.iter().map(|(path, transform)| (path.as_str(), transform))
    }
}

impl fmt::Debug for TransformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformSet")
            .field("source", &self.source.name())
            .field("variant", &self.variant)
            .field("name", &self.name)
            .field("parallel", &self.parallel)
            .field("paths", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct TransformSetBuilder<S> {
    variant: MappingVariant,
    name: String,
    parallel: bool,
    transforms: BTreeMap<String, TransformFn>,
    _source: PhantomData<fn(&S)>,
}

impl<S: Any + Send + Sync> TransformSetBuilder<S> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Evaluate the properties of this set concurrently
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Registers a raw transform. A later entry for the same path replaces the earlier one.
    pub fn property<F>(mut self, path: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&S) -> Result<Option<Value>, TransformError> + Send + Sync + 'static,
    {
        let erased: TransformFn = Arc::new(move |source: &Object| match source.downcast_ref::<S>() {
            Some(source) => transform(source),
            None => Err(TransformError::SourceType {
                expected: type_name::<S>(),
            }),
        });
        self.transforms.insert(path.into(), erased);
        self
    }

    /// Registers a transform that always yields a value.
    ///
    /// On a collection property the value must be of the declared container
    /// type (e.g. `Vec<LineItem>` for a `list` of `LineItem`). Any other
    /// collection, such as a `Vec` of source rows, is rejected as
    /// `NotACollection`; hand those over with [`sequence`](Self::sequence).
    pub fn value<V, F>(self, path: impl Into<String>, transform: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&S) -> V + Send + Sync + 'static,
    {
        self.property(path, move |source| Ok(Some(value(transform(source)))))
    }

    pub fn optional<V, F>(self, path: impl Into<String>, transform: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&S) -> Option<V> + Send + Sync + 'static,
    {
        self.property(path, move |source| Ok(transform(source).map(value)))
    }

    pub fn try_value<V, F>(self, path: impl Into<String>, transform: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&S) -> Result<V, TransformError> + Send + Sync + 'static,
    {
        self.property(path, move |source| transform(source).map(|v| Some(value(v))))
    }

    /// Registers a transform producing a collection, handed over as a [`Sequence`].
    ///
    /// This is the way to fill a collection property from elements of another
    /// type: `.sequence("items", |s| s.raw_items.clone())` maps every element
    /// that is not already a declared element.
    pub fn sequence<E, I, F>(self, path: impl Into<String>, transform: F) -> Self
    where
        E: Any + Send + Sync,
        I: IntoIterator<Item = E>,
        F: Fn(&S) -> I + Send + Sync + 'static,
    {
        self.property(path, move |source| Ok(Some(value(Sequence::of(transform(source))))))
    }

    pub fn build(self) -> TransformSet {
        TransformSet {
            source: TypeInfo::of::<S>(),
            variant: self.variant,
            name: self.name,
            parallel: self.parallel,
            transforms: self.transforms,
        }
    }
}
