//! Per-type capability tables: how to construct a type and how to read,
//! write and traverse its named properties without runtime reflection.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::engine::MappingError;
use crate::registry::MappingRegistry;
use crate::transform_set::TransformError;
use crate::value::{value, Object, TypeInfo, Value};

type Constructor = Arc<dyn Fn() -> Result<Value, String> + Send + Sync>;
type Reader = Arc<dyn Fn(&Object) -> Option<Value> + Send + Sync>;
type Writer = Arc<dyn Fn(&mut Object, Option<Value>) -> Result<(), PropertyError> + Send + Sync>;
type Sink = Arc<dyn Fn(&mut Object, Option<Vec<Value>>) -> Result<(), PropertyError> + Send + Sync>;
type Explode = Arc<dyn Fn(Value) -> Result<Vec<Value>, Value> + Send + Sync>;
type Traverse = Arc<dyn for<'a> Fn(&'a mut Object) -> Option<&'a mut Object> + Send + Sync>;

/// Failures confined to a single property of a single mapping
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyError {
    #[error("{target} has no property '{property}'")]
    UnknownProperty { target: &'static str, property: String },

    #[error("cannot traverse '{segment}' of '{path}'")]
    BrokenPath { path: String, segment: String },

    #[error("property '{property}' is not writable")]
    ReadOnly { property: String },

    #[error("transform for '{property}' failed: {source}")]
    Transform {
        property: String,
        #[serde(serialize_with = "serialize_display")]
        source: TransformError,
    },

    #[error("property '{property}' expects {expected}")]
    TypeMismatch { property: String, expected: &'static str },

    #[error("property '{property}' cannot be left absent")]
    AbsentValue { property: String },

    #[error("property '{property}' is owned by {expected}")]
    WrongOwner { property: String, expected: &'static str },

    #[error("collection property '{property}' declares no element type")]
    UnparameterizedContainer { property: String },

    #[error("collection property '{property}' has unsupported kind {container}")]
    UnsupportedContainer { property: String, container: String },

    #[error("value for collection property '{property}' is not a collection")]
    NotACollection { property: String },

    #[error("element {index} of '{property}' expects {expected}")]
    ElementTypeMismatch {
        property: String,
        index: usize,
        expected: &'static str,
    },

    #[error("element {index} of '{property}' could not be mapped and was dropped")]
    ElementUnmapped { property: String, index: usize },

    #[error("nested mapping for '{property}' failed: {reason}")]
    Nested { property: String, reason: String },

    #[error("post-processor '{hook}' failed and was skipped: {reason}")]
    HookSkipped { hook: String, reason: String },
}

fn serialize_display<S: serde::Serializer, T: fmt::Display>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Concrete container family a collection property is declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Ordered, keeps duplicates
    List,
    /// Deduplicating
    Set,
    /// Neither; the engine cannot populate it
    Other(&'static str),
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::List => f.write_str("list"),
            ContainerKind::Set => f.write_str("set"),
            ContainerKind::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyShape {
    Scalar { optional: bool },
    Container {
        kind: ContainerKind,
        element: Option<TypeInfo>,
    },
}

/// One named, typed property of a described type
#[derive(Clone)]
pub struct Property {
    name: String,
    declared: TypeInfo,
    shape: PropertyShape,
    reader: Option<Reader>,
    writer: Option<Writer>,
    sink: Option<Sink>,
    explode: Option<Explode>,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full declared type (the container type for collections)
    pub fn declared(&self) -> TypeInfo {
        self.declared
    }

    pub fn shape(&self) -> PropertyShape {
        self.shape
    }

    pub fn is_container(&self) -> bool {
        matches!(self.shape, PropertyShape::Container { .. })
    }

    pub fn is_readable(&self) -> bool {
        self.reader.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Reads a copy of the property, `None` when unset or write-only
    pub fn read(&self, owner: &Object) -> Option<Value> {
        self.reader.as_ref().and_then(|reader| reader(owner))
    }

    /// Assigns a value of the declared type (or clears an optional property)
    pub fn write(&self, owner: &mut Object, value: Option<Value>) -> Result<(), PropertyError> {
        match &self.writer {
            Some(writer) => writer(owner, value),
            None => Err(PropertyError::ReadOnly {
                property: self.name.clone(),
            }),
        }
    }

    /// Builds a fresh declared container from `elements` and assigns it
    pub fn collect(&self, owner: &mut Object, elements: Option<Vec<Value>>) -> Result<(), PropertyError> {
        match &self.sink {
            Some(sink) => sink(owner, elements),
            None if elements.is_none() => self.write(owner, None),
            None => Err(PropertyError::NotACollection {
                property: self.name.clone(),
            }),
        }
    }

    /// Splits a value of the declared container type into its elements
    pub fn explode(&self, raw: Value) -> Result<Vec<Value>, Value> {
        match &self.explode {
            Some(explode) => explode(raw),
            None => Err(raw),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("declared", &self.declared.name())
            .field("shape", &self.shape)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// Accessor into a nested object, used for dotted property paths
#[derive(Clone)]
pub struct Nested {
    ty: TypeInfo,
    access: Traverse,
}

impl Nested {
    pub fn type_info(&self) -> TypeInfo {
        self.ty
    }

    pub fn access<'a>(&self, owner: &'a mut Object) -> Option<&'a mut Object> {
        (self.access)(owner)
    }
}

pub struct TypeDescriptor {
    ty: TypeInfo,
    constructor: Option<Constructor>,
    properties: BTreeMap<String, Property>,
    nested: BTreeMap<String, Nested>,
}

impl TypeDescriptor {
    /// Describes `T` without a constructor (usable as a source only)
    pub fn builder<T: Any + Send + Sync>() -> DescriptorBuilder<T> {
        DescriptorBuilder {
            constructor: None,
            properties: BTreeMap::new(),
            nested: BTreeMap::new(),
            _type: PhantomData,
        }
    }

    /// Describes `T`, instantiated through `Default`
    pub fn of<T: Any + Send + Sync + Default>() -> DescriptorBuilder<T> {
        Self::builder::<T>().default_constructor()
    }

    pub fn type_info(&self) -> TypeInfo {
        self.ty
    }

    pub fn is_instantiable(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn instantiate(&self) -> Result<Value, MappingError> {
        let constructor = self.constructor.as_ref().ok_or(MappingError::Instantiation {
            target: self.ty.name(),
            reason: "no constructor registered".to_string(),
        })?;

        constructor().map_err(|reason| MappingError::Instantiation {
            target: self.ty.name(),
            reason,
        })
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn nested(&self, name: &str) -> Option<&Nested> {
        self.nested.get(name)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.ty.name())
            .field("instantiable", &self.is_instantiable())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("nested", &self.nested.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Pins the higher-ranked signature a traversal closure needs.
fn traversal<F>(access: F) -> F
where
    F: for<'a> Fn(&'a mut Object) -> Option<&'a mut Object>,
{
    access
}

fn owner_mut<'a, T: Any>(owner: &'a mut Object, property: &str) -> Result<&'a mut T, PropertyError> {
    owner.downcast_mut::<T>().ok_or_else(|| PropertyError::WrongOwner {
        property: property.to_string(),
        expected: type_name::<T>(),
    })
}

fn downcast_value<V: Any>(raw: Value, property: &str) -> Result<V, PropertyError> {
    raw.downcast::<V>().map(|boxed| *boxed).map_err(|_| PropertyError::TypeMismatch {
        property: property.to_string(),
        expected: type_name::<V>(),
    })
}

pub struct DescriptorBuilder<T> {
    constructor: Option<Constructor>,
    properties: BTreeMap<String, Property>,
    nested: BTreeMap<String, Nested>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> DescriptorBuilder<T> {
    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.constructor(|| Ok(T::default()))
    }

    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Result<T, String> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move || constructor().map(value)));
        self
    }

    /// A required property: reading always yields a value, writing absent fails
    pub fn field<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Any + Send + Sync,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let property = name.to_string();
        let writer: Writer = Arc::new(move |owner: &mut Object, raw: Option<Value>| {
            let raw = raw.ok_or_else(|| PropertyError::AbsentValue {
                property: property.clone(),
            })?;
            let v = downcast_value::<V>(raw, &property)?;
            set(owner_mut::<T>(owner, &property)?, v);
            Ok(())
        });
        let reader: Reader = Arc::new(move |owner: &Object| owner.downcast_ref::<T>().map(|t| value(get(t))));

        self.insert(name, TypeInfo::of::<V>(), PropertyShape::Scalar { optional: false }, Some(reader), Some(writer))
    }

    pub fn optional<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Any + Send + Sync,
        G: Fn(&T) -> Option<V> + Send + Sync + 'static,
        S: Fn(&mut T, Option<V>) + Send + Sync + 'static,
    {
        let property = name.to_string();
        let writer: Writer = Arc::new(move |owner: &mut Object, raw: Option<Value>| {
            let v = raw.map(|raw| downcast_value::<V>(raw, &property)).transpose()?;
            set(owner_mut::<T>(owner, &property)?, v);
            Ok(())
        });
        let reader: Reader = Arc::new(move |owner: &Object| owner.downcast_ref::<T>().and_then(|t| get(t)).map(value));

        self.insert(name, TypeInfo::of::<V>(), PropertyShape::Scalar { optional: true }, Some(reader), Some(writer))
    }

    /// A property that can be read but never assigned
    pub fn readable<V, G>(self, name: &str, get: G) -> Self
    where
        V: Any + Send + Sync,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        let reader: Reader = Arc::new(move |owner: &Object| owner.downcast_ref::<T>().map(|t| value(get(t))));
        self.insert(name, TypeInfo::of::<V>(), PropertyShape::Scalar { optional: false }, Some(reader), None)
    }

    pub fn list<E, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        E: Any + Send + Sync,
        G: Fn(&T) -> Option<Vec<E>> + Send + Sync + 'static,
        S: Fn(&mut T, Option<Vec<E>>) + Send + Sync + 'static,
    {
        self.collection::<Vec<E>, E, G, S>(name, ContainerKind::List, get, set)
    }

    /// A deduplicating collection (`HashSet`, `BTreeSet`, ...)
    pub fn set<C, E, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        C: IntoIterator<Item = E> + FromIterator<E> + Any + Send + Sync,
        E: Any + Send + Sync,
        G: Fn(&T) -> Option<C> + Send + Sync + 'static,
        S: Fn(&mut T, Option<C>) + Send + Sync + 'static,
    {
        self.collection::<C, E, G, S>(name, ContainerKind::Set, get, set)
    }

    pub fn collection<C, E, G, S>(self, name: &str, kind: ContainerKind, get: G, set: S) -> Self
    where
        C: IntoIterator<Item = E> + FromIterator<E> + Any + Send + Sync,
        E: Any + Send + Sync,
        G: Fn(&T) -> Option<C> + Send + Sync + 'static,
        S: Fn(&mut T, Option<C>) + Send + Sync + 'static,
    {
        let set = Arc::new(set);
        let property = name.to_string();

        let assign = Arc::clone(&set);
        let whole = property.clone();
        let writer: Writer = Arc::new(move |owner: &mut Object, raw: Option<Value>| {
            let container = raw.map(|raw| downcast_value::<C>(raw, &whole)).transpose()?;
            assign(owner_mut::<T>(owner, &whole)?, container);
            Ok(())
        });

        let sink: Sink = Arc::new(move |owner: &mut Object, elements: Option<Vec<Value>>| {
            let container = match elements {
                None => None,
                Some(elements) => Some(
                    elements
                        .into_iter()
                        .enumerate()
                        .map(|(index, element)| {
                            element.downcast::<E>().map(|boxed| *boxed).map_err(|_| PropertyError::ElementTypeMismatch {
                                property: property.clone(),
                                index,
                                expected: type_name::<E>(),
                            })
                        })
                        .collect::<Result<C, _>>()?,
                ),
            };
            set(owner_mut::<T>(owner, &property)?, container);
            Ok(())
        });

        let explode: Explode = Arc::new(|raw: Value| {
            raw.downcast::<C>()
                .map(|container| (*container).into_iter().map(value).collect())
        });

        let reader: Reader = Arc::new(move |owner: &Object| owner.downcast_ref::<T>().and_then(|t| get(t)).map(value));

        let mut builder = self.insert(
            name,
            TypeInfo::of::<C>(),
            PropertyShape::Container {
                kind,
                element: Some(TypeInfo::of::<E>()),
            },
            Some(reader),
            Some(writer),
        );
        if let Some(entry) = builder.properties.get_mut(name) {
            entry.sink = Some(sink);
            entry.explode = Some(explode);
        }
        builder
    }

    /// A collection whose element type is not declared; it can be copied as a
    /// whole but the engine cannot populate it from transformed elements
    pub fn untyped_collection<C, G, S>(self, name: &str, kind: ContainerKind, get: G, set: S) -> Self
    where
        C: Any + Send + Sync,
        G: Fn(&T) -> Option<C> + Send + Sync + 'static,
        S: Fn(&mut T, Option<C>) + Send + Sync + 'static,
    {
        let property = name.to_string();
        let writer: Writer = Arc::new(move |owner: &mut Object, raw: Option<Value>| {
            let container = raw.map(|raw| downcast_value::<C>(raw, &property)).transpose()?;
            set(owner_mut::<T>(owner, &property)?, container);
            Ok(())
        });
        let reader: Reader = Arc::new(move |owner: &Object| owner.downcast_ref::<T>().and_then(|t| get(t)).map(value));

        self.insert(
            name,
            TypeInfo::of::<C>(),
            PropertyShape::Container { kind, element: None },
            Some(reader),
            Some(writer),
        )
    }

    /// Exposes a nested object so dotted paths can assign through it
    pub fn nested<N, A>(mut self, name: &str, access: A) -> Self
    where
        N: Any + Send + Sync,
        A: Fn(&mut T) -> &mut N + Send + Sync + 'static,
    {
        let hop: Traverse = Arc::new(traversal(move |owner| {
            owner.downcast_mut::<T>().map(|t| access(t) as &mut Object)
        }));
        self.nested.insert(
            name.to_string(),
            Nested {
                ty: TypeInfo::of::<N>(),
                access: hop,
            },
        );
        self
    }

    fn insert(
        mut self,
        name: &str,
        declared: TypeInfo,
        shape: PropertyShape,
        reader: Option<Reader>,
        writer: Option<Writer>,
    ) -> Self {
        self.properties.insert(
            name.to_string(),
            Property {
                name: name.to_string(),
                declared,
                shape,
                reader,
                writer,
                sink: None,
                explode: None,
            },
        );
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            ty: TypeInfo::of::<T>(),
            constructor: self.constructor,
            properties: self.properties,
            nested: self.nested,
        }
    }
}

/// A dotted path resolved against descriptors: the hops to walk, then the leaf
pub struct ResolvedPath<'r> {
    path: String,
    hops: Vec<(&'r str, &'r Nested)>,
    property: &'r Property,
}

impl<'r> ResolvedPath<'r> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn property(&self) -> &'r Property {
        self.property
    }

    /// Walks the hops from `root` and returns the object owning the leaf
    pub fn owner<'a>(&self, root: &'a mut Object) -> Result<&'a mut Object, PropertyError> {
        let mut current = root;
        for (segment, nested) in &self.hops {
            current = nested.access(current).ok_or_else(|| PropertyError::BrokenPath {
                path: self.path.clone(),
                segment: segment.to_string(),
            })?;
        }
        Ok(current)
    }
}

/// Resolves `path` starting at `root`, following nested descriptors for every
/// segment but the last
pub fn resolve_path<'r>(
    registry: &'r dyn MappingRegistry,
    root: &'r TypeDescriptor,
    path: &'r str,
) -> Result<ResolvedPath<'r>, PropertyError> {
    let mut segments: Vec<&'r str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);

    let mut descriptor = root;
    let mut hops = Vec::with_capacity(segments.len());
    for segment in segments {
        let broken = || PropertyError::BrokenPath {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        let nested = descriptor.nested(segment).ok_or_else(broken)?;
        descriptor = registry.descriptor(nested.type_info().id()).ok_or_else(broken)?;
        hops.push((segment, nested));
    }

    let property = descriptor.property(leaf).ok_or_else(|| PropertyError::UnknownProperty {
        target: descriptor.type_info().name(),
        property: path.to_string(),
    })?;

    Ok(ResolvedPath {
        path: path.to_string(),
        hops,
        property,
    })
}
