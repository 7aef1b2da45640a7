use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::descriptor::TypeDescriptor;
use crate::transform_set::TransformSet;
use crate::value::{Object, TypeInfo};
use crate::variant::MappingVariant;

static PROPERTY_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid property path pattern"));

/// Lookup surface the engine consumes
pub trait MappingRegistry: Send + Sync {
    /// Finds the transform set for `(target, variant, source, name)`
    fn resolve(
        &self,
        target: TypeId,
        variant: MappingVariant,
        source: TypeId,
        name: &str,
    ) -> Result<&TransformSet, RegistryError>;

    /// Whether any transform set produces `target`
    fn has_transform_set(&self, target: TypeId) -> bool;

    fn hook_holder(&self, target: TypeId) -> Option<&HookHolder>;

    fn descriptor(&self, ty: TypeId) -> Option<&TypeDescriptor>;

    /// Readable name for diagnostics, when the type is known to the registry
    fn type_name(&self, _ty: TypeId) -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("No transform set maps {source_type} to {target} ({variant}, name '{name}')")]
    NoTransformSet {
        target: String,
        source_type: String,
        variant: MappingVariant,
        name: String,
    },

    #[error("Duplicate transform set for {target} from {source_type} ({variant}, name '{name}')")]
    DuplicateTransformSet {
        target: &'static str,
        source_type: &'static str,
        variant: MappingVariant,
        name: String,
    },

    #[error("Type {0} is described more than once")]
    DuplicateDescriptor(&'static str),

    #[error("Invalid property path '{path}' in transform set for {target}")]
    InvalidPropertyPath { target: &'static str, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransformKey {
    target: TypeId,
    variant: MappingVariant,
    source: TypeId,
    name: String,
}

/// Failures reported by a post-processor
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("post-processor '{hook}' expects ({expected_target}, {expected_source})")]
    ParameterMismatch {
        hook: String,
        expected_target: &'static str,
        expected_source: &'static str,
    },

    #[error("post-processor panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed(message.into())
    }
}

type HookFn = Arc<dyn Fn(&mut Object, &Object) -> Result<(), HookError> + Send + Sync>;

/// A named callback run on a freshly mapped target
#[derive(Clone)]
pub struct PostProcessor {
    name: String,
    target: TypeInfo,
    source: TypeInfo,
    run: HookFn,
}

impl PostProcessor {
    pub fn new<T, S, F>(name: impl Into<String>, hook: F) -> Self
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
        F: Fn(&mut T, &S) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let run: HookFn = Arc::new(move |target: &mut Object, source: &Object| {
            match (target.downcast_mut::<T>(), source.downcast_ref::<S>()) {
                (Some(target), Some(source)) => hook(target, source),
                _ => Err(HookError::ParameterMismatch {
                    hook: label.clone(),
                    expected_target: type_name::<T>(),
                    expected_source: type_name::<S>(),
                }),
            }
        });

        Self {
            name,
            target: TypeInfo::of::<T>(),
            source: TypeInfo::of::<S>(),
            run,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> TypeInfo {
        self.target
    }

    pub fn source(&self) -> TypeInfo {
        self.source
    }

    /// Whether the declared parameters are exactly `(target, source)`
    pub fn accepts(&self, target: TypeId, source: TypeId) -> bool {
        self.target.id() == target && self.source.id() == source
    }

    pub fn invoke(&self, target: &mut Object, source: &Object) -> Result<(), HookError> {
        (self.run)(target, source)
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessor")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .field("source", &self.source.name())
            .finish()
    }
}

/// Post-processors registered for one target type, in registration order
#[derive(Debug, Clone)]
pub struct HookHolder {
    target: TypeInfo,
    hooks: Vec<PostProcessor>,
}

impl HookHolder {
    fn new(target: TypeInfo) -> Self {
        Self {
            target,
            hooks: Vec::new(),
        }
    }

    pub fn target(&self) -> TypeInfo {
        self.target
    }

    pub fn hooks(&self) -> &[PostProcessor] {
        &self.hooks
    }

    pub fn matching(&self, target: TypeId, source: TypeId) -> impl Iterator<Item = &PostProcessor> {
        self.hooks.iter().filter(move |hook| hook.accepts(target, source))
    }
}

/// Immutable registry of descriptors, transform sets and post-processors
pub struct Registry {
    descriptors: HashMap<TypeId, TypeDescriptor>,
    transform_sets: HashMap<TransformKey, (TypeInfo, TransformSet)>,
    targets: HashSet<TypeId>,
    hooks: HashMap<TypeId, HookHolder>,
    names: HashMap<TypeId, &'static str>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn descriptor_of<T: Any>(&self) -> Option<&TypeDescriptor> {
        self.descriptors.get(&TypeId::of::<T>())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.descriptors.values()
    }

    /// Every registered transform set with its target type
    pub fn transform_sets(&self) -> impl Iterator<Item = (TypeInfo, &TransformSet)> {
        self.transform_sets.values().map(|(target, set)| (*target, set))
    }

    pub fn hook_holders(&self) -> impl Iterator<Item = &HookHolder> {
        self.hooks.values()
    }

    fn lookup(&self, target: TypeId, variant: MappingVariant, source: TypeId, name: &str) -> Option<&TransformSet> {
        let key = TransformKey {
            target,
            variant,
            source,
            name: name.to_string(),
        };
        self.transform_sets.get(&key).map(|(_, set)| set)
    }

    fn describe_type(&self, ty: TypeId) -> String {
        self.type_name(ty).unwrap_or("<unregistered type>").to_string()
    }
}

impl MappingRegistry for Registry {
    fn resolve(
        &self,
        target: TypeId,
        variant: MappingVariant,
        source: TypeId,
        name: &str,
    ) -> Result<&TransformSet, RegistryError> {
        // Implicit nested mappings also accept an explicitly registered set
        let fallbacks: &[MappingVariant] = match variant {
            MappingVariant::Min => &[MappingVariant::Min, MappingVariant::Full, MappingVariant::FullAuto],
            MappingVariant::Full => &[MappingVariant::Full],
            MappingVariant::FullAuto => &[MappingVariant::FullAuto],
        };

        fallbacks
            .iter()
            .find_map(|candidate| self.lookup(target, *candidate, source, name))
            .ok_or_else(|| RegistryError::NoTransformSet {
                target: self.describe_type(target),
                source_type: self.describe_type(source),
                variant,
                name: name.to_string(),
            })
    }

    fn has_transform_set(&self, target: TypeId) -> bool {
        self.targets.contains(&target)
    }

    fn hook_holder(&self, target: TypeId) -> Option<&HookHolder> {
        self.hooks.get(&target)
    }

    fn descriptor(&self, ty: TypeId) -> Option<&TypeDescriptor> {
        self.descriptors.get(&ty)
    }

    fn type_name(&self, ty: TypeId) -> Option<&'static str> {
        self.names.get(&ty).copied()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("descriptors", &self.descriptors.len())
            .field("transform_sets", &self.transform_sets.len())
            .field("hook_holders", &self.hooks.len())
            .finish()
    }
}

/// Collects registrations; `build` validates them and freezes the registry
#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<TypeDescriptor>,
    transform_sets: Vec<(TypeInfo, TransformSet)>,
    hooks: Vec<PostProcessor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the capability table of a type
    pub fn describe(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Add a transform set producing `T`
    pub fn register<T: Any>(mut self, set: TransformSet) -> Self {
        self.transform_sets.push((TypeInfo::of::<T>(), set));
        self
    }

    /// Add a post-processor run after mapping `S` into `T`
    pub fn post_processor<T, S, F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
        F: Fn(&mut T, &S) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.push(PostProcessor::new::<T, S, F>(name, hook));
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut names = HashMap::new();

        let mut descriptors = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            let ty = descriptor.type_info();
            if descriptors.contains_key(&ty.id()) {
                return Err(RegistryError::DuplicateDescriptor(ty.name()));
            }
            names.insert(ty.id(), ty.name());
            descriptors.insert(ty.id(), descriptor);
        }

        let mut transform_sets = HashMap::with_capacity(self.transform_sets.len());
        let mut targets = HashSet::new();
        for (target, set) in self.transform_sets {
            if let Some(path) = set.paths().find(|path| !PROPERTY_PATH.is_match(path)) {
                return Err(RegistryError::InvalidPropertyPath {
                    target: target.name(),
                    path: path.to_string(),
                });
            }

            let key = TransformKey {
                target: target.id(),
                variant: set.variant(),
                source: set.source().id(),
                name: set.name().to_string(),
            };
            if transform_sets.contains_key(&key) {
                return Err(RegistryError::DuplicateTransformSet {
                    target: target.name(),
                    source_type: set.source().name(),
                    variant: set.variant(),
                    name: set.name().to_string(),
                });
            }

            names.insert(target.id(), target.name());
            names.insert(set.source().id(), set.source().name());
            targets.insert(target.id());
            transform_sets.insert(key, (target, set));
        }

        let mut hooks: HashMap<TypeId, HookHolder> = HashMap::new();
        for hook in self.hooks {
            names.insert(hook.target().id(), hook.target().name());
            hooks
                .entry(hook.target().id())
                .or_insert_with(|| HookHolder::new(hook.target()))
                .hooks
                .push(hook);
        }

        debug!(
            descriptors = descriptors.len(),
            transform_sets = transform_sets.len(),
            hook_holders = hooks.len(),
            "mapping registry built"
        );

        Ok(Registry {
            descriptors,
            transform_sets,
            targets,
            hooks,
            names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value;

    #[derive(Debug, Default)]
    struct Ticket {
        code: String,
        seen: bool,
    }

    struct RawTicket {
        code: String,
    }

    fn ticket_descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Ticket>()
            .field("code", |t: &Ticket| t.code.clone(), |t, v| t.code = v)
            .field("seen", |t: &Ticket| t.seen, |t, v| t.seen = v)
            .build()
    }

    fn ticket_set(variant: MappingVariant) -> TransformSet {
        TransformSet::builder::<RawTicket>(variant)
            .value("code", |r| r.code.clone())
            .build()
    }

    #[test]
    fn test_resolve_exact_key() {
        let registry = RegistryBuilder::new()
            .describe(ticket_descriptor())
            .register::<Ticket>(ticket_set(MappingVariant::Full))
            .register::<Ticket>(ticket_set(MappingVariant::FullAuto))
            .build()
            .unwrap();

        let set = registry
            .resolve(TypeId::of::<Ticket>(), MappingVariant::FullAuto, TypeId::of::<RawTicket>(), "")
            .unwrap();
        assert_eq!(set.variant(), MappingVariant::FullAuto);
        assert!(registry.has_transform_set(TypeId::of::<Ticket>()));
        assert!(!registry.has_transform_set(TypeId::of::<RawTicket>()));
    }

    #[test]
    fn test_min_falls_back_to_full() {
        let registry = RegistryBuilder::new()
            .register::<Ticket>(ticket_set(MappingVariant::Full))
            .build()
            .unwrap();

        let set = registry
            .resolve(TypeId::of::<Ticket>(), MappingVariant::Min, TypeId::of::<RawTicket>(), "")
            .unwrap();
        assert_eq!(set.variant(), MappingVariant::Full);
    }

    #[test]
    fn test_full_does_not_fall_back() {
        let registry = RegistryBuilder::new()
            .register::<Ticket>(ticket_set(MappingVariant::Min))
            .build()
            .unwrap();

        let err = registry
            .resolve(TypeId::of::<Ticket>(), MappingVariant::Full, TypeId::of::<RawTicket>(), "")
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoTransformSet { .. }));
    }

    #[test]
    fn test_resolve_respects_mapping_name() {
        let registry = RegistryBuilder::new()
            .register::<Ticket>(ticket_set(MappingVariant::Full))
            .build()
            .unwrap();

        let err = registry
            .resolve(TypeId::of::<Ticket>(), MappingVariant::Full, TypeId::of::<RawTicket>(), "alt")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("RawTicket"));
        assert!(message.contains("'alt'"));
    }

    #[test]
    fn test_duplicate_transform_set_rejected() {
        let result = RegistryBuilder::new()
            .register::<Ticket>(ticket_set(MappingVariant::Full))
            .register::<Ticket>(ticket_set(MappingVariant::Full))
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateTransformSet { .. })));
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let result = RegistryBuilder::new()
            .describe(ticket_descriptor())
            .describe(ticket_descriptor())
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateDescriptor(_))));
    }

    #[test]
    fn test_invalid_path_rejected() {
        let set = TransformSet::builder::<RawTicket>(MappingVariant::Full)
            .value("code..x", |r| r.code.clone())
            .build();
        let result = RegistryBuilder::new().register::<Ticket>(set).build();
        assert!(matches!(result, Err(RegistryError::InvalidPropertyPath { .. })));
    }

    #[test]
    fn test_hooks_kept_in_order_and_filtered_by_source() {
        let registry = RegistryBuilder::new()
            .post_processor::<Ticket, RawTicket, _>("first", |t, _| {
                t.seen = true;
                Ok(())
            })
            .post_processor::<Ticket, String, _>("other_source", |_, _| Ok(()))
            .post_processor::<Ticket, RawTicket, _>("second", |_, _| Ok(()))
            .build()
            .unwrap();

        let holder = registry.hook_holder(TypeId::of::<Ticket>()).unwrap();
        assert_eq!(holder.hooks().len(), 3);

        let names: Vec<_> = holder
            .matching(TypeId::of::<Ticket>(), TypeId::of::<RawTicket>())
            .map(|hook| hook.name())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_hook_invoke_checks_parameters() {
        let hook = PostProcessor::new::<Ticket, RawTicket, _>("mark", |t, _| {
            t.seen = true;
            Ok(())
        });

        let mut ticket = Ticket::default();
        let raw = RawTicket { code: "A".to_string() };
        hook.invoke(&mut ticket, &raw).unwrap();
        assert!(ticket.seen);

        let wrong = value(7u8);
        let err = hook.invoke(&mut ticket, &*wrong).unwrap_err();
        assert!(matches!(err, HookError::ParameterMismatch { .. }));
    }
}
