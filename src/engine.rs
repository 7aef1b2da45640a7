use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, HookFailurePolicy};
use crate::copier::TypeSafeCopier;
use crate::descriptor::{resolve_path, ContainerKind, Property, PropertyError, PropertyShape, ResolvedPath, TypeDescriptor};
use crate::pool::{PoolError, WorkerPool};
use crate::registry::{HookError, MappingRegistry, RegistryError};
use crate::transform_set::{TransformError, TransformFn, TransformSet};
use crate::value::{runtime_type, Object, Override, Sequence, TypeInfo, Value};
use crate::variant::MappingSelector;

/// Main mapping engine: resolves transform sets and populates fresh targets
pub struct DomainMapper {
    registry: Arc<dyn MappingRegistry>,
    pool: Arc<WorkerPool>,
    config: EngineConfig,
}

/// Failures that leave a mapping without a value
#[derive(Debug, Clone, Error)]
pub enum MappingError {
    #[error("No type descriptor registered for {target}")]
    NoDescriptor { target: &'static str },

    #[error("Failed to instantiate {target}: {reason}")]
    Instantiation { target: &'static str, reason: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Post-processor '{hook}' failed on {target}: {reason}")]
    PostProcessor {
        hook: String,
        target: &'static str,
        reason: String,
    },

    #[error("Mapping into {target} panicked: {reason}")]
    Panicked { target: &'static str, reason: String },
}

/// A per-property failure recorded while the rest of the mapping went on
#[derive(Debug, Clone, Serialize)]
pub struct MappingWarning {
    pub target_type: String,
    pub path: String,
    pub error: PropertyError,
}

impl MappingWarning {
    fn new(target_type: &str, path: &str, error: PropertyError) -> Self {
        Self {
            target_type: target_type.to_string(),
            path: path.to_string(),
            error,
        }
    }

    /// Re-roots a warning raised by a nested mapping under `prefix`
    fn nested_under(mut self, prefix: &str) -> Self {
        self.path = if self.path.is_empty() {
            prefix.to_string()
        } else {
            format!("{}.{}", prefix, self.path)
        };
        self
    }
}

/// Result of one mapping: the value (if any), every warning and the fatal error
#[derive(Debug)]
pub struct MappingOutcome<T> {
    pub value: Option<T>,
    pub warnings: Vec<MappingWarning>,
    pub error: Option<MappingError>,
}

impl<T> MappingOutcome<T> {
    pub fn absent() -> Self {
        Self {
            value: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn mapped(value: T, warnings: Vec<MappingWarning>) -> Self {
        Self {
            value: Some(value),
            warnings,
            error: None,
        }
    }

    pub fn failed(error: MappingError, warnings: Vec<MappingWarning>) -> Self {
        Self {
            value: None,
            warnings,
            error: Some(error),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MappingOutcome<U> {
        MappingOutcome {
            value: self.value.map(f),
            warnings: self.warnings,
            error: self.error,
        }
    }
}

impl MappingOutcome<Value> {
    /// Recovers the concrete target type of an erased outcome
    pub fn downcast<T: Any>(self) -> MappingOutcome<T> {
        MappingOutcome {
            value: self.value.and_then(|value| value.downcast::<T>().ok()).map(|boxed| *boxed),
            warnings: self.warnings,
            error: self.error,
        }
    }
}

enum Evaluated {
    Scalar(Option<Value>),
    Elements(Option<Vec<Value>>),
}

/// A transform entry with its target path resolved (or the reason it did not resolve)
type Entry<'r> = (&'r str, &'r TransformFn, Result<ResolvedPath<'r>, PropertyError>);

struct Evaluation {
    result: Result<Evaluated, PropertyError>,
    warnings: Vec<MappingWarning>,
}

impl DomainMapper {
    pub fn new(registry: Arc<dyn MappingRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    /// Uses the process-wide pool, sizing it from `config` if it is not running yet
    pub fn with_config(registry: Arc<dyn MappingRegistry>, config: EngineConfig) -> Self {
        let pool = match config.worker_threads {
            Some(threads) => match WorkerPool::init_global(threads) {
                Ok(pool) => pool,
                Err(PoolError::AlreadyInitialized) => {
                    warn!(threads, "global worker pool already running, configured size ignored");
                    WorkerPool::global()
                }
                Err(e) => {
                    warn!(error = %e, "invalid worker pool size, using default pool");
                    WorkerPool::global()
                }
            },
            None => WorkerPool::global(),
        };
        Self::with_pool(registry, config, pool)
    }

    pub fn with_pool(registry: Arc<dyn MappingRegistry>, config: EngineConfig, pool: Arc<WorkerPool>) -> Self {
        Self { registry, pool, config }
    }

    pub fn registry(&self) -> &dyn MappingRegistry {
        &*self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Maps `source` into a new `T` with the default selector (`FULL`, unnamed)
    pub fn map<T, S>(&self, source: Option<&S>) -> MappingOutcome<T>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
    {
        self.map_with(source, &MappingSelector::default())
    }

    pub fn map_with<T, S>(&self, source: Option<&S>, selector: &MappingSelector) -> MappingOutcome<T>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
    {
        self.map_erased(TypeInfo::of::<T>(), source.map(|s| s as &Object), selector)
            .downcast()
    }

    /// Maps an erased source into a new instance of `target`.
    ///
    /// An absent source yields an absent outcome without touching the registry.
    /// A source wrapped in [`Override`] supersedes `selector` with its own
    /// variant and name.
    pub fn map_erased(
        &self,
        target: TypeInfo,
        source: Option<&Object>,
        selector: &MappingSelector,
    ) -> MappingOutcome<Value> {
        match source {
            Some(source) => self.try_map(target, source, selector),
            None => MappingOutcome::absent(),
        }
    }

    /// Maps every source, one outcome per input in the same position
    pub fn map_many<T, S>(&self, sources: &[S]) -> Vec<MappingOutcome<T>>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
    {
        self.map_many_with(sources, &MappingSelector::default())
    }

    pub fn map_many_with<T, S>(&self, sources: &[S], selector: &MappingSelector) -> Vec<MappingOutcome<T>>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
    {
        let erased: Vec<Option<&Object>> = sources.iter().map(|s| Some(s as &Object)).collect();
        self.map_many_erased(TypeInfo::of::<T>(), &erased, selector)
            .into_iter()
            .map(MappingOutcome::downcast)
            .collect()
    }

    /// Erased bulk form. An absent input yields an absent outcome in its slot.
    pub fn map_many_erased(
        &self,
        target: TypeInfo,
        sources: &[Option<&Object>],
        selector: &MappingSelector,
    ) -> Vec<MappingOutcome<Value>> {
        let fan_out = self.config.parallel_bulk && sources.len() >= self.config.bulk_parallel_threshold.max(1);

        if fan_out {
            self.pool
                .map_scoped(sources.to_vec(), |source| self.map_erased(target, source, selector))
        } else {
            sources
                .iter()
                .map(|&source| self.map_erased(target, source, selector))
                .collect()
        }
    }

    fn try_map(&self, target: TypeInfo, source: &Object, selector: &MappingSelector) -> MappingOutcome<Value> {
        let (source, selector) = match source.downcast_ref::<Override>() {
            Some(wrapped) => (wrapped.inner(), wrapped.selector(selector)),
            None => (source, selector.clone()),
        };

        let mut warnings = Vec::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.map_into(target, source, &selector, &mut warnings)))
            .unwrap_or_else(|payload| {
                Err(MappingError::Panicked {
                    target: target.name(),
                    reason: panic_message(payload.as_ref()),
                })
            });

        match result {
            Ok(value) => {
                debug!(
                    target_type = target.name(),
                    selector = %selector,
                    warnings = warnings.len(),
                    "mapping completed"
                );
                MappingOutcome::mapped(value, warnings)
            }
            Err(e) => {
                error!(
                    target_type = target.name(),
                    selector = %selector,
                    error = %e,
                    "mapping failed"
                );
                MappingOutcome::failed(e, warnings)
            }
        }
    }

    fn map_into(
        &self,
        target: TypeInfo,
        source: &Object,
        selector: &MappingSelector,
        warnings: &mut Vec<MappingWarning>,
    ) -> Result<Value, MappingError> {
        let registry = &*self.registry;
        let descriptor = registry
            .descriptor(target.id())
            .ok_or(MappingError::NoDescriptor { target: target.name() })?;
        let mut instance = descriptor.instantiate()?;

        let set = registry.resolve(target.id(), selector.variant, runtime_type(source), &selector.name)?;

        if set.variant().copies_properties() {
            let copied = TypeSafeCopier::copy(registry, descriptor, &mut *instance, source);
            debug!(target_type = target.name(), copied = copied.len(), "baseline properties copied");
        }

        self.apply_transforms(descriptor, set, &mut *instance, source, warnings);
        self.post_process(target, &mut *instance, source, warnings)?;
        Ok(instance)
    }

    fn apply_transforms(
        &self,
        descriptor: &TypeDescriptor,
        set: &TransformSet,
        instance: &mut Object,
        source: &Object,
        warnings: &mut Vec<MappingWarning>,
    ) {
        let target_name = descriptor.type_info().name();
        let pending: Vec<Entry<'_>> = set
            .iter()
            .map(|(path, transform)| (path, transform, resolve_path(&*self.registry, descriptor, path)))
            .collect();

        // Parallel sets only evaluate concurrently; every assignment happens here
        let evaluated: Vec<_> = if set.is_parallel() && pending.len() > 1 {
            self.pool
                .map_scoped(pending, |entry| self.evaluate_entry(target_name, source, entry))
        } else {
            pending
                .into_iter()
                .map(|entry| self.evaluate_entry(target_name, source, entry))
                .collect()
        };

        for (path, result) in evaluated {
            match result {
                Ok((resolved, evaluation)) => settle(target_name, &resolved, evaluation, instance, warnings),
                Err(e) => record(warnings, target_name, path, e),
            }
        }
    }

    fn evaluate_entry<'r>(
        &self,
        target_name: &'static str,
        source: &Object,
        (path, transform, resolved): Entry<'r>,
    ) -> (&'r str, Result<(ResolvedPath<'r>, Evaluation), PropertyError>) {
        let evaluated = resolved.map(|resolved| {
            let evaluation = self.evaluate(target_name, &resolved, transform, source);
            (resolved, evaluation)
        });
        (path, evaluated)
    }

    fn evaluate(
        &self,
        target_name: &'static str,
        resolved: &ResolvedPath<'_>,
        transform: &TransformFn,
        source: &Object,
    ) -> Evaluation {
        let mut warnings = Vec::new();
        let property = resolved.property();
        let result = if property.is_container() {
            self.evaluate_container(target_name, resolved.path(), property, transform, source, &mut warnings)
                .map(Evaluated::Elements)
        } else {
            self.evaluate_scalar(resolved.path(), property, transform, source, &mut warnings)
                .map(Evaluated::Scalar)
        };
        Evaluation { result, warnings }
    }

    fn evaluate_scalar(
        &self,
        path: &str,
        property: &Property,
        transform: &TransformFn,
        source: &Object,
        warnings: &mut Vec<MappingWarning>,
    ) -> Result<Option<Value>, PropertyError> {
        let Some(raw) = safely_evaluate(path, transform, source)? else {
            return Ok(None);
        };
        let (selector, raw) = unwrap_override(raw, MappingSelector::nested());

        let declared = property.declared();
        if declared.matches(&*raw) || !self.registry.has_transform_set(declared.id()) {
            return Ok(Some(raw));
        }

        let outcome = self.try_map(declared, &*raw, &selector);
        warnings.extend(outcome.warnings.into_iter().map(|w| w.nested_under(path)));
        match (outcome.value, outcome.error) {
            (Some(value), _) => Ok(Some(value)),
            (None, Some(e)) => Err(PropertyError::Nested {
                property: path.to_string(),
                reason: e.to_string(),
            }),
            (None, None) => Ok(None),
        }
    }

    fn evaluate_container(
        &self,
        target_name: &'static str,
        path: &str,
        property: &Property,
        transform: &TransformFn,
        source: &Object,
        warnings: &mut Vec<MappingWarning>,
    ) -> Result<Option<Vec<Value>>, PropertyError> {
        let PropertyShape::Container { kind, element } = property.shape() else {
            return Err(PropertyError::NotACollection {
                property: path.to_string(),
            });
        };
        let element = element.ok_or_else(|| PropertyError::UnparameterizedContainer {
            property: path.to_string(),
        })?;

        let Some(raw) = safely_evaluate(path, transform, source)? else {
            return Ok(None);
        };
        let (selector, raw) = unwrap_override(raw, MappingSelector::nested());

        let elements = match raw.downcast::<Sequence>() {
            Ok(sequence) => (*sequence).into_elements(),
            Err(raw) => property.explode(raw).map_err(|_| PropertyError::NotACollection {
                property: path.to_string(),
            })?,
        };
        if elements.is_empty() {
            return Ok(None);
        }
        if let ContainerKind::Other(kind) = kind {
            return Err(PropertyError::UnsupportedContainer {
                property: path.to_string(),
                container: kind.to_string(),
            });
        }
        if !self.registry.has_transform_set(element.id()) {
            return Ok(Some(elements));
        }

        // Decided per element: values already of the element type pass through
        let pending: Vec<usize> = elements
            .iter()
            .enumerate()
            .filter(|(_, candidate)| !element.matches(&***candidate))
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            return Ok(Some(elements));
        }

        let sources: Vec<Option<&Object>> = pending.iter().map(|&index| Some(&*elements[index])).collect();
        let outcomes = self.map_many_erased(element, &sources, &selector);

        let mut slots: Vec<Option<MappingOutcome<Value>>> = (0..elements.len()).map(|_| None).collect();
        for (index, outcome) in pending.into_iter().zip(outcomes) {
            slots[index] = Some(outcome);
        }

        let mut collected = Vec::with_capacity(elements.len());
        for (index, (original, slot)) in elements.into_iter().zip(slots).enumerate() {
            let Some(outcome) = slot else {
                collected.push(original);
                continue;
            };

            let at = format!("{}[{}]", path, index);
            warnings.extend(outcome.warnings.into_iter().map(|w| w.nested_under(&at)));
            match outcome.value {
                Some(mapped) => collected.push(mapped),
                None => {
                    if let Some(e) = &outcome.error {
                        debug!(target_type = target_name, property = %at, error = %e, "element mapping failed");
                    }
                    record(
                        warnings,
                        target_name,
                        &at,
                        PropertyError::ElementUnmapped {
                            property: path.to_string(),
                            index,
                        },
                    );
                }
            }
        }
        Ok(Some(collected))
    }

    fn post_process(
        &self,
        target: TypeInfo,
        instance: &mut Object,
        source: &Object,
        warnings: &mut Vec<MappingWarning>,
    ) -> Result<(), MappingError> {
        let Some(holder) = self.registry.hook_holder(target.id()) else {
            return Ok(());
        };

        for hook in holder.matching(target.id(), runtime_type(source)) {
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook.invoke(&mut *instance, source)))
                .unwrap_or_else(|payload| Err(HookError::Panicked(panic_message(payload.as_ref()))));

            let Err(e) = result else {
                continue;
            };
            match self.config.hook_failure {
                HookFailurePolicy::Abort => {
                    return Err(MappingError::PostProcessor {
                        hook: hook.name().to_string(),
                        target: target.name(),
                        reason: e.to_string(),
                    })
                }
                HookFailurePolicy::Skip => record(
                    warnings,
                    target.name(),
                    "",
                    PropertyError::HookSkipped {
                        hook: hook.name().to_string(),
                        reason: e.to_string(),
                    },
                ),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DomainMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainMapper")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn record(warnings: &mut Vec<MappingWarning>, target_type: &str, path: &str, error: PropertyError) {
    warn!(target_type, property = path, error = %error, "property not mapped");
    warnings.push(MappingWarning::new(target_type, path, error));
}

fn settle(
    target_name: &'static str,
    resolved: &ResolvedPath<'_>,
    evaluation: Evaluation,
    instance: &mut Object,
    warnings: &mut Vec<MappingWarning>,
) {
    warnings.extend(evaluation.warnings);

    let assigned = evaluation.result.and_then(|evaluated| {
        let owner = resolved.owner(instance)?;
        match evaluated {
            Evaluated::Scalar(value) => resolved.property().write(owner, value),
            Evaluated::Elements(elements) => resolved.property().collect(owner, elements),
        }
    });
    if let Err(e) = assigned {
        record(warnings, target_name, resolved.path(), e);
    }
}

/// Runs a transform, folding "value absent" into `None` and panics into errors
fn safely_evaluate(path: &str, transform: &TransformFn, source: &Object) -> Result<Option<Value>, PropertyError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| (**transform)(source)))
        .unwrap_or_else(|payload| Err(TransformError::Panicked(panic_message(payload.as_ref()))));

    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_absent() => Ok(None),
        Err(e) => Err(PropertyError::Transform {
            property: path.to_string(),
            source: e,
        }),
    }
}

fn unwrap_override(raw: Value, fallback: MappingSelector) -> (MappingSelector, Value) {
    match raw.downcast::<Override>() {
        Ok(wrapped) => {
            let selector = wrapped.selector(&fallback);
            let (_, _, inner) = (*wrapped).into_parts();
            (selector, inner)
        }
        Err(raw) => (fallback, raw),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
