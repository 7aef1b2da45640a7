// Registry-driven object mapping engine
pub mod config;
pub mod copier;
pub mod descriptor;
pub mod engine;
pub mod pool;
pub mod registry;
pub mod report;
pub mod transform_set;
pub mod validation;
pub mod value;
pub mod variant;

// Re-export core types for convenience
pub use config::{ConfigError, EngineConfig, HookFailurePolicy};
pub use copier::TypeSafeCopier;
pub use descriptor::{ContainerKind, Property, PropertyError, PropertyShape, TypeDescriptor};
pub use engine::{DomainMapper, MappingError, MappingOutcome, MappingWarning};
pub use pool::{PoolError, WorkerPool};
pub use registry::{HookError, HookHolder, MappingRegistry, PostProcessor, Registry, RegistryBuilder, RegistryError};
pub use report::{MappingReport, MappingReporter, ReportError, ReportFormat};
pub use transform_set::{OrAbsent, TransformError, TransformSet};
pub use validation::{audit, ValidationReport};
pub use value::{value, Object, Override, Sequence, TypeInfo, Value};
pub use variant::{MappingSelector, MappingVariant, VariantError, DEFAULT_MAPPING_NAME};
