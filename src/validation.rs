//! Opt-in static audit of a built registry.

use serde::{Deserialize, Serialize};

use crate::descriptor::{resolve_path, ContainerKind, PropertyShape};
use crate::registry::{MappingRegistry, Registry};

/// Result of auditing a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub location: String,
    pub error_type: ValidationErrorType,
    pub message: String,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationErrorType {
    MissingDescriptor,
    NotInstantiable,
    UnresolvedPath,
    ReadOnlyProperty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub location: String,
    pub warning_type: ValidationWarningType,
    pub message: String,
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationWarningType {
    UnparameterizedContainer,
    UnsupportedContainer,
    OrphanPostProcessor,
}

impl ValidationError {
    pub fn new(location: String, error_type: ValidationErrorType, message: String) -> Self {
        Self {
            location,
            error_type,
            message,
            suggested_fix: None,
        }
    }

    pub fn with_suggested_fix(mut self, fix: String) -> Self {
        self.suggested_fix = Some(fix);
        self
    }
}

impl ValidationWarning {
    pub fn new(location: String, warning_type: ValidationWarningType, message: String) -> Self {
        Self {
            location,
            warning_type,
            message,
            recommendation: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: String) -> Self {
        self.recommendation = Some(recommendation);
        self
    }
}

/// Checks every transform set and post-processor against the descriptors
/// without running any mapping
pub fn audit(registry: &Registry) -> ValidationReport {
    let mut report = ValidationReport::new();

    let mut sets: Vec<_> = registry.transform_sets().collect();
    sets.sort_by(|(a, x), (b, y)| {
        (a.name(), x.source().name(), x.variant(), x.name()).cmp(&(b.name(), y.source().name(), y.variant(), y.name()))
    });

    for (target, set) in &sets {
        let label = format!("{} <- {} ({}, '{}')", target, set.source(), set.variant(), set.name());

        let Some(descriptor) = registry.descriptor(target.id()) else {
            report.add_error(
                ValidationError::new(
                    label,
                    ValidationErrorType::MissingDescriptor,
                    format!("target type {} is not described", target),
                )
                .with_suggested_fix("Register a TypeDescriptor for the target type".to_string()),
            );
            continue;
        };

        if !descriptor.is_instantiable() {
            report.add_error(
                ValidationError::new(
                    label.clone(),
                    ValidationErrorType::NotInstantiable,
                    format!("target type {} has no constructor", target),
                )
                .with_suggested_fix("Describe the type with TypeDescriptor::of or add a constructor".to_string()),
            );
        }

        for path in set.paths() {
            let location = format!("{}: {}", label, path);
            let property = match resolve_path(registry, descriptor, path) {
                Ok(resolved) => resolved.property(),
                Err(e) => {
                    report.add_error(ValidationError::new(location, ValidationErrorType::UnresolvedPath, e.to_string()));
                    continue;
                }
            };

            if !property.is_writable() {
                report.add_error(ValidationError::new(
                    location.clone(),
                    ValidationErrorType::ReadOnlyProperty,
                    format!("property '{}' cannot be assigned", path),
                ));
            }

            match property.shape() {
                PropertyShape::Container { element: None, .. } => report.add_warning(
                    ValidationWarning::new(
                        location,
                        ValidationWarningType::UnparameterizedContainer,
                        format!("collection '{}' declares no element type", path),
                    )
                    .with_recommendation("Describe the collection with list, set or collection".to_string()),
                ),
                PropertyShape::Container {
                    kind: ContainerKind::Other(kind),
                    ..
                } => report.add_warning(ValidationWarning::new(
                    location,
                    ValidationWarningType::UnsupportedContainer,
                    format!("collection '{}' is a {}, only lists and sets can be populated", path, kind),
                )),
                _ => {}
            }
        }
    }

    let mut hooks: Vec<_> = registry.hook_holders().flat_map(|holder| holder.hooks()).collect();
    hooks.sort_by(|a, b| (a.target().name(), a.name()).cmp(&(b.target().name(), b.name())));
    for hook in hooks {
        let paired = sets
            .iter()
            .any(|(target, set)| *target == hook.target() && set.source() == hook.source());
        if !paired {
            report.add_warning(ValidationWarning::new(
                format!("{} <- {}: {}", hook.target(), hook.source(), hook.name()),
                ValidationWarningType::OrphanPostProcessor,
                format!("post-processor '{}' has no transform set it could follow", hook.name()),
            ));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeDescriptor;
    use crate::registry::RegistryBuilder;
    use crate::transform_set::TransformSet;
    use crate::variant::MappingVariant;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Shipment {
        carrier: String,
        stops: Option<VecDeque<String>>,
        raw: Option<Vec<String>>,
        tracking: String,
    }

    struct Manifest {
        carrier: String,
    }

    struct Loose;

    fn shipment_descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Shipment>()
            .field("carrier", |s: &Shipment| s.carrier.clone(), |s, v| s.carrier = v)
            .collection(
                "stops",
                ContainerKind::Other("deque"),
                |s: &Shipment| s.stops.clone(),
                |s, v| s.stops = v,
            )
            .untyped_collection("raw", ContainerKind::List, |s: &Shipment| s.raw.clone(), |s, v| s.raw = v)
            .readable("tracking", |s: &Shipment| s.tracking.clone())
            .build()
    }

    #[test]
    fn test_validation_report_creation() {
        let report = ValidationReport::new();
        assert!(report.is_valid);
        assert!(!report.has_errors());
        assert!(!report.has_warnings());
    }

    #[test]
    fn test_clean_registry_passes() {
        let registry = RegistryBuilder::new()
            .describe(shipment_descriptor())
            .register::<Shipment>(
                TransformSet::builder::<Manifest>(MappingVariant::Full)
                    .value("carrier", |m| m.carrier.clone())
                    .build(),
            )
            .post_processor::<Shipment, Manifest, _>("noop", |_, _| Ok(()))
            .build()
            .unwrap();

        let report = audit(&registry);
        assert!(report.is_valid);
        assert!(!report.has_warnings());
    }

    #[test]
    fn test_audit_finds_problems() {
        let registry = RegistryBuilder::new()
            .describe(shipment_descriptor())
            .register::<Shipment>(
                TransformSet::builder::<Manifest>(MappingVariant::Full)
                    .value("carrier", |m| m.carrier.clone())
                    .value("weight", |_| 3u32)
                    .value("tracking", |_| String::new())
                    .sequence("stops", |m| vec![m.carrier.clone()])
                    .sequence("raw", |m| vec![m.carrier.clone()])
                    .build(),
            )
            .register::<Loose>(TransformSet::builder::<Manifest>(MappingVariant::Min).build())
            .post_processor::<Shipment, Loose, _>("orphan", |_, _| Ok(()))
            .build()
            .unwrap();

        let report = audit(&registry);
        assert!(!report.is_valid);

        let errors: Vec<_> = report.errors.iter().map(|e| e.error_type.clone()).collect();
        assert_eq!(
            errors,
            vec![
                ValidationErrorType::MissingDescriptor,
                ValidationErrorType::ReadOnlyProperty,
                ValidationErrorType::UnresolvedPath,
            ]
        );

        let warnings: Vec<_> = report.warnings.iter().map(|w| w.warning_type.clone()).collect();
        assert_eq!(
            warnings,
            vec![
                ValidationWarningType::UnparameterizedContainer,
                ValidationWarningType::UnsupportedContainer,
                ValidationWarningType::OrphanPostProcessor,
            ]
        );
    }

    #[test]
    fn test_report_serializes() {
        let mut report = ValidationReport::new();
        report.add_warning(
            ValidationWarning::new(
                "A <- B".to_string(),
                ValidationWarningType::OrphanPostProcessor,
                "orphan".to_string(),
            )
            .with_recommendation("remove it".to_string()),
        );

        let yaml = serde_yaml::to_string(&report).unwrap();
        assert!(yaml.contains("OrphanPostProcessor"));
        let back: ValidationReport = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.warnings[0].recommendation.as_deref(), Some("remove it"));
    }
}
