use tracing::debug;

use crate::descriptor::TypeDescriptor;
use crate::registry::MappingRegistry;
use crate::value::{runtime_type, Object};

/// Best-effort shallow copy of same-named, same-typed properties
pub struct TypeSafeCopier;

impl TypeSafeCopier {
    /// Copies every property of `source` that `target` declares with the same
    /// name and exact type. Unset source values and failing writes are skipped.
    /// Returns the names of the copied properties.
    pub fn copy(
        registry: &dyn MappingRegistry,
        target_descriptor: &TypeDescriptor,
        target: &mut Object,
        source: &Object,
    ) -> Vec<String> {
        let Some(source_descriptor) = registry.descriptor(runtime_type(source)) else {
            debug!(
                target_type = target_descriptor.type_info().name(),
                "source type is not described, nothing to copy"
            );
            return Vec::new();
        };

        let mut copied = Vec::new();
        for property in target_descriptor.properties().filter(|p| p.is_writable()) {
            let Some(from) = source_descriptor.property(property.name()) else {
                continue;
            };
            if !from.is_readable() || from.declared() != property.declared() {
                continue;
            }
            let Some(raw) = from.read(source) else {
                continue;
            };

            match property.write(target, Some(raw)) {
                Ok(()) => copied.push(property.name().to_string()),
                Err(e) => debug!(
                    target_type = target_descriptor.type_info().name(),
                    property = property.name(),
                    error = %e,
                    "property copy skipped"
                ),
            }
        }
        copied
    }
}
