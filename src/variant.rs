use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name used when a caller does not ask for a named transform set
pub const DEFAULT_MAPPING_NAME: &str = "";

/// How a transform set is applied to a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MappingVariant {
    /// Apply only the explicit transform set
    #[default]
    #[serde(rename = "FULL")]
    Full,
    /// Copy same-named, same-typed properties first, then overlay the explicit set
    #[serde(rename = "FULL_AUTO")]
    FullAuto,
    /// Used for implicit nested mappings
    #[serde(rename = "MIN")]
    Min,
}

impl MappingVariant {
    pub const ALL: [MappingVariant; 3] = [MappingVariant::Full, MappingVariant::FullAuto, MappingVariant::Min];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingVariant::Full => "FULL",
            MappingVariant::FullAuto => "FULL_AUTO",
            MappingVariant::Min => "MIN",
        }
    }

    /// Whether the type-safe copier runs before the explicit transforms
    pub fn copies_properties(&self) -> bool {
        matches!(self, MappingVariant::FullAuto)
    }
}

impl fmt::Display for MappingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingVariant {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(MappingVariant::Full),
            "FULL_AUTO" => Ok(MappingVariant::FullAuto),
            "MIN" => Ok(MappingVariant::Min),
            _ => Err(VariantError::Unknown(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("Unknown mapping variant: {0}")]
    Unknown(String),
}

/// The (variant, mapping name) pair a caller supplies for a lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingSelector {
    pub variant: MappingVariant,
    pub name: String,
}

impl MappingSelector {
    pub fn new(variant: MappingVariant, name: impl Into<String>) -> Self {
        Self {
            variant,
            name: name.into(),
        }
    }

    /// `FULL` variant with the given mapping name
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(MappingVariant::Full, name)
    }

    /// Given variant with the unnamed mapping
    pub fn variant(variant: MappingVariant) -> Self {
        Self::new(variant, DEFAULT_MAPPING_NAME)
    }

    /// Selector used for implicit recursive mappings
    pub fn nested() -> Self {
        Self::variant(MappingVariant::Min)
    }

    pub fn with_variant(mut self, variant: MappingVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_unnamed(&self) -> bool {
        self.name == DEFAULT_MAPPING_NAME
    }
}

impl Default for MappingSelector {
    fn default() -> Self {
        Self::variant(MappingVariant::Full)
    }
}

impl fmt::Display for MappingSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unnamed() {
            write!(f, "{}", self.variant)
        } else {
            write!(f, "{}:{}", self.variant, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_display() {
        assert_eq!(MappingVariant::Full.to_string(), "FULL");
        assert_eq!(MappingVariant::FullAuto.to_string(), "FULL_AUTO");
        assert_eq!(MappingVariant::Min.to_string(), "MIN");
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("full_auto".parse::<MappingVariant>().unwrap(), MappingVariant::FullAuto);
        assert_eq!(" MIN ".parse::<MappingVariant>().unwrap(), MappingVariant::Min);
        assert!("PARTIAL".parse::<MappingVariant>().is_err());
    }

    #[test]
    fn test_variant_serde_spelling() {
        let yaml = serde_yaml::to_string(&MappingVariant::FullAuto).unwrap();
        assert_eq!(yaml.trim(), "FULL_AUTO");

        let parsed: MappingVariant = serde_json::from_str("\"MIN\"").unwrap();
        assert_eq!(parsed, MappingVariant::Min);
    }

    #[test]
    fn test_only_full_auto_copies() {
        assert!(MappingVariant::FullAuto.copies_properties());
        assert!(!MappingVariant::Full.copies_properties());
        assert!(!MappingVariant::Min.copies_properties());
    }

    #[test]
    fn test_default_selector() {
        let selector = MappingSelector::default();
        assert_eq!(selector.variant, MappingVariant::Full);
        assert!(selector.is_unnamed());
        assert_eq!(selector.to_string(), "FULL");
    }

    #[test]
    fn test_named_selector_display() {
        let selector = MappingSelector::named("alt").with_variant(MappingVariant::Min);
        assert_eq!(selector.to_string(), "MIN:alt");
        assert_eq!(MappingSelector::nested(), MappingSelector::variant(MappingVariant::Min));
    }
}
