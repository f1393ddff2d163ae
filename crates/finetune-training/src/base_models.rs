//! Supported base models and the names reserved for comparing against them.
//!
//! A fine tune's slug is used as a model name by clients, so it must never
//! collide with a name that denotes a base model.

use crate::error::TrainingError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Models that are only ever used as comparison baselines, never trained.
pub const COMPARISON_ONLY_MODEL_NAMES: &[&str] = &[
    "gpt-4",
    "gpt-4-0613",
    "gpt-4-1106-preview",
    "gpt-4-turbo",
    "gpt-3.5-turbo-0613",
    "gpt-3.5-turbo-1106",
];

/// Base models a fine tune can be trained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseModel {
    #[serde(rename = "GPT_3_5_TURBO")]
    Gpt35Turbo,
    #[serde(rename = "MISTRAL_7B")]
    Mistral7b,
    #[serde(rename = "LLAMA2_7B")]
    Llama2_7b,
    #[serde(rename = "LLAMA2_13B")]
    Llama2_13b,
    #[serde(rename = "MIXTRAL_8X7B")]
    Mixtral8x7b,
}

impl BaseModel {
    pub const ALL: [Self; 5] =
        [Self::Gpt35Turbo, Self::Mistral7b, Self::Llama2_7b, Self::Llama2_13b, Self::Mixtral8x7b];

    /// Stored enum value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "GPT_3_5_TURBO",
            Self::Mistral7b => "MISTRAL_7B",
            Self::Llama2_7b => "LLAMA2_7B",
            Self::Llama2_13b => "LLAMA2_13B",
            Self::Mixtral8x7b => "MIXTRAL_8X7B",
        }
    }

    /// Name clients use when they call the untrained base model directly.
    #[must_use]
    pub fn comparison_name(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "gpt-3.5-turbo",
            Self::Mistral7b => "mistral-7b",
            Self::Llama2_7b => "llama-2-7b",
            Self::Llama2_13b => "llama-2-13b",
            Self::Mixtral8x7b => "mixtral-8x7b",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "GPT-3.5 Turbo",
            Self::Mistral7b => "Mistral 7B",
            Self::Llama2_7b => "Llama 2 7B",
            Self::Llama2_13b => "Llama 2 13B",
            Self::Mixtral8x7b => "Mixtral 8x7B",
        }
    }
}

impl std::fmt::Display for BaseModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseModel {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrainingError::UnknownBaseModel(s.to_string()))
    }
}

/// The set of supported base models together with every reserved name.
///
/// Reserved names are compared ASCII case-insensitively.
#[derive(Debug, Clone)]
pub struct BaseModelRegistry {
    supported: Vec<BaseModel>,
    reserved: BTreeSet<String>,
}

impl BaseModelRegistry {
    /// Registry of all built-in models plus extra reserved names (e.g. from config).
    #[must_use]
    pub fn new<I, S>(extra_reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let supported = BaseModel::ALL.to_vec();
        let reserved = supported
            .iter()
            .map(|model| model.comparison_name().to_string())
            .chain(COMPARISON_ONLY_MODEL_NAMES.iter().map(|name| (*name).to_string()))
            .chain(extra_reserved.into_iter().map(|name| name.as_ref().to_string()))
            .map(|name| name.to_ascii_lowercase())
            .collect();
        Self { supported, reserved }
    }

    #[must_use]
    pub fn supported(&self) -> &[BaseModel] {
        &self.supported
    }

    #[must_use]
    pub fn reserved_names(&self) -> impl Iterator<Item = &str> {
        self.reserved.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_comparison_model_name(&self, name: &str) -> bool {
        self.reserved.contains(&name.to_ascii_lowercase())
    }

    /// Parses a base model value and checks it is supported by this registry.
    pub fn parse(&self, value: &str) -> Result<BaseModel, TrainingError> {
        let model: BaseModel = value.parse()?;
        if self.supported.contains(&model) {
            Ok(model)
        } else {
            Err(TrainingError::UnknownBaseModel(value.to_string()))
        }
    }
}

impl Default for BaseModelRegistry {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_base_model_name_is_reserved() {
        let registry = BaseModelRegistry::default();
        for model in BaseModel::ALL {
            assert!(registry.is_comparison_model_name(model.comparison_name()));
        }
    }

    #[test]
    fn test_comparison_only_names_are_reserved() {
        let registry = BaseModelRegistry::default();
        assert!(registry.is_comparison_model_name("gpt-4"));
        assert!(registry.is_comparison_model_name("GPT-4"));
        assert!(!registry.is_comparison_model_name("my-model"));
    }

    #[test]
    fn test_extra_reserved_names() {
        let registry = BaseModelRegistry::new(["house-model"]);
        assert!(registry.is_comparison_model_name("House-Model"));
        assert!(registry.reserved_names().any(|n| n == "house-model"));
    }

    #[test]
    fn test_parse_base_model() {
        let registry = BaseModelRegistry::default();
        assert_eq!(registry.parse("GPT_3_5_TURBO").unwrap(), BaseModel::Gpt35Turbo);
        assert_eq!(registry.parse("mistral_7b").unwrap(), BaseModel::Mistral7b);
        assert_eq!(
            registry.parse("GPT_5").unwrap_err(),
            TrainingError::UnknownBaseModel("GPT_5".to_string())
        );
    }

    #[test]
    fn test_base_model_serde_uses_stored_value() {
        let json = serde_json::to_string(&BaseModel::Llama2_13b).unwrap();
        assert_eq!(json, "\"LLAMA2_13B\"");
        let model: BaseModel = serde_json::from_str("\"MIXTRAL_8X7B\"").unwrap();
        assert_eq!(model, BaseModel::Mixtral8x7b);
    }
}
