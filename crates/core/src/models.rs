//! Catalog of agent target models and target resolution.
//!
//! A submission must name a model type and model name. A project owner may
//! pin a model for the whole project; otherwise the requester's choice is
//! looked up in the built-in catalog.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A target model as stored on a project and sent with a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedModel {
    #[serde(rename = "type")]
    pub model_type: String,
    pub name: String,
}

/// One entry of the built-in model catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_type: &'static str,
    pub name: &'static str,
    pub display_name: &'static str,
}

impl ModelInfo {
    pub fn to_selected(&self) -> SelectedModel {
        SelectedModel {
            model_type: self.model_type.to_string(),
            name: self.name.to_string(),
        }
    }
}

/// Selectable models. The first entry is the default.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        model_type: "gpt",
        name: "gpt-5-mini-2025-08-07",
        display_name: "GPT-5 Mini",
    },
    ModelInfo {
        model_type: "gpt",
        name: "gpt-4o-2024-08-06",
        display_name: "GPT-4o",
    },
    ModelInfo {
        model_type: "gemini",
        name: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
    },
    ModelInfo {
        model_type: "gemini",
        name: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
    },
];

pub fn default_model() -> &'static ModelInfo {
    &MODELS[0]
}

/// Find a catalog entry by its exact model name.
pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

/// Resolve the model a submission should target.
///
/// Precedence: the project's pinned model, then the requester's choice,
/// then the catalog default. A requested name that is not in the catalog
/// is a validation error rather than a silent fallback.
pub fn resolve_target(
    pinned: Option<&SelectedModel>,
    requested: Option<&str>,
) -> Result<SelectedModel, CoreError> {
    if let Some(pinned) = pinned {
        if pinned.model_type.is_empty() || pinned.name.is_empty() {
            return Err(CoreError::Validation(
                "Project has an incomplete pinned model".to_string(),
            ));
        }
        return Ok(pinned.clone());
    }

    match requested.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => find_model(name)
            .map(ModelInfo::to_selected)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown model '{name}'. Must be one of: {}",
                    MODELS.iter().map(|m| m.name).collect::<Vec<_>>().join(", ")
                ))
            }),
        None => Ok(default_model().to_selected()),
    }
}
