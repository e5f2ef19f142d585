//! Fast-model selection.

use super::LlmClient;

/// Pick a model id for code synthesis.
///
/// Patterns are tried in order against the provider's model list; within a
/// pattern, models from the same provider as `default_model` win. Falls back
/// to `default_model` when listing fails or nothing matches.
pub async fn select_model(client: &dyn LlmClient, patterns: &[String], default_model: &str) -> String {
    let models = match client.list_models().await {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!("Model listing failed, using default {}: {}", default_model, e);
            return default_model.to_string();
        }
    };

    match pick_model(&models, patterns, default_model) {
        Some(model) => {
            tracing::debug!("Selected model {}", model);
            model
        }
        None => {
            tracing::debug!("No model matched {:?}, using default {}", patterns, default_model);
            default_model.to_string()
        }
    }
}

fn pick_model(models: &[String], patterns: &[String], default_model: &str) -> Option<String> {
    let provider = default_model.split_once('/').map(|(p, _)| p);

    for pattern in patterns {
        let pattern = pattern.to_lowercase();
        let matches: Vec<&String> = models
            .iter()
            .filter(|id| id.to_lowercase().contains(&pattern))
            .collect();
        if matches.is_empty() {
            continue;
        }
        if matches.iter().any(|id| id.as_str() == default_model) {
            return Some(default_model.to_string());
        }
        let same_provider = provider.and_then(|p| {
            matches
                .iter()
                .find(|id| id.split_once('/').map(|(mp, _)| mp) == Some(p))
        });
        return Some(same_provider.unwrap_or(&matches[0]).to_string());
    }
    None
}
