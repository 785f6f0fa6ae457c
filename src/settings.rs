use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collision::{CollisionPolicy, InferenceOptions, ShapeOverrides};
use crate::convert::ConvertOptions;
use crate::pipeline::PipelineOptions;
use crate::simplify::SimplifyTarget;

/// Persisted settings for the command-line front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub convert: ConvertOptions,
    pub simplify: Option<SimplifyTarget>,
    pub weld_threshold: Option<f32>,
    pub collision_tolerance: f32,
    pub shape_overrides: ShapeOverrides,
    /// Model path prefixes that always get triangle-mesh collision.
    pub architecture_prefixes: Vec<String>,
    /// Decode threads; zero picks one per core.
    pub workers: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            convert: ConvertOptions::default(),
            simplify: None,
            weld_threshold: None,
            collision_tolerance: InferenceOptions::default().tolerance,
            shape_overrides: ShapeOverrides::default(),
            architecture_prefixes: vec!["meshes/x/".to_string()],
            workers: 0,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            convert: self.convert.clone(),
            simplify: self.simplify,
            weld_threshold: self.weld_threshold,
            overrides: self.shape_overrides.clone(),
            inference: InferenceOptions {
                tolerance: self.collision_tolerance,
                policy: CollisionPolicy {
                    force_concave_prefixes: self.architecture_prefixes.clone(),
                },
            },
        }
    }
}

/// Save settings to a JSON file.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let content =
        serde_json::to_string_pretty(settings).context("failed to serialize settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save settings: {}", path.display()))?;
    Ok(())
}

/// Load settings from a JSON file. Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load settings: {}", path.display()))?;
    let settings: Settings =
        serde_json::from_str(&content).context("failed to parse settings JSON")?;
    Ok(settings)
}
