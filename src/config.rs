use crate::text::TextStyle;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    /// Mutate nodes in place when the sprite definition is unchanged.
    #[serde(default = "SceneConfig::default_reuse_nodes")]
    pub reuse_nodes: bool,
    #[serde(default = "SceneConfig::default_max_reticks")]
    pub max_reticks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathConfig {
    #[serde(default = "PathConfig::default_heuristic_weight")]
    pub heuristic_weight: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub fallback: TextStyle,
    /// Horizontal advance per glyph, as a fraction of the font size.
    #[serde(default = "TextConfig::default_glyph_advance")]
    pub glyph_advance: f32,
    /// Line height as a multiple of the font size.
    #[serde(default = "TextConfig::default_line_height")]
    pub line_height: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Dotted host paths of stage descriptors, bottom-most first.
    #[serde(default = "RuntimeConfig::default_stages")]
    pub stages: Vec<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub path: PathConfig,
    #[serde(default)]
    pub text: TextConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub reuse_nodes: Option<bool>,
    pub heuristic_weight: Option<f32>,
    pub cursor: Option<String>,
}

impl SceneConfig {
    const fn default_reuse_nodes() -> bool {
        true
    }

    const fn default_max_reticks() -> u32 {
        8
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { reuse_nodes: Self::default_reuse_nodes(), max_reticks: Self::default_max_reticks() }
    }
}

impl PathConfig {
    fn default_heuristic_weight() -> f32 {
        1.2
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self { heuristic_weight: Self::default_heuristic_weight() }
    }
}

impl TextConfig {
    fn default_glyph_advance() -> f32 {
        0.6
    }

    fn default_line_height() -> f32 {
        1.2
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            fallback: TextStyle::default(),
            glyph_advance: Self::default_glyph_advance(),
            line_height: Self::default_line_height(),
        }
    }
}

impl RuntimeConfig {
    fn default_stages() -> Vec<String> {
        vec!["stage".to_string()]
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(reuse) = overrides.reuse_nodes {
            self.scene.reuse_nodes = reuse;
        }
        if let Some(weight) = overrides.heuristic_weight {
            self.path.heuristic_weight = weight;
        }
        if let Some(cursor) = &overrides.cursor {
            self.cursor = Some(cursor.clone());
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stages: Self::default_stages(),
            cursor: None,
            scene: SceneConfig::default(),
            path: PathConfig::default(),
            text: TextConfig::default(),
        }
    }
}

impl RuntimeOverrides {
    pub fn is_empty(&self) -> bool {
        self.reuse_nodes.is_none() && self.heuristic_weight.is_none() && self.cursor.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.reuse_nodes.is_some() {
            fields.push("reuse_nodes");
        }
        if self.heuristic_weight.is_some() {
            fields.push("heuristic_weight");
        }
        if self.cursor.is_some() {
            fields.push("cursor");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"stages":["ui.back","ui.front"],"scene":{"reuse_nodes":false}}"#)
                .expect("parse config");
        assert_eq!(cfg.stages, vec!["ui.back".to_string(), "ui.front".to_string()]);
        assert!(!cfg.scene.reuse_nodes);
        assert_eq!(cfg.scene.max_reticks, 8);
        assert!((cfg.path.heuristic_weight - 1.2).abs() < f32::EPSILON);
        assert_eq!(cfg.text.fallback.size, 16.0);
    }

    #[test]
    fn overrides_replace_only_named_fields() {
        let mut cfg = RuntimeConfig::default();
        let overrides = RuntimeOverrides { heuristic_weight: Some(1.0), ..Default::default() };
        cfg.apply_overrides(&overrides);
        assert_eq!(overrides.applied_fields(), vec!["heuristic_weight"]);
        assert!((cfg.path.heuristic_weight - 1.0).abs() < f32::EPSILON);
        assert!(cfg.scene.reuse_nodes);
        assert!(cfg.cursor.is_none());
    }
}
