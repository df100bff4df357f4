use crate::config::RuntimeOverrides;
use anyhow::{anyhow, bail, Context, Result};
use glam::Vec2;
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config/stage.json";
const DEFAULT_CATALOG: &str = "assets/catalog.json";
const DEFAULT_SCRIPT: &str = "assets/scene.rhai";

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub config: PathBuf,
    pub catalog: PathBuf,
    pub script: PathBuf,
    pub frames: u32,
    pub frame_ms: f64,
    /// Clicks delivered one per frame, in order.
    pub clicks: Vec<Vec2>,
    reuse_nodes: Option<bool>,
    heuristic_weight: Option<f32>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG),
            catalog: PathBuf::from(DEFAULT_CATALOG),
            script: PathBuf::from(DEFAULT_SCRIPT),
            frames: 120,
            frame_ms: 1000.0 / 60.0,
            clicks: Vec::new(),
            reuse_nodes: None,
            heuristic_weight: None,
        }
    }
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name <value>.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => options.config = PathBuf::from(value),
                "catalog" => options.catalog = PathBuf::from(value),
                "script" => options.script = PathBuf::from(value),
                "frames" => {
                    options.frames =
                        value.parse::<u32>().with_context(|| format!("Invalid frame count '{value}'"))?;
                }
                "frame-ms" => {
                    let ms =
                        value.parse::<f64>().with_context(|| format!("Invalid frame interval '{value}'"))?;
                    if !ms.is_finite() || ms <= 0.0 {
                        bail!("Frame interval must be positive, got '{value}'");
                    }
                    options.frame_ms = ms;
                }
                "click" => options.clicks.push(parse_point(&value)?),
                "reuse-nodes" => options.reuse_nodes = Some(parse_bool_flag("reuse-nodes", &value)?),
                "heuristic" => {
                    let weight =
                        value.parse::<f32>().with_context(|| format!("Invalid heuristic '{value}'"))?;
                    options.heuristic_weight = Some(weight);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --catalog, --script, --frames, \
                     --frame-ms, --click, --reuse-nodes, --heuristic."
                ),
            }
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            reuse_nodes: self.reuse_nodes,
            heuristic_weight: self.heuristic_weight,
            cursor: None,
        }
    }
}

fn parse_point(value: &str) -> Result<Vec2> {
    let (x, y) = value.split_once(',').ok_or_else(|| anyhow!("Invalid click '{value}'. Use x,y."))?;
    let x = x.trim().parse::<f32>().with_context(|| format!("Invalid click x in '{value}'"))?;
    let y = y.trim().parse::<f32>().with_context(|| format!("Invalid click y in '{value}'"))?;
    Ok(Vec2::new(x, y))
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_frame_settings() {
        let args = ["app", "--catalog", "demo/catalog.json", "--frames", "30", "--frame-ms", "20"];
        let options = CliOptions::parse(args).expect("parse options");
        assert_eq!(options.catalog, PathBuf::from("demo/catalog.json"));
        assert_eq!(options.script, PathBuf::from(DEFAULT_SCRIPT));
        assert_eq!(options.frames, 30);
        assert_eq!(options.frame_ms, 20.0);
    }

    #[test]
    fn clicks_accumulate_in_order() {
        let args = ["app", "--click", "10,20", "--click", " 5.5 , 7"];
        let options = CliOptions::parse(args).expect("parse options");
        assert_eq!(options.clicks, vec![Vec2::new(10.0, 20.0), Vec2::new(5.5, 7.0)]);
    }

    #[test]
    fn overrides_follow_latest_flag() {
        let args = ["app", "--reuse-nodes", "on", "--reuse-nodes", "off", "--heuristic", "1.5"];
        let overrides = CliOptions::parse(args).expect("parse options").config_overrides();
        assert_eq!(overrides.reuse_nodes, Some(false));
        assert_eq!(overrides.heuristic_weight, Some(1.5));
        assert_eq!(overrides.applied_fields(), vec!["reuse_nodes", "heuristic_weight"]);
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOptions::parse(["app", "--frames"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_points() {
        let err = CliOptions::parse(["app", "--width", "800"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = CliOptions::parse(["app", "--click", "12"]).unwrap_err();
        assert!(err.to_string().contains("Use x,y"));
    }
}
