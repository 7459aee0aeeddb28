//! Processor configuration.
//!
//! Handles loading, validating, and merging `imgrelay.toml`. Stock defaults
//! are the base layer; a user file overrides just the values it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [limits]
//! max_width = 9999              # Widest decoded frame accepted
//! max_height = 9999             # Tallest decoded frame accepted
//! max_resolution = 81000000     # Max width x total height (all frames)
//! max_animation_frames = -1     # Frames decoded per animation (-1 = all)
//!
//! [engine]
//! concurrency = 1               # Engine worker threads (-1 = CPU cores)
//! max_cache_files = 0
//! max_cache_mem = 0
//! max_cache_size = 0
//! debug = false                 # Route engine messages at debug level
//!
//! [filters]
//! disable_blur = false          # Also disables sharpen
//! disabled = []                 # Filter names to ignore
//! max_filter_ops = -1           # Filters applied per request (-1 = all)
//!
//! [output]
//! quality = 80                  # Lossy encoder quality (1-100)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{EngineConfig, ImportParams, Quality, ResolutionLimits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name looked up by the CLI.
pub const CONFIG_FILE: &str = "imgrelay.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Processor configuration loaded from `imgrelay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Decompression-bomb limits.
    pub limits: LimitsConfig,
    /// Engine startup settings.
    pub engine: EngineSettings,
    /// Filter policy.
    pub filters: FiltersConfig,
    /// Encoder defaults.
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub max_resolution: u64,
    /// -1 decodes every frame.
    pub max_animation_frames: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = ResolutionLimits::default();
        Self {
            max_width: limits.max_width,
            max_height: limits.max_height,
            max_resolution: limits.max_resolution,
            max_animation_frames: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// -1 uses every core.
    pub concurrency: i64,
    pub max_cache_files: u64,
    pub max_cache_mem: u64,
    pub max_cache_size: u64,
    pub debug: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_cache_files: 0,
            max_cache_mem: 0,
            max_cache_size: 0,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FiltersConfig {
    pub disable_blur: bool,
    pub disabled: Vec<String>,
    /// -1 applies every filter.
    pub max_filter_ops: i64,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            disable_blur: false,
            disabled: Vec::new(),
            max_filter_ops: -1,
        }
    }
}

impl FiltersConfig {
    /// Filter names that must not run, with `disable_blur` expanded.
    pub fn disabled_names(&self) -> Vec<String> {
        let mut names = self.disabled.clone();
        if self.disable_blur {
            names.extend(["blur".to_string(), "sharpen".to_string()]);
        }
        names
    }

    /// Maximum filters per request, `None` for unlimited.
    pub fn max_ops(&self) -> Option<usize> {
        usize::try_from(self.max_filter_ops).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub quality: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
        }
    }
}

impl ProcessorConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.max_width == 0 || limits.max_height == 0 || limits.max_resolution == 0 {
            return Err(ConfigError::Validation(
                "limits.max_width, max_height and max_resolution must be non-zero".into(),
            ));
        }
        if limits.max_animation_frames == 0 || limits.max_animation_frames < -1 {
            return Err(ConfigError::Validation(
                "limits.max_animation_frames must be positive or -1".into(),
            ));
        }
        if self.engine.concurrency == 0 || self.engine.concurrency < -1 {
            return Err(ConfigError::Validation(
                "engine.concurrency must be positive or -1".into(),
            ));
        }
        if self.filters.max_filter_ops < -1 {
            return Err(ConfigError::Validation(
                "filters.max_filter_ops must be non-negative or -1".into(),
            ));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> ResolutionLimits {
        ResolutionLimits {
            max_width: self.limits.max_width,
            max_height: self.limits.max_height,
            max_resolution: self.limits.max_resolution,
        }
    }

    /// Tolerant decode options with the frame and resolution limits applied.
    pub fn import_params(&self) -> ImportParams {
        let max_frames = u32::try_from(self.limits.max_animation_frames)
            .ok()
            .filter(|&n| n > 0);
        ImportParams::tolerant()
            .with_max_frames(max_frames)
            .with_limits(self.limits())
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.output.quality)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_cache_files: self.engine.max_cache_files,
            max_cache_mem: self.engine.max_cache_mem,
            max_cache_size: self.engine.max_cache_size,
            concurrency: effective_concurrency(&self.engine),
            log_level: if self.engine.debug {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Error
            },
        }
    }
}

/// Resolve the engine worker count.
///
/// - `-1` → all available cores
/// - `n` → `n`
pub fn effective_concurrency(config: &EngineSettings) -> usize {
    match usize::try_from(config.concurrency) {
        Ok(n) if n > 0 => n,
        _ => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ProcessorConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<ProcessorConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ProcessorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the stock defaults; a present file is merged on
/// top of them, with unknown keys rejected and the result validated.
pub fn load_config(path: &Path) -> Result<ProcessorConfig, ConfigError> {
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `imgrelay.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r#"# imgrelay configuration
# ======================
# All settings are optional. Remove or comment out any you don't need;
# values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Resolution limits
# ---------------------------------------------------------------------------
# Decoded images larger than these are rejected before any work is done.
[limits]
# Widest frame accepted, in pixels.
max_width = 9999
# Tallest single frame accepted, in pixels.
max_height = 9999
# Maximum width x height over all frames of an animation.
max_resolution = 81000000
# Frames decoded per animation. -1 decodes them all.
max_animation_frames = -1

# ---------------------------------------------------------------------------
# Engine
# ---------------------------------------------------------------------------
[engine]
# Worker threads for pixel work. -1 uses every CPU core.
concurrency = 1
# Operation cache limits passed to the engine at startup.
max_cache_files = 0
max_cache_mem = 0
max_cache_size = 0
# Log engine messages at debug level instead of errors only.
debug = false

# ---------------------------------------------------------------------------
# Filters
# ---------------------------------------------------------------------------
[filters]
# Disable the blur and sharpen filters (they are the most expensive).
disable_blur = false
# Names of filters to ignore, e.g. ["watermark", "rotate"].
disabled = []
# Maximum number of filters applied per request. -1 means no limit.
max_filter_ops = -1

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Lossy encoder quality (1-100). A quality() filter overrides it.
quality = 80
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.limits(), ResolutionLimits::default());
        assert_eq!(config.limits.max_animation_frames, -1);
        assert_eq!(config.engine.concurrency, 1);
        assert_eq!(config.filters.max_filter_ops, -1);
        assert_eq!(config.output.quality, 80);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[limits]
max_width = 4000
"#;
        let config: ProcessorConfig = toml::from_str(toml).unwrap();
        // Overridden value
        assert_eq!(config.limits.max_width, 4000);
        // Default values preserved
        assert_eq!(config.limits.max_height, 9999);
        assert_eq!(config.output.quality, 80);
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ProcessorConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[engine]
concurrency = 4
debug = true

[filters]
disable_blur = true
disabled = ["watermark"]
max_filter_ops = 3

[output]
quality = 65
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.engine.concurrency, 4);
        assert!(config.engine.debug);
        assert_eq!(config.filters.max_ops(), Some(3));
        assert_eq!(config.quality().value(), 65);
        assert_eq!(
            config.filters.disabled_names(),
            vec!["watermark", "blur", "sharpen"]
        );
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "this is not [valid toml").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    #[test]
    fn engine_config_routes_log_level_by_debug() {
        let mut config = ProcessorConfig::default();
        assert_eq!(config.engine_config().log_level, log::LevelFilter::Error);
        config.engine.debug = true;
        assert_eq!(config.engine_config().log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn engine_config_carries_cache_limits() {
        let mut config = ProcessorConfig::default();
        config.engine.max_cache_files = 10;
        config.engine.max_cache_mem = 20;
        config.engine.max_cache_size = 30;
        let engine = config.engine_config();
        assert_eq!(
            (engine.max_cache_files, engine.max_cache_mem, engine.max_cache_size),
            (10, 20, 30)
        );
        assert_eq!(engine.concurrency, 1);
    }

    #[test]
    fn effective_concurrency_auto_uses_cores() {
        let settings = EngineSettings {
            concurrency: -1,
            ..EngineSettings::default()
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_concurrency(&settings), cores);
    }

    #[test]
    fn effective_concurrency_explicit() {
        let settings = EngineSettings {
            concurrency: 3,
            ..EngineSettings::default()
        };
        assert_eq!(effective_concurrency(&settings), 3);
    }

    #[test]
    fn import_params_are_tolerant_with_frame_limit() {
        let mut config = ProcessorConfig::default();
        let params = config.import_params();
        assert!(!params.fail_on_error);
        assert_eq!(params.max_frames, None);

        config.limits.max_animation_frames = 5;
        assert_eq!(config.import_params().max_frames, Some(5));
    }

    #[test]
    fn import_params_hand_resolution_limits_to_the_decoder() {
        let mut config = ProcessorConfig::default();
        config.limits.max_width = 1200;

        let limits = config.import_params().limits.unwrap();
        assert_eq!(limits.max_width, 1200);
        assert_eq!(limits, config.limits());
    }

    #[test]
    fn max_filter_ops_unlimited_is_none() {
        assert_eq!(FiltersConfig::default().max_ops(), None);
        let filters = FiltersConfig {
            max_filter_ops: 0,
            ..FiltersConfig::default()
        };
        assert_eq!(filters.max_ops(), Some(0));
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str(r#"quality = 90"#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"quality = 70"#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("quality").unwrap().as_integer(), Some(70));
    }

    #[test]
    fn merge_toml_preserves_base_keys() {
        let base: toml::Value = toml::from_str(
            r#"
[limits]
max_width = 9999
max_height = 9999
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[limits]
max_width = 100
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let limits = merged.get("limits").unwrap();
        assert_eq!(limits.get("max_width").unwrap().as_integer(), Some(100));
        assert_eq!(limits.get("max_height").unwrap().as_integer(), Some(9999));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str(r#"disabled = ["blur"]"#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"disabled = ["rotate", "watermark"]"#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("disabled").unwrap().as_array().unwrap().len(), 2);
    }

    // =========================================================================
    // Unknown key rejection tests
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let toml_str = r#"
[limits]
max_widht = 90
"#;
        let result: Result<ProcessorConfig, _> = toml::from_str(toml_str);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let toml_str = r#"
[limitz]
max_width = 90
"#;
        let result: Result<ProcessorConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_rejected_via_load_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[output]
qualty = 90
"#,
        )
        .unwrap();
        assert!(load_config(&path).is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(ProcessorConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_quality_bounds() {
        let mut config = ProcessorConfig::default();
        config.output.quality = 100;
        assert!(config.validate().is_ok());
        config.output.quality = 1;
        assert!(config.validate().is_ok());
        config.output.quality = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        config.output.quality = 101;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_zero_limits_rejected() {
        let mut config = ProcessorConfig::default();
        config.limits.max_resolution = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_concurrency() {
        let mut config = ProcessorConfig::default();
        config.engine.concurrency = -1;
        assert!(config.validate().is_ok());
        config.engine.concurrency = 0;
        assert!(config.validate().is_err());
        config.engine.concurrency = -2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_animation_frames() {
        let mut config = ProcessorConfig::default();
        config.limits.max_animation_frames = 0;
        assert!(config.validate().is_err());
        config.limits.max_animation_frames = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resolve_config_rejects_invalid_values() {
        let overlay: toml::Value = toml::from_str(
            r#"
[output]
quality = 0
"#,
        )
        .unwrap();
        let result = resolve_config(Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // stock_config_toml tests
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: ProcessorConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, ProcessorConfig::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[limits]", "[engine]", "[filters]", "[output]"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value().unwrap();
        assert!(val.is_table());
        for key in ["limits", "engine", "filters", "output"] {
            assert!(val.get(key).is_some(), "missing {key}");
        }
    }
}
