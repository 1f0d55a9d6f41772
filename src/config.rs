// src/config.rs - TOML configuration, validated into a ParameterRecord

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value;

use crate::errors::{LungError, Result};

pub const DEFAULT_SPECIES: &str = "mouse";
pub const DEFAULT_MAGNIFICATION: &str = "10X";
pub const DEFAULT_FIXED_FIELD: &str = "2560x1920";
pub const DEFAULT_SCALE: f64 = 2.0969;
pub const DEFAULT_BLOCK_SIZE: u32 = 251;
pub const DEFAULT_CONSTANT: f64 = 1.0;
pub const DEFAULT_MIN_ALV_SIZE: u32 = 500;
pub const DEFAULT_MAX_SPECKLE_SIZE: u32 = 100;
pub const DEFAULT_CLIP_LIMIT: f64 = 0.01;
pub const DEFAULT_TILES: u32 = 8;

/// Local statistic used by the adaptive threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdMethod {
    #[default]
    Mean,
    Median,
    Gaussian,
}

impl ThresholdMethod {
    /// Parse a method name, ignoring case and surrounding whitespace
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" => Some(Self::Mean),
            "median" => Some(Self::Median),
            "gaussian" => Some(Self::Gaussian),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Gaussian => "gaussian",
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CLAHE settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastSettings {
    pub enabled: bool,
    /// Fraction of a tile's pixels a single histogram bin may hold
    pub clip_limit: f64,
    /// Tiles per image side
    pub tiles: u32,
}

impl Default for ContrastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_limit: DEFAULT_CLIP_LIMIT,
            tiles: DEFAULT_TILES,
        }
    }
}

/// Validated parameters shared by every stage of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub species: String,
    pub magnification: String,
    pub fixed_field: String,
    /// Pixels per micrometer, always > 0
    pub scale: f64,
    /// Local threshold window side, always odd and >= 3
    pub block_size: u32,
    /// Threshold offset in 8-bit intensity units
    pub constant: f64,
    pub method: ThresholdMethod,
    pub min_alv_size: u32,
    pub max_speckle_size: u32,
    pub contrast: ContrastSettings,
    pub use_parallel: bool,
}

impl Default for ParameterRecord {
    fn default() -> Self {
        Self {
            species: DEFAULT_SPECIES.to_string(),
            magnification: DEFAULT_MAGNIFICATION.to_string(),
            fixed_field: DEFAULT_FIXED_FIELD.to_string(),
            scale: DEFAULT_SCALE,
            block_size: DEFAULT_BLOCK_SIZE,
            constant: DEFAULT_CONSTANT,
            method: ThresholdMethod::Mean,
            min_alv_size: DEFAULT_MIN_ALV_SIZE,
            max_speckle_size: DEFAULT_MAX_SPECKLE_SIZE,
            contrast: ContrastSettings::default(),
            use_parallel: true,
        }
    }
}

impl ParameterRecord {
    /// Load, validate and correct a configuration file.
    ///
    /// Corrections are logged and returned; only unreadable or unparseable
    /// files are errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<ConfigWarning>)> {
        let file = ConfigFile::from_file(path)?;
        Ok(file.validate())
    }

    /// Same as [`ParameterRecord::from_file`] for in-memory TOML
    pub fn from_toml_str(content: &str) -> Result<(Self, Vec<ConfigWarning>)> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| {
            LungError::Config(format!("Failed to parse configuration: {}", e))
        })?;
        Ok(file.validate())
    }
}

/// A configuration value that was replaced by its default
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub key: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// On-disk layout of the configuration file.
///
/// Every value is kept as a raw TOML value; wrong types and out-of-range
/// values are corrected in `validate` rather than rejected by the parser.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(alias = "Image_Metadata")]
    pub image_metadata: ImageMetadataSection,
    #[serde(alias = "Threshold_Params")]
    pub threshold_params: ThresholdSection,
    #[serde(alias = "Morphology_Params")]
    pub morphology_params: MorphologySection,
    #[serde(alias = "Contrast_Params")]
    pub contrast_params: ContrastSection,
    #[serde(alias = "Processing")]
    pub processing: ProcessingSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ImageMetadataSection {
    #[serde(alias = "Species", skip_serializing_if = "Option::is_none")]
    pub species: Option<Value>,
    #[serde(alias = "Magnification", skip_serializing_if = "Option::is_none")]
    pub magnification: Option<Value>,
    #[serde(alias = "Fixed_Field", skip_serializing_if = "Option::is_none")]
    pub fixed_field: Option<Value>,
    #[serde(alias = "Scale", skip_serializing_if = "Option::is_none")]
    pub scale: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ThresholdSection {
    #[serde(alias = "Block_Size", skip_serializing_if = "Option::is_none")]
    pub block_size: Option<Value>,
    #[serde(alias = "Constant", skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
    #[serde(alias = "Method", skip_serializing_if = "Option::is_none")]
    pub method: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MorphologySection {
    #[serde(alias = "Min_Alveolar_Size", skip_serializing_if = "Option::is_none")]
    pub min_alveolar_size: Option<Value>,
    #[serde(alias = "Max_Speckle_Size", skip_serializing_if = "Option::is_none")]
    pub max_speckle_size: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ContrastSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_limit: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ProcessingSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_parallel: Option<Value>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LungError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|source| LungError::ConfigLoad {
            source,
            path: PathBuf::from(path),
        })
    }

    /// Validate every value, replacing invalid ones with defaults
    pub fn validate(self) -> (ParameterRecord, Vec<ConfigWarning>) {
        let defaults = ParameterRecord::default();
        let mut warnings = Vec::new();

        let ImageMetadataSection { species, magnification, fixed_field, scale } = self.image_metadata;
        let ThresholdSection { block_size, constant, method } = self.threshold_params;
        let ContrastSection { enabled, clip_limit, tiles } = self.contrast_params;

        let species = typed(species, "species", "a string", as_text, &mut warnings);
        let magnification = typed(magnification, "magnification", "a string", as_text, &mut warnings);
        let fixed_field = typed(fixed_field, "fixed_field", "a string", as_text, &mut warnings);

        let scale = match typed(scale, "scale", "a number", as_number, &mut warnings) {
            Some(value) if value.is_finite() && value > 0.0 => value,
            Some(value) => {
                warnings.push(ConfigWarning {
                    key: "scale",
                    message: format!("{} is not a positive number, using {}", value, DEFAULT_SCALE),
                });
                DEFAULT_SCALE
            }
            None => DEFAULT_SCALE,
        };

        let block_size = match typed(block_size, "block_size", "an integer", as_integer, &mut warnings) {
            Some(value) if value >= 3 && value % 2 == 1 && value <= i64::from(u32::MAX) => value as u32,
            Some(value) => {
                warnings.push(ConfigWarning {
                    key: "block_size",
                    message: format!("{} must be an odd integer >= 3, using {}", value, DEFAULT_BLOCK_SIZE),
                });
                DEFAULT_BLOCK_SIZE
            }
            None => DEFAULT_BLOCK_SIZE,
        };

        let constant = match typed(constant, "constant", "a number", as_number, &mut warnings) {
            Some(value) if value.is_finite() => value,
            Some(value) => {
                warnings.push(ConfigWarning {
                    key: "constant",
                    message: format!("{} is not finite, using {}", value, DEFAULT_CONSTANT),
                });
                DEFAULT_CONSTANT
            }
            None => DEFAULT_CONSTANT,
        };

        let method = match typed(method, "method", "a string", as_text, &mut warnings) {
            Some(name) => ThresholdMethod::parse(&name).unwrap_or_else(|| {
                warnings.push(ConfigWarning {
                    key: "method",
                    message: format!("unknown method '{}', using {}", name, ThresholdMethod::Mean),
                });
                ThresholdMethod::Mean
            }),
            None => ThresholdMethod::Mean,
        };

        let min_alv_size = non_negative_size(
            self.morphology_params.min_alveolar_size,
            "min_alveolar_size",
            DEFAULT_MIN_ALV_SIZE,
            &mut warnings,
        );
        let max_speckle_size = non_negative_size(
            self.morphology_params.max_speckle_size,
            "max_speckle_size",
            DEFAULT_MAX_SPECKLE_SIZE,
            &mut warnings,
        );

        let enabled = typed(enabled, "enabled", "a boolean", Value::as_bool, &mut warnings);

        let clip_limit = match typed(clip_limit, "clip_limit", "a number", as_number, &mut warnings) {
            Some(value) if value > 0.0 && value <= 1.0 => value,
            Some(value) => {
                warnings.push(ConfigWarning {
                    key: "clip_limit",
                    message: format!("{} must be in (0, 1], using {}", value, DEFAULT_CLIP_LIMIT),
                });
                DEFAULT_CLIP_LIMIT
            }
            None => DEFAULT_CLIP_LIMIT,
        };

        let tiles = match typed(tiles, "tiles", "an integer", as_integer, &mut warnings) {
            Some(value) if value >= 1 && value <= i64::from(u32::MAX) => value as u32,
            Some(value) => {
                warnings.push(ConfigWarning {
                    key: "tiles",
                    message: format!("{} must be >= 1, using {}", value, DEFAULT_TILES),
                });
                DEFAULT_TILES
            }
            None => DEFAULT_TILES,
        };

        let use_parallel = typed(
            self.processing.use_parallel,
            "use_parallel",
            "a boolean",
            Value::as_bool,
            &mut warnings,
        );

        for warning in &warnings {
            warn!("Config corrected - {}", warning);
        }

        let params = ParameterRecord {
            species: species.unwrap_or(defaults.species),
            magnification: magnification.unwrap_or(defaults.magnification),
            fixed_field: fixed_field.unwrap_or(defaults.fixed_field),
            scale,
            block_size,
            constant,
            method,
            min_alv_size,
            max_speckle_size,
            contrast: ContrastSettings {
                enabled: enabled.unwrap_or(defaults.contrast.enabled),
                clip_limit,
                tiles,
            },
            use_parallel: use_parallel.unwrap_or(defaults.use_parallel),
        };

        (params, warnings)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            LungError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}

impl From<&ParameterRecord> for ConfigFile {
    fn from(params: &ParameterRecord) -> Self {
        Self {
            image_metadata: ImageMetadataSection {
                species: Some(Value::from(params.species.as_str())),
                magnification: Some(Value::from(params.magnification.as_str())),
                fixed_field: Some(Value::from(params.fixed_field.as_str())),
                scale: Some(Value::from(params.scale)),
            },
            threshold_params: ThresholdSection {
                block_size: Some(Value::from(i64::from(params.block_size))),
                constant: Some(Value::from(params.constant)),
                method: Some(Value::from(params.method.as_str())),
            },
            morphology_params: MorphologySection {
                min_alveolar_size: Some(Value::from(i64::from(params.min_alv_size))),
                max_speckle_size: Some(Value::from(i64::from(params.max_speckle_size))),
            },
            contrast_params: ContrastSection {
                enabled: Some(Value::from(params.contrast.enabled)),
                clip_limit: Some(Value::from(params.contrast.clip_limit)),
                tiles: Some(Value::from(i64::from(params.contrast.tiles))),
            },
            processing: ProcessingSection {
                use_parallel: Some(Value::from(params.use_parallel)),
            },
        }
    }
}

/// Convert a raw value; one of the wrong type is reported and treated as unset
fn typed<T>(
    value: Option<Value>,
    key: &'static str,
    expected: &str,
    convert: impl FnOnce(&Value) -> Option<T>,
    warnings: &mut Vec<ConfigWarning>,
) -> Option<T> {
    let value = value?;
    let converted = convert(&value);
    if converted.is_none() {
        warnings.push(ConfigWarning {
            key,
            message: format!("{} is not {}, using the default", value, expected),
        });
    }
    converted
}

fn as_text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

/// Integers, or floats with no fractional part such as `251.0`
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => Some(*f as i64),
        _ => None,
    }
}

fn non_negative_size(
    value: Option<Value>,
    key: &'static str,
    default: u32,
    warnings: &mut Vec<ConfigWarning>,
) -> u32 {
    match typed(value, key, "an integer", as_integer, warnings) {
        Some(v) if v >= 0 && v <= i64::from(u32::MAX) => v as u32,
        Some(v) => {
            warnings.push(ConfigWarning {
                key,
                message: format!("{} must be a non-negative pixel area, using {}", v, default),
            });
            default
        }
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults_without_warnings() {
        let (params, warnings) = ParameterRecord::from_toml_str("").unwrap();
        assert_eq!(params, ParameterRecord::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn even_block_size_is_replaced_with_default() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[threshold_params]\nblock_size = 250\n",
        )
        .unwrap();
        assert_eq!(params.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].key, "block_size");
    }

    #[test]
    fn too_small_block_size_is_replaced() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[threshold_params]\nblock_size = 1\n",
        )
        .unwrap();
        assert_eq!(params.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_method_falls_back_to_mean() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[threshold_params]\nmethod = \"otsu\"\n",
        )
        .unwrap();
        assert_eq!(params.method, ThresholdMethod::Mean);
        assert_eq!(warnings[0].key, "method");
    }

    #[test]
    fn method_names_are_case_insensitive() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[threshold_params]\nmethod = \"Gaussian\"\n",
        )
        .unwrap();
        assert_eq!(params.method, ThresholdMethod::Gaussian);
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_positive_scale_is_corrected() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[image_metadata]\nscale = -3.0\n",
        )
        .unwrap();
        assert_eq!(params.scale, DEFAULT_SCALE);
        assert_eq!(warnings[0].key, "scale");
    }

    #[test]
    fn integer_values_are_accepted_for_float_keys() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[image_metadata]\nscale = 2\n[threshold_params]\nconstant = 5\n",
        )
        .unwrap();
        assert_eq!(params.scale, 2.0);
        assert_eq!(params.constant, 5.0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn original_section_names_are_accepted() {
        let content = r#"
[Image_Metadata]
Species = "rat"
Scale = 1.5

[Threshold_Params]
Block_Size = 641
Constant = 2

[Morphology_Params]
Min_Alveolar_Size = 300
Max_Speckle_Size = 50
"#;
        let (params, warnings) = ParameterRecord::from_toml_str(content).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(params.species, "rat");
        assert_eq!(params.scale, 1.5);
        assert_eq!(params.block_size, 641);
        assert_eq!(params.constant, 2.0);
        assert_eq!(params.min_alv_size, 300);
        assert_eq!(params.max_speckle_size, 50);
    }

    #[test]
    fn negative_sizes_are_corrected() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[morphology_params]\nmin_alveolar_size = -1\nmax_speckle_size = -7\n",
        )
        .unwrap();
        assert_eq!(params.min_alv_size, DEFAULT_MIN_ALV_SIZE);
        assert_eq!(params.max_speckle_size, DEFAULT_MAX_SPECKLE_SIZE);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn wrongly_typed_values_fall_back_with_warnings() {
        let content = r#"
[threshold_params]
block_size = "251"
method = 3

[contrast_params]
enabled = "yes"
tiles = 2.5

[processing]
use_parallel = 1
"#;
        let (params, warnings) = ParameterRecord::from_toml_str(content).unwrap();
        assert_eq!(params, ParameterRecord::default());
        let keys: Vec<&str> = warnings.iter().map(|w| w.key).collect();
        assert_eq!(keys, ["block_size", "method", "enabled", "tiles", "use_parallel"]);
    }

    #[test]
    fn whole_floats_are_accepted_for_integer_keys() {
        let (params, warnings) = ParameterRecord::from_toml_str(
            "[threshold_params]\nblock_size = 251.0\n[morphology_params]\nmin_alveolar_size = 300.0\n",
        )
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(params.block_size, 251);
        assert_eq!(params.min_alv_size, 300);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(ParameterRecord::from_toml_str("[threshold_params\nblock_size = ").is_err());
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut params = ParameterRecord::default();
        params.method = ThresholdMethod::Median;
        params.block_size = 51;

        ConfigFile::from(&params).save_to_file(&path).unwrap();
        let (loaded, warnings) = ParameterRecord::from_file(&path).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(loaded, params);
    }
}
