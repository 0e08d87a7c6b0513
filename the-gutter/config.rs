//! Margin configuration.
//!
//! Settings live under a `[gutter]` table of a TOML document:
//!
//! ```toml
//! [gutter]
//! format = "%3d "
//! eager = true
//! delay = true
//! idle-delay-ms = 50
//! side = "left"
//! current-symbol = "->"
//! mode = "relative"
//! ```
//!
//! A global and a workspace-local document are merged, local values winning.

use std::{
  fs,
  io::Error as IOError,
  path::Path,
};

use serde::{
  Deserialize,
  Deserializer,
};
use thiserror::Error;
use toml::{
  Value,
  de::Error as TomlError,
};

use crate::{
  host::MarginSide,
  label::{
    CustomFormatter,
    LabelFormat,
    LineNumberMode,
    NumberPattern,
    PatternError,
  },
  scheduler::RefreshPolicy,
};

/// The `format` setting before validation. Anything but `"dynamic"` is taken
/// as a pattern; custom functions can only be set from code.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FormatSetting {
  #[default]
  Dynamic,
  Pattern(String),
  Custom(CustomFormatter),
}

impl<'de> Deserialize<'de> for FormatSetting {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let raw = String::deserialize(deserializer)?;
    Ok(match raw.as_str() {
      "dynamic" => Self::Dynamic,
      _ => Self::Pattern(raw),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct GutterConfig {
  pub format:         FormatSetting,
  /// Refresh after every command instead of only on scroll and line-changing
  /// edits.
  pub eager:          bool,
  /// With `eager`, defer refreshes to idle time.
  pub delay:          bool,
  /// Quiet period before an idle refresh, for hosts using a timer-based idle
  /// queue.
  pub idle_delay_ms:  u64,
  pub side:           MarginSide,
  pub current_symbol: Option<String>,
  pub mode:           LineNumberMode,
}

impl Default for GutterConfig {
  fn default() -> Self {
    Self {
      format:         FormatSetting::Dynamic,
      eager:          true,
      delay:          false,
      idle_delay_ms:  0,
      side:           MarginSide::Left,
      current_symbol: None,
      mode:           LineNumberMode::Relative,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("invalid line number format {pattern:?}: {source}")]
  InvalidFormat {
    pattern: String,
    #[source]
    source:  PatternError,
  },
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
  #[error("bad gutter config: {0}")]
  BadConfig(#[from] TomlError),
  #[error(transparent)]
  Error(#[from] IOError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigRaw {
  gutter: Option<Value>,
}

impl GutterConfig {
  pub fn with_format(mut self, format: FormatSetting) -> Self {
    self.format = format;
    self
  }

  pub fn with_custom_format<F>(self, f: F) -> Self
  where
    F: Fn(usize) -> anyhow::Result<String> + Send + Sync + 'static,
  {
    self.with_format(FormatSetting::Custom(CustomFormatter::new(f)))
  }

  /// Validates the `format` setting.
  pub fn resolve_format(&self) -> Result<LabelFormat, ConfigError> {
    match &self.format {
      FormatSetting::Dynamic => Ok(LabelFormat::Dynamic),
      FormatSetting::Custom(custom) => Ok(LabelFormat::Custom(custom.clone())),
      FormatSetting::Pattern(pattern) => {
        NumberPattern::parse(pattern)
          .map(LabelFormat::Fixed)
          .map_err(|source| {
            ConfigError::InvalidFormat {
              pattern: pattern.clone(),
              source,
            }
          })
      },
    }
  }

  pub fn policy(&self) -> RefreshPolicy {
    RefreshPolicy {
      eager: self.eager,
      delay: self.delay,
    }
  }

  /// Parses one document. A document without a `[gutter]` table yields the
  /// defaults.
  pub fn from_toml_str(source: &str) -> Result<Self, ConfigLoadError> {
    let raw: ConfigRaw = toml::from_str(source)?;
    raw.gutter.map_or_else(|| Ok(Self::default()), Self::from_value)
  }

  /// Merges a global and a workspace-local document. Either may be missing;
  /// a malformed one is an error even when the other loads.
  pub fn load(
    global: Result<String, ConfigLoadError>,
    local: Result<String, ConfigLoadError>,
  ) -> Result<Self, ConfigLoadError> {
    let global: Result<ConfigRaw, ConfigLoadError> =
      global.and_then(|file| toml::from_str(&file).map_err(ConfigLoadError::BadConfig));
    let local: Result<ConfigRaw, ConfigLoadError> =
      local.and_then(|file| toml::from_str(&file).map_err(ConfigLoadError::BadConfig));

    let table = match (global, local) {
      (Err(ConfigLoadError::BadConfig(err)), _) | (_, Err(ConfigLoadError::BadConfig(err))) => {
        return Err(ConfigLoadError::BadConfig(err));
      },
      (Ok(global), Ok(local)) => {
        match (global.gutter, local.gutter) {
          (Some(global), Some(local)) => Some(merge_toml_values(global, local, 3)),
          (global, local) => local.or(global),
        }
      },
      (Ok(config), Err(_)) | (Err(_), Ok(config)) => config.gutter,
      (Err(err), Err(_)) => return Err(err),
    };

    let config = table.map_or_else(|| Ok(Self::default()), Self::from_value)?;
    tracing::debug!(?config, "loaded gutter config");
    Ok(config)
  }

  pub fn load_files(global: &Path, local: &Path) -> Result<Self, ConfigLoadError> {
    let global = fs::read_to_string(global).map_err(ConfigLoadError::Error);
    let local = fs::read_to_string(local).map_err(ConfigLoadError::Error);
    Self::load(global, local)
  }

  fn from_value(value: Value) -> Result<Self, ConfigLoadError> {
    value.try_into().map_err(ConfigLoadError::BadConfig)
  }
}

/// Merges `right` into `left`, recursing into tables up to `merge_depth`
/// levels. Below that depth, and for every non-table value, `right` replaces
/// `left`.
pub fn merge_toml_values(left: Value, right: Value, merge_depth: usize) -> Value {
  match (left, right) {
    (Value::Table(mut left_map), Value::Table(right_map)) if merge_depth > 0 => {
      for (name, rvalue) in right_map {
        let merged = match left_map.remove(&name) {
          Some(lvalue) => merge_toml_values(lvalue, rvalue, merge_depth - 1),
          None => rvalue,
        };
        left_map.insert(name, merged);
      }
      Value::Table(left_map)
    },
    (_, value) => value,
  }
}
