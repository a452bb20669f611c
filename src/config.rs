//! Layered configuration store.
//!
//! One [`Config`] is built at process start from an embedded default source,
//! then extended by reading extra INI or TOML files in caller order; later
//! sources override earlier ones at the leaf level. The merged tree is a
//! plain `serde_json::Value`, queried through typed accessors.
//!
//! There is no global singleton: the built `Config` is shared by `Arc` and
//! injected into every component that needs it.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Default configuration embedded in the binary. Always read first.
pub const DEFAULT_INI: &str = include_str!("../conf/default.ini");

/// Merged, queryable configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    tree: Value,
}

impl Config {
    /// Builds a configuration holding only the embedded defaults.
    pub fn from_default() -> Result<Self, ConfigError> {
        let mut config = Config {
            tree: Value::Object(Map::new()),
        };
        config
            .overlay_ini(DEFAULT_INI)
            .map_err(|e| ConfigError::InvalidDefault(e.to_string()))?;
        Ok(config)
    }

    /// Overlays the given files onto the current tree, in order; the last
    /// file wins at the leaf level. Files missing on disk are skipped
    /// without error. Returns the list of files actually read.
    pub fn read<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Vec<PathBuf>, ConfigError> {
        let mut read_files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                debug!(path = %path.display(), "configuration file not found, skipped");
                continue;
            }
            let source = self.load_file(path)?;
            self.tree = Self::merge(&self.tree, &source);
            read_files.push(path.to_path_buf());
        }
        Ok(read_files)
    }

    /// Overlays an INI document given as text.
    pub fn overlay_ini(&mut self, text: &str) -> Result<(), ConfigError> {
        let source = parse_ini(text, Path::new("<inline>"))?;
        self.tree = Self::merge(&self.tree, &source);
        Ok(())
    }

    /// Overlays a TOML document given as text.
    pub fn overlay_toml(&mut self, text: &str) -> Result<(), ConfigError> {
        let source = parse_toml(text, Path::new("<inline>"))?;
        self.tree = Self::merge(&self.tree, &source);
        Ok(())
    }

    fn load_file(&self, path: &Path) -> Result<Value, ConfigError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        match extension.as_str() {
            "ini" => parse_ini(&text, path),
            "toml" => parse_toml(&text, path),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }

    /// Recursively merges `new` into `old`, `new` winning.
    ///
    /// Two maps merge key by key. Two sequences are unioned as a set,
    /// duplicates dropped, old items first. Anything else, including
    /// mismatched types, is replaced by `new` without coercion.
    pub fn merge(old: &Value, new: &Value) -> Value {
        match (old, new) {
            (Value::Object(old_map), Value::Object(new_map)) => {
                let mut merged = old_map.clone();
                for (key, new_value) in new_map {
                    let value = match old_map.get(key) {
                        Some(old_value) => Self::merge(old_value, new_value),
                        None => new_value.clone(),
                    };
                    merged.insert(key.clone(), value);
                }
                Value::Object(merged)
            }
            (Value::Array(old_items), Value::Array(new_items)) => {
                let mut union = old_items.clone();
                for item in new_items {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
                Value::Array(union)
            }
            _ => new.clone(),
        }
    }

    /// Full merged tree, mainly for diagnostics.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Raw value of an option, rendered as a string. `None` when the
    /// section or option is absent or holds a non-scalar.
    pub fn get(&self, section: &str, option: &str) -> Option<String> {
        match self.tree.get(section)?.get(option)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// String value with a fallback default.
    pub fn get_str(&self, section: &str, option: &str, fallback: &str) -> String {
        self.get(section, option)
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Integer value with a fallback default; a present but unparsable
    /// value is a [`ConfigError`].
    pub fn get_int(&self, section: &str, option: &str, fallback: i64) -> Result<i64, ConfigError> {
        match self.get(section, option) {
            None => Ok(fallback),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| Self::coercion(section, option, "integer", &raw)),
        }
    }

    /// Float value with a fallback default.
    pub fn get_float(
        &self,
        section: &str,
        option: &str,
        fallback: f64,
    ) -> Result<f64, ConfigError> {
        match self.get(section, option) {
            None => Ok(fallback),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| Self::coercion(section, option, "float", &raw)),
        }
    }

    /// Boolean value with a fallback default. Accepts true/false, yes/no,
    /// on/off and 1/0, case-insensitive.
    pub fn get_bool(
        &self,
        section: &str,
        option: &str,
        fallback: bool,
    ) -> Result<bool, ConfigError> {
        match self.get(section, option) {
            None => Ok(fallback),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(Self::coercion(section, option, "boolean", &raw)),
            },
        }
    }

    /// Path value, `None` when absent or empty.
    pub fn get_path(&self, section: &str, option: &str) -> Option<PathBuf> {
        let raw = self.get(section, option)?;
        if raw.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(raw))
    }

    fn coercion(section: &str, option: &str, expected: &'static str, value: &str) -> ConfigError {
        ConfigError::Coercion {
            section: section.to_string(),
            option: option.to_string(),
            expected,
            value: value.to_string(),
        }
    }
}

/// Parses an INI document into a two-level tree and expands
/// `${section:option}` / `${option}` interpolations within it.
fn parse_ini(text: &str, path: &Path) -> Result<Value, ConfigError> {
    let ini = ini::Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut tree = Map::new();
    for (section, properties) in ini.iter() {
        let mut options = Map::new();
        for (key, value) in properties.iter() {
            options.insert(key.to_string(), Value::String(value.to_string()));
        }
        match section {
            Some(name) => {
                tree.insert(name.to_string(), Value::Object(options));
            }
            None => {
                // Sectionless options land at the top level.
                for (key, value) in options {
                    tree.insert(key, value);
                }
            }
        }
    }
    interpolate(Value::Object(tree))
}

/// Parses a TOML document into the same nested tree shape.
fn parse_toml(text: &str, path: &Path) -> Result<Value, ConfigError> {
    let parsed: toml::Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    serde_json::to_value(parsed).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Expands `${section:option}` and same-section `${option}` references.
/// References may chain; anything still unresolved after a bounded number
/// of passes is an error so a typo cannot loop forever.
fn interpolate(tree: Value) -> Result<Value, ConfigError> {
    let Ok(pattern) =
        Regex::new(r"\$\{(?:(?P<section>[A-Za-z0-9_.-]+):)?(?P<option>[A-Za-z0-9_.-]+)\}")
    else {
        return Ok(tree);
    };

    let Value::Object(mut sections) = tree else {
        return Ok(tree);
    };

    for _ in 0..10 {
        let snapshot = sections.clone();
        let mut changed = false;
        for (section_name, section) in sections.iter_mut() {
            let Value::Object(options) = section else {
                continue;
            };
            for value in options.values_mut() {
                let Value::String(text) = value else {
                    continue;
                };
                if !text.contains("${") {
                    continue;
                }
                let mut replaced = text.clone();
                for capture in pattern.captures_iter(text) {
                    let target_section = capture
                        .name("section")
                        .map(|m| m.as_str())
                        .unwrap_or(section_name);
                    let option = &capture["option"];
                    if let Some(Value::String(resolved)) =
                        snapshot.get(target_section).and_then(|s| s.get(option))
                    {
                        // References to still-unresolved values wait for
                        // the next pass.
                        if !resolved.contains("${") {
                            replaced = replaced.replace(&capture[0], resolved);
                        }
                    }
                }
                if replaced != *text {
                    *value = Value::String(replaced);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Anything still carrying a reference is a configuration mistake.
    for (section_name, section) in &sections {
        let Value::Object(options) = section else {
            continue;
        };
        for (option_name, value) in options {
            if let Value::String(text) = value {
                if let Some(capture) = pattern.captures(text) {
                    warn!(
                        section = %section_name,
                        option = %option_name,
                        "unresolvable interpolation in configuration"
                    );
                    return Err(ConfigError::Interpolation {
                        section: section_name.clone(),
                        option: option_name.clone(),
                        reference: capture[0].to_string(),
                    });
                }
            }
        }
    }

    Ok(Value::Object(sections))
}
