use crate::error::{Result, ServiceError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pseudo-mode holding the values shared by every mode of a layer.
pub const DEFAULT_SECTION: &str = "default";
pub const STANDARD_FIRST_LETTER: &str = "a";
pub const DEFAULT_SUBTYPE_FIELD: &str = "subtype.search";

type Layer = Map<String, Value>;

/// Two layered settings documents: local overrides on top of shipped defaults.
///
/// A key is looked up in `overrides[mode]`, `overrides["default"]`,
/// `defaults[mode]` and `defaults["default"]`, in that order.
pub struct Settings {
    overrides: Layer,
    defaults: Layer,
    profiles: BTreeMap<String, std::result::Result<ModeProfile, String>>,
}

impl Settings {
    pub fn load(overrides: impl AsRef<Path>, defaults: impl AsRef<Path>) -> Result<Self> {
        let overrides = overrides.as_ref();
        let defaults = defaults.as_ref();
        let overrides_doc = if overrides.exists() {
            read_layer(overrides)?
        } else {
            info!(path = %overrides.display(), "no local settings file, using defaults only");
            Value::Object(Map::new())
        };
        let defaults_doc = read_layer(defaults)?;
        Self::from_layers(overrides_doc, defaults_doc)
    }

    pub fn from_layers(overrides: Value, defaults: Value) -> Result<Self> {
        let overrides = into_layer(overrides, "settings")?;
        let defaults = into_layer(defaults, "default settings")?;
        let mut settings = Self {
            overrides,
            defaults,
            profiles: BTreeMap::new(),
        };
        let mut profiles = BTreeMap::new();
        for mode in settings.modes() {
            let profile = ModeProfile::resolve(&settings, &mode).map_err(|err| {
                warn!(%mode, error = %err, "mode settings are incomplete");
                err.to_string()
            });
            profiles.insert(mode, profile);
        }
        settings.profiles = profiles;
        debug!(modes = settings.profiles.len(), "settings loaded");
        Ok(settings)
    }

    /// Every configured mode, excluding the `default` pseudo-mode.
    pub fn modes(&self) -> BTreeSet<String> {
        self.overrides
            .keys()
            .chain(self.defaults.keys())
            .filter(|mode| mode.as_str() != DEFAULT_SECTION)
            .cloned()
            .collect()
    }

    pub fn is_mode(&self, mode: &str) -> bool {
        mode != DEFAULT_SECTION
            && (self.overrides.contains_key(mode) || self.defaults.contains_key(mode))
    }

    /// Resolves `key` for `mode` through the four layers, then `fallback`.
    pub fn resolve(&self, key: &str, mode: &str, fallback: Option<Value>) -> Result<Value> {
        if let Some(value) = self.lookup(key, mode) {
            return Ok(value.clone());
        }
        fallback.ok_or_else(|| ServiceError::missing_key(key, mode))
    }

    pub fn resolve_str(&self, key: &str, mode: &str) -> Result<String> {
        let value = self.resolve(key, mode, None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::invalid_key(key, mode, "a string"))
    }

    pub fn resolve_usize(&self, key: &str, mode: &str) -> Result<usize> {
        let value = self.resolve(key, mode, None)?;
        value_as_usize(&value).ok_or_else(|| ServiceError::invalid_key(key, mode, "a number"))
    }

    pub fn resolve_strings(&self, key: &str, mode: &str) -> Result<Vec<String>> {
        let value = self.resolve(key, mode, None)?;
        value
            .as_array()
            .and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| ServiceError::invalid_key(key, mode, "a list of strings"))
    }

    /// The mode used when a request does not name one.
    pub fn default_mode(&self) -> Result<String> {
        self.resolve_str("mode", DEFAULT_SECTION)
    }

    /// First letter to narrow an overflowing search with, per language.
    pub fn first_letter(&self, lang: &str, mode: &str) -> String {
        self.lookup("first_letter", mode)
            .and_then(|letters| letters.get(lang))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.standard_first_letter())
    }

    fn standard_first_letter(&self) -> String {
        self.lookup("standard_first_letter", DEFAULT_SECTION)
            .and_then(Value::as_str)
            .unwrap_or(STANDARD_FIRST_LETTER)
            .to_string()
    }

    /// The typed profile of a mode, or why it cannot be used.
    pub fn profile(&self, mode: &str) -> Result<&ModeProfile> {
        match self.profiles.get(mode) {
            Some(Ok(profile)) => Ok(profile),
            Some(Err(message)) => Err(ServiceError::Configuration {
                message: message.clone(),
                status: 500,
            }),
            None => Err(ServiceError::unknown_mode(
                mode,
                self.profiles.keys().map(String::as_str),
            )),
        }
    }

    fn lookup(&self, key: &str, mode: &str) -> Option<&Value> {
        [
            (&self.overrides, mode),
            (&self.overrides, DEFAULT_SECTION),
            (&self.defaults, mode),
            (&self.defaults, DEFAULT_SECTION),
        ]
        .into_iter()
        .find_map(|(layer, section)| {
            layer
                .get(section)
                .and_then(Value::as_object)
                .and_then(|values| values.get(key))
        })
    }
}

/// Settings of one mode, resolved once when the settings are loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeProfile {
    pub name: String,
    pub resource: String,
    pub karp_mode: String,
    pub languages: Vec<String>,
    pub source_language: String,
    pub baseform_field: String,
    pub targetform_field: String,
    pub subtype_field: String,
    pub target_sort: String,
    pub max_size: usize,
    pub max_size_export: usize,
    pub overflow_size: usize,
    pub username: String,
    pub password: String,
    pub subtypes_path: PathBuf,
    pub css: Option<String>,
    pub public_url: Option<String>,
    first_letters: BTreeMap<String, String>,
    standard_first_letter: String,
}

impl ModeProfile {
    pub fn resolve(settings: &Settings, mode: &str) -> Result<Self> {
        let optional = |key: &str| -> Result<Option<String>> {
            match settings.resolve(key, mode, Some(Value::Null))? {
                Value::Null => Ok(None),
                Value::String(text) if text.trim().is_empty() => Ok(None),
                Value::String(text) => Ok(Some(text)),
                _ => Err(ServiceError::invalid_key(key, mode, "a string")),
            }
        };
        let first_letters = settings
            .lookup("first_letter", mode)
            .and_then(Value::as_object)
            .map(|letters| {
                letters
                    .iter()
                    .filter_map(|(lang, letter)| {
                        letter.as_str().map(|letter| (lang.clone(), letter.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let subtype_field = settings
            .resolve(
                "subtype.search",
                mode,
                Some(Value::String(DEFAULT_SUBTYPE_FIELD.to_string())),
            )?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::invalid_key("subtype.search", mode, "a string"))?;
        Ok(Self {
            name: mode.to_string(),
            resource: settings.resolve_str("resource", mode)?,
            karp_mode: settings.resolve_str("mode", mode)?,
            languages: settings.resolve_strings("languages", mode)?,
            source_language: settings.resolve_str("sourcelanguage", mode)?,
            baseform_field: settings.resolve_str("baseform.search", mode)?,
            targetform_field: settings.resolve_str("targetform.search", mode)?,
            subtype_field,
            target_sort: settings.resolve_str("targetsort", mode)?,
            max_size: settings.resolve_usize("maxsize", mode)?,
            max_size_export: settings.resolve_usize("maxsize_export", mode)?,
            overflow_size: settings.resolve_usize("overflowsize", mode)?,
            username: settings.resolve_str("username", mode)?,
            password: settings.resolve_str("password", mode)?,
            subtypes_path: PathBuf::from(settings.resolve_str("subtypes", mode)?),
            css: optional("css")?,
            public_url: optional("myurl")?,
            first_letters,
            standard_first_letter: settings.standard_first_letter(),
        })
    }

    pub fn is_source_language(&self, lang: &str) -> bool {
        lang == self.source_language
    }

    pub fn supports_language(&self, lang: &str) -> bool {
        self.languages.iter().any(|known| known == lang)
    }

    /// Search field holding the words of `lang`.
    pub fn word_field(&self, lang: &str) -> &str {
        if self.is_source_language(lang) {
            &self.baseform_field
        } else {
            &self.targetform_field
        }
    }

    /// Karp sort field to force for `lang`, if any.
    pub fn sort_for(&self, lang: &str) -> Option<&str> {
        (!self.is_source_language(lang)).then_some(self.target_sort.as_str())
    }

    pub fn first_letter(&self, lang: &str) -> &str {
        self.first_letters
            .get(lang)
            .map(String::as_str)
            .unwrap_or(&self.standard_first_letter)
    }
}

fn read_layer(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).map_err(|err| ServiceError::Configuration {
        message: format!("Cannot read settings file {}: {err}", path.display()),
        status: 500,
    })?;
    serde_json::from_str(&raw).map_err(|err| ServiceError::Configuration {
        message: format!("Cannot parse settings file {}: {err}", path.display()),
        status: 500,
    })
}

fn into_layer(value: Value, label: &str) -> Result<Layer> {
    match value {
        Value::Object(layer) => Ok(layer),
        _ => Err(ServiceError::Configuration {
            message: format!("The {label} document must be a JSON object"),
            status: 500,
        }),
    }
}

fn value_as_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().map(|n| n as usize),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
