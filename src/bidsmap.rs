// 🗺️ Bidsmap - The heuristics document
// Data-format sections with per-category run-item lists, plus options

use crate::category::Category;
use crate::error::{BidsmapError, Result};
use crate::expression::{coerce_to_string, ValueExpression};
use crate::template::EntityTemplate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Free-form options of one provider
pub type ProviderOptions = IndexMap<String, serde_yaml::Value>;

// ============================================================================
// RUN ITEM
// ============================================================================

/// One map entry: attribute patterns of a source item and its target labels
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunItem {
    /// Identity of the source item this entry was derived from
    #[serde(default, deserialize_with = "string_value")]
    pub provenance: String,

    /// Attribute name → pattern, in declaration order
    #[serde(default, deserialize_with = "string_map")]
    pub attributes: IndexMap<String, String>,

    /// Entity key → value expression, including `suffix`
    #[serde(default)]
    pub bids: IndexMap<String, ValueExpression>,

    #[serde(default)]
    pub meta: IndexMap<String, ValueExpression>,
}

impl RunItem {
    /// New run-item with empty attribute patterns and the category's entity keys
    pub fn from_template(provenance: impl Into<String>, category: Category, attribute_keys: &[&str]) -> Self {
        RunItem {
            provenance: provenance.into(),
            attributes: attribute_keys
                .iter()
                .map(|key| (key.to_string(), String::new()))
                .collect(),
            bids: EntityTemplate::for_category(category).empty_bids(),
            meta: IndexMap::new(),
        }
    }

    /// True if no attribute pattern has a value
    pub fn has_empty_attributes(&self) -> bool {
        self.attributes.values().all(|pattern| pattern.is_empty())
    }

    /// Bids value as written in the map, empty if the entity is absent
    pub fn bids_value(&self, key: &str) -> String {
        self.bids.get(key).map(|value| value.to_string()).unwrap_or_default()
    }
}

// ============================================================================
// DATA FORMAT SECTION
// ============================================================================

fn default_subject() -> ValueExpression {
    ValueExpression::parse("<<SourceFilePath>>")
}

fn default_session() -> ValueExpression {
    ValueExpression::parse("<<SourceFilePath>>")
}

/// Run-items of one source data format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormatSection {
    #[serde(default = "default_subject")]
    pub subject: ValueExpression,

    #[serde(default = "default_session")]
    pub session: ValueExpression,

    /// One ordered run-item list per category
    #[serde(flatten, deserialize_with = "category_lists")]
    pub runs: IndexMap<Category, Vec<RunItem>>,
}

impl DataFormatSection {
    pub fn new() -> Self {
        DataFormatSection {
            subject: default_subject(),
            session: default_session(),
            runs: Category::PRIORITY.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }

    /// Run-items of a category (empty if the category has none)
    pub fn runs(&self, category: Category) -> &[RunItem] {
        self.runs.get(&category).map(|runs| runs.as_slice()).unwrap_or(&[])
    }

    /// Mutable run-item list of a category, created on first use
    pub fn runs_mut(&mut self, category: Category) -> &mut Vec<RunItem> {
        self.runs.entry(category).or_default()
    }

    /// Make sure every category has a list, in canonical order
    fn normalize(&mut self) {
        let mut runs = std::mem::take(&mut self.runs);
        for category in Category::PRIORITY {
            self.runs.insert(category, runs.shift_remove(&category).unwrap_or_default());
        }
    }
}

impl Default for DataFormatSection {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Engine version that wrote the map
    #[serde(default = "Options::default_version")]
    pub version: String,

    /// Prefix of subject folders in the source tree
    #[serde(default = "Options::default_subprefix")]
    pub subprefix: String,

    /// Prefix of session folders in the source tree
    #[serde(default = "Options::default_sesprefix")]
    pub sesprefix: String,

    /// Glob patterns of source items to skip
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Per-provider options, keyed by plugin name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderOptions>,
}

impl Options {
    fn default_version() -> String {
        crate::VERSION.to_string()
    }

    fn default_subprefix() -> String {
        "sub-".to_string()
    }

    fn default_sesprefix() -> String {
        "ses-".to_string()
    }

    /// Compile the ignore list
    pub fn ignore_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            version: Self::default_version(),
            subprefix: Self::default_subprefix(),
            sesprefix: Self::default_sesprefix(),
            ignore: Vec::new(),
            providers: IndexMap::new(),
        }
    }
}

// ============================================================================
// BIDSMAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bidsmap {
    #[serde(rename = "Options", default)]
    pub options: Options,

    /// Active providers, by plugin name
    #[serde(rename = "Plugins", default)]
    pub plugins: Vec<String>,

    /// Data-format name → section
    #[serde(flatten)]
    pub dataformats: IndexMap<String, DataFormatSection>,
}

impl Bidsmap {
    pub fn new() -> Self {
        Bidsmap {
            options: Options::default(),
            plugins: Vec::new(),
            dataformats: IndexMap::new(),
        }
    }

    pub fn section(&self, dataformat: &str) -> Option<&DataFormatSection> {
        self.dataformats.get(dataformat)
    }

    /// Section of a data format, created on first use
    pub fn section_mut(&mut self, dataformat: &str) -> &mut DataFormatSection {
        self.dataformats.entry(dataformat.to_string()).or_default()
    }

    /// Load a map document
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| BidsmapError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut bidsmap = Self::from_yaml(&content).map_err(|e| BidsmapError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if bidsmap.options.version != crate::VERSION {
            warn!(
                "{} was written by version {}, this is {}",
                path.display(),
                bidsmap.options.version,
                crate::VERSION
            );
        }
        bidsmap.normalize();

        info!("Loaded bidsmap from {}", path.display());
        Ok(bidsmap)
    }

    /// Parse a map document from YAML text
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let mut bidsmap: Bidsmap = serde_yaml::from_str(content)?;
        bidsmap.normalize();
        Ok(bidsmap)
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Write the map and verify it can be read back.
    ///
    /// A failed read-back triggers exactly one rewrite before giving up.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_yaml().map_err(|e| BidsmapError::Persistence {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BidsmapError::Persistence {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let mut last_error = String::new();
        for attempt in 1..=2 {
            if let Err(e) = fs::write(path, &content) {
                last_error = e.to_string();
                warn!("Writing {} failed (attempt {}): {}", path.display(), attempt, e);
                continue;
            }
            match Self::load(path) {
                Ok(_) => {
                    info!("Saved bidsmap to {}", path.display());
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Reloading {} failed (attempt {}): {}", path.display(), attempt, e);
                }
            }
        }

        Err(BidsmapError::Persistence {
            path: path.to_path_buf(),
            message: last_error,
        })
    }

    fn normalize(&mut self) {
        for (dataformat, section) in self.dataformats.iter_mut() {
            debug!("Normalizing section {}", dataformat);
            section.normalize();
        }
    }
}

impl Default for Bidsmap {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

fn string_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(coerce_to_string(&value))
}

/// Attribute patterns may be written as numbers or lists; compare them as text
fn string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<IndexMap<String, String>, D::Error> {
    let raw: IndexMap<String, serde_yaml::Value> = Option::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(key, value)| (key, coerce_to_string(&value)))
        .collect())
}

/// A category key with a null value (`anat:` in YAML) is an empty list
fn category_lists<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<IndexMap<Category, Vec<RunItem>>, D::Error> {
    let raw: IndexMap<Category, Option<Vec<RunItem>>> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(category, runs)| (category, runs.unwrap_or_default()))
        .collect())
}

// ============================================================================
// TESTS
// ============================================================================
