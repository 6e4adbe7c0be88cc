// 🏗️ Data Sources - Attribute access to concrete source items
// Providers are plain trait objects picked by name from the map's plugin list

use crate::bidsmap::{Options, ProviderOptions};
use crate::error::{BidsmapError, Result};
use crate::expression::{quote, sanitize, ValueExpression};
use anyhow::Context;
use globset::GlobSet;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

// ============================================================================
// DATA SOURCE
// ============================================================================

/// One source item as seen by the classifier.
///
/// `attribute` never fails: a missing or unreadable attribute is an empty
/// string.
pub trait DataSource {
    /// Opaque identity of the source item
    fn provenance(&self) -> &str;

    /// Name of the data-format section that describes this item
    fn dataformat(&self) -> &str;

    /// Value of a named attribute, empty if unavailable
    fn attribute(&self, name: &str) -> String;

    /// Location of the item, when it has one
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Derive the `sub-`/`ses-` identifiers of this item
    fn subject_and_session_ids(
        &self,
        subject: &ValueExpression,
        session: &ValueExpression,
        options: &Options,
    ) -> (String, String) {
        subject_session_ids(self, subject, session, options)
    }
}

/// Derive subject and session identifiers for a source item.
///
/// Immediate and literal expressions resolve against the source. A deferred
/// expression takes the first path component that starts with the configured
/// source prefix. The results carry the `sub-`/`ses-` prefix, or are empty.
pub fn subject_session_ids<S: DataSource + ?Sized>(
    source: &S,
    subject: &ValueExpression,
    session: &ValueExpression,
    options: &Options,
) -> (String, String) {
    let subject_id = derive_id(source, subject, &options.subprefix, "sub-");
    let session_id = derive_id(source, session, &options.sesprefix, "ses-");
    (subject_id, session_id)
}

fn derive_id<S: DataSource + ?Sized>(
    source: &S,
    expr: &ValueExpression,
    source_prefix: &str,
    bids_prefix: &str,
) -> String {
    let raw = match expr {
        ValueExpression::Literal(text) => text.clone(),
        ValueExpression::Immediate(name) => source.attribute(name),
        ValueExpression::Deferred(_) => source
            .path()
            .and_then(|path| folder_with_prefix(path, source_prefix))
            .unwrap_or_default(),
    };

    let raw = raw.trim();
    let stripped = if source_prefix.is_empty() {
        raw
    } else {
        raw.strip_prefix(source_prefix).unwrap_or(raw)
    };
    let stripped = stripped.strip_prefix(bids_prefix).unwrap_or(stripped);

    let label = sanitize(stripped);
    if label.is_empty() {
        String::new()
    } else {
        format!("{}{}", bids_prefix, label)
    }
}

fn folder_with_prefix(path: &Path, prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    let parent = path.parent()?;
    parent
        .components()
        .filter_map(|component| component.as_os_str().to_str())
        .find(|name| name.starts_with(prefix))
        .map(|name| name.to_string())
}

// ============================================================================
// IN-MEMORY SOURCE
// ============================================================================

/// A source item whose attributes are already known
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    provenance: String,
    dataformat: String,
    path: Option<PathBuf>,
    attributes: HashMap<String, String>,
}

impl AttributeTable {
    pub fn new(provenance: impl Into<String>, dataformat: impl Into<String>) -> Self {
        let provenance = provenance.into();
        AttributeTable {
            path: Some(PathBuf::from(&provenance)),
            provenance,
            dataformat: dataformat.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder: add an attribute value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl DataSource for AttributeTable {
    fn provenance(&self) -> &str {
        &self.provenance
    }

    fn dataformat(&self) -> &str {
        &self.dataformat
    }

    fn attribute(&self, name: &str) -> String {
        self.attributes.get(name).cloned().unwrap_or_default()
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// Capability interface of a source-format reader
pub trait SourceProvider: Send + Sync {
    /// Name under which the provider is listed in the map
    fn name(&self) -> &str;

    /// Data format of `path`, or None if this provider cannot read it
    fn dataformat(&self, path: &Path) -> Option<String>;

    /// Attribute value of `path`, empty on any failure
    fn attribute(&self, path: &Path, name: &str) -> String;
}

/// A source file read through a provider
pub struct SourceFile<'a> {
    path: PathBuf,
    provenance: String,
    dataformat: String,
    provider: &'a dyn SourceProvider,
}

impl DataSource for SourceFile<'_> {
    fn provenance(&self) -> &str {
        &self.provenance
    }

    fn dataformat(&self) -> &str {
        &self.dataformat
    }

    fn attribute(&self, name: &str) -> String {
        self.provider.attribute(&self.path, name)
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Build a provider from its plugin name
pub fn get_provider(name: &str, options: Option<&ProviderOptions>) -> Result<Box<dyn SourceProvider>> {
    match name {
        SidecarProvider::NAME => Ok(Box::new(match options {
            Some(options) => SidecarProvider::from_options(options),
            None => SidecarProvider::new(),
        })),
        other => Err(BidsmapError::UnknownProvider(other.to_string())),
    }
}

/// The active providers plus the ignore list
pub struct ProviderRegistry {
    providers: Vec<Box<dyn SourceProvider>>,
    ignore: GlobSet,
}

impl ProviderRegistry {
    /// Create a registry without providers that ignores nothing
    pub fn new() -> Self {
        ProviderRegistry {
            providers: Vec::new(),
            ignore: GlobSet::empty(),
        }
    }

    /// Instantiate every listed plugin with its options
    pub fn from_plugins(plugins: &[String], options: &Options) -> Result<Self> {
        let mut registry = ProviderRegistry {
            providers: Vec::new(),
            ignore: options.ignore_set()?,
        };
        for name in plugins {
            registry.providers.push(get_provider(name, options.providers.get(name))?);
        }
        Ok(registry)
    }

    pub fn with_provider(mut self, provider: Box<dyn SourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let by_name = path
            .file_name()
            .map(|name| self.ignore.is_match(Path::new(name)))
            .unwrap_or(false);
        by_name || self.ignore.is_match(path)
    }

    /// Open `path` with the first provider that can read it
    pub fn datasource(&self, path: &Path) -> Option<SourceFile<'_>> {
        if self.is_ignored(path) {
            debug!("Ignoring {}", path.display());
            return None;
        }

        for provider in &self.providers {
            if let Some(dataformat) = provider.dataformat(path) {
                return Some(SourceFile {
                    path: path.to_path_buf(),
                    provenance: path.to_string_lossy().to_string(),
                    dataformat,
                    provider: provider.as_ref(),
                });
            }
        }

        debug!("No provider can read {}", path.display());
        None
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// JSON SIDECAR PROVIDER
// ============================================================================

struct CachedTable {
    path: PathBuf,
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Reads attributes from flat JSON objects (header dumps, converter sidecars).
///
/// The last parsed file is kept in a single-slot cache owned by the provider.
pub struct SidecarProvider {
    extension: String,
    dataformat: String,
    cache: Mutex<Option<CachedTable>>,
}

impl SidecarProvider {
    pub const NAME: &'static str = "sidecar";

    pub fn new() -> Self {
        SidecarProvider {
            extension: ".json".to_string(),
            dataformat: "JSON".to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Options: `extension` (default `.json`), `dataformat` (default `JSON`)
    pub fn from_options(options: &ProviderOptions) -> Self {
        let mut provider = Self::new();
        if let Some(extension) = options.get("extension").and_then(|v| v.as_str()) {
            provider.extension = extension.to_string();
        }
        if let Some(dataformat) = options.get("dataformat").and_then(|v| v.as_str()) {
            provider.dataformat = dataformat.to_string();
        }
        provider
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.to_string_lossy()
            .to_lowercase()
            .ends_with(&self.extension.to_lowercase())
    }

    fn load(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sidecar: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sidecar JSON: {}", path.display()))?;
        match value {
            serde_json::Value::Object(attributes) => Ok(attributes),
            _ => Err(anyhow::anyhow!("Sidecar is not a JSON object: {}", path.display())),
        }
    }

    fn with_table<T>(
        &self,
        path: &Path,
        read: impl FnOnce(&serde_json::Map<String, serde_json::Value>) -> T,
    ) -> anyhow::Result<T> {
        let mut slot = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let cached = matches!(slot.as_ref(), Some(table) if table.path.as_path() == path);
        if !cached {
            let attributes = Self::load(path)?;
            *slot = Some(CachedTable {
                path: path.to_path_buf(),
                attributes,
            });
        }

        match slot.as_ref() {
            Some(table) => Ok(read(&table.attributes)),
            None => Err(anyhow::anyhow!("Sidecar cache is empty")),
        }
    }
}

impl Default for SidecarProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceProvider for SidecarProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dataformat(&self, path: &Path) -> Option<String> {
        if !self.has_extension(path) || !path.is_file() {
            return None;
        }
        match self.with_table(path, |_| ()) {
            Ok(()) => Some(self.dataformat.clone()),
            Err(err) => {
                debug!("{:#}", err);
                None
            }
        }
    }

    fn attribute(&self, path: &Path, name: &str) -> String {
        match self.with_table(path, |attributes| attributes.get(name).map(json_to_string)) {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!("Could not read attribute {} from {}: {:#}", name, path.display(), err);
                String::new()
            }
        }
    }
}

/// String form of a JSON value, using list literals for arrays
fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(text) => quote(text),
                    serde_json::Value::Null => "None".to_string(),
                    other => json_to_string(other),
                })
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sidecar(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sidecar_attributes() {
        let tmp = TempDir::new().unwrap();
        let path = write_sidecar(
            tmp.path(),
            "sub-01/ses-02/t1.json",
            r#"{"SeriesDescription": "T1_MPRAGE", "EchoTime": 0.0029, "ImageType": ["ORIGINAL", "PRIMARY"], "Empty": null}"#,
        );

        let provider = SidecarProvider::new();
        assert_eq!(provider.dataformat(&path), Some("JSON".to_string()));
        assert_eq!(provider.attribute(&path, "SeriesDescription"), "T1_MPRAGE");
        assert_eq!(provider.attribute(&path, "EchoTime"), "0.0029");
        assert_eq!(provider.attribute(&path, "ImageType"), "['ORIGINAL', 'PRIMARY']");
        assert_eq!(provider.attribute(&path, "Empty"), "");
        assert_eq!(provider.attribute(&path, "Missing"), "");
    }

    #[test]
    fn test_cache_follows_the_last_file() {
        let tmp = TempDir::new().unwrap();
        let first = write_sidecar(tmp.path(), "a.json", r#"{"ProtocolName": "first"}"#);
        let second = write_sidecar(tmp.path(), "b.json", r#"{"ProtocolName": "second"}"#);

        let provider = SidecarProvider::new();
        assert_eq!(provider.attribute(&first, "ProtocolName"), "first");
        assert_eq!(provider.attribute(&second, "ProtocolName"), "second");
        assert_eq!(provider.attribute(&first, "ProtocolName"), "first");
    }

    #[test]
    fn test_unreadable_sidecar_yields_empty_values() {
        let tmp = TempDir::new().unwrap();
        let broken = write_sidecar(tmp.path(), "broken.json", "{not json");

        let provider = SidecarProvider::new();
        assert_eq!(provider.dataformat(&broken), None);
        assert_eq!(provider.attribute(&broken, "ProtocolName"), "");
        assert_eq!(provider.dataformat(&tmp.path().join("missing.json")), None);
    }

    #[test]
    fn test_registry_picks_provider_and_skips_ignored() {
        let tmp = TempDir::new().unwrap();
        let keep = write_sidecar(tmp.path(), "sub-01/run.json", r#"{"ProtocolName": "rest"}"#);
        let skip = write_sidecar(tmp.path(), "sub-01/localizer.json", r#"{"ProtocolName": "loc"}"#);

        let mut options = Options::default();
        options.ignore = vec!["*localizer*".to_string()];
        let registry = ProviderRegistry::from_plugins(&["sidecar".to_string()], &options).unwrap();

        let source = registry.datasource(&keep).unwrap();
        assert_eq!(source.dataformat(), "JSON");
        assert_eq!(source.attribute("ProtocolName"), "rest");
        assert_eq!(source.provenance(), keep.to_string_lossy());

        assert!(registry.datasource(&skip).is_none());
        assert!(registry.datasource(&tmp.path().join("notes.txt")).is_none());
    }

    #[test]
    fn test_unknown_plugin_is_rejected() {
        let result = ProviderRegistry::from_plugins(&["twix".to_string()], &Options::default());
        assert!(matches!(result, Err(BidsmapError::UnknownProvider(ref name)) if name == "twix"));
    }

    #[test]
    fn test_subject_session_from_path() {
        let source = AttributeTable::new("/raw/sub-003/ses-mri01/007/img.dcm", "DICOM");
        let deferred = ValueExpression::parse("<<SourceFilePath>>");
        let ids = source.subject_and_session_ids(&deferred, &deferred, &Options::default());
        assert_eq!(ids, ("sub-003".to_string(), "ses-mri01".to_string()));
    }

    #[test]
    fn test_subject_session_from_attributes() {
        let source = AttributeTable::new("/raw/001.dcm", "DICOM")
            .with("PatientID", "sub-pat_07")
            .with("StudyID", "");
        let ids = source.subject_and_session_ids(
            &ValueExpression::parse("<PatientID>"),
            &ValueExpression::parse("<StudyID>"),
            &Options::default(),
        );
        assert_eq!(ids, ("sub-pat07".to_string(), String::new()));
    }

    #[test]
    fn test_subject_with_custom_prefix() {
        let source = AttributeTable::new("/raw/P_42/scan.dcm", "DICOM");
        let mut options = Options::default();
        options.subprefix = "P_".to_string();
        let deferred = ValueExpression::parse("<<SourceFilePath>>");
        let (subject, session) = source.subject_and_session_ids(&deferred, &ValueExpression::default(), &options);
        assert_eq!(subject, "sub-42");
        assert_eq!(session, "");
    }
}
