//! Chart definition and loading
//!
//! A chart is a `Chart.yaml` metadata file, a `values.yaml` of declared
//! defaults and a `templates/` directory. Charts are loaded either from a
//! `.tgz` archive (as pulled from a registry) or from an unpacked directory.

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use walkdir::WalkDir;

use crate::archive::read_archive;
use crate::error::{CoreError, Result};
use crate::values::Values;

/// Values key a chart uses to declare the namespace it installs into
pub const DEFAULT_NAMESPACE_KEY: &str = "defaultNamespace";

const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";
const TEMPLATES_DIR: &str = "templates/";

/// Chart metadata from `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    pub version: Version,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Annotations
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

/// A loaded chart
#[derive(Debug, Clone)]
pub struct Chart {
    /// Chart metadata
    pub metadata: ChartMetadata,

    /// Declared default values
    pub values: Values,

    /// Template sources keyed by path relative to `templates/`
    pub templates: BTreeMap<String, String>,
}

impl Chart {
    /// Load a chart from a `.tgz` archive in memory
    pub fn from_archive(data: &[u8]) -> Result<Self> {
        let files = read_archive(data)?;
        Self::from_files(files)
    }

    /// Load a chart from a directory or a `.tgz` file on disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        if path.is_dir() {
            Self::from_files(collect_dir(path)?)
        } else {
            let data = std::fs::read(path)?;
            Self::from_archive(&data)
        }
    }

    /// Build a chart from its files
    ///
    /// Archives conventionally wrap everything in a `<chart-name>/` directory;
    /// when `Chart.yaml` is not at the root, that single prefix is stripped.
    pub fn from_files(files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let files = strip_chart_root(files)?;

        let chart_yaml = files.get(CHART_FILE).ok_or_else(|| CoreError::InvalidChart {
            message: format!("{} not found", CHART_FILE),
        })?;
        let metadata: ChartMetadata = serde_yaml::from_slice(chart_yaml)?;
        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart name is empty".to_string(),
            });
        }

        let values = match files.get(VALUES_FILE) {
            Some(content) => Values::from_yaml(&utf8(VALUES_FILE, content)?)?,
            None => Values::new(),
        };
        if !values.inner().is_object() {
            return Err(CoreError::InvalidChart {
                message: format!("{} must be a mapping", VALUES_FILE),
            });
        }

        let mut templates = BTreeMap::new();
        for (path, content) in &files {
            if let Some(rel) = path.strip_prefix(TEMPLATES_DIR) {
                templates.insert(rel.to_string(), utf8(path, content)?);
            }
        }

        let chart = Self {
            metadata,
            values,
            templates,
        };
        chart.validate_default_namespace()?;
        Ok(chart)
    }

    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Chart version
    pub fn version(&self) -> &Version {
        &self.metadata.version
    }

    /// Namespace declared by the chart's `defaultNamespace` value, if any
    pub fn default_namespace(&self) -> Option<&str> {
        self.values
            .get_key(DEFAULT_NAMESPACE_KEY)
            .and_then(JsonValue::as_str)
    }

    fn validate_default_namespace(&self) -> Result<()> {
        match self.values.get_key(DEFAULT_NAMESPACE_KEY) {
            None | Some(JsonValue::String(_)) => Ok(()),
            Some(other) => Err(CoreError::InvalidChart {
                message: format!(
                    "chart {} declares {} as {}, expected a string",
                    self.metadata.name,
                    DEFAULT_NAMESPACE_KEY,
                    json_type_name(other)
                ),
            }),
        }
    }
}

fn strip_chart_root(files: BTreeMap<String, Vec<u8>>) -> Result<BTreeMap<String, Vec<u8>>> {
    if files.contains_key(CHART_FILE) {
        return Ok(files);
    }

    let root = files
        .keys()
        .find_map(|path| {
            path.strip_suffix(CHART_FILE)
                .filter(|prefix| prefix.matches('/').count() == 1 && prefix.ends_with('/'))
                .map(str::to_string)
        })
        .ok_or_else(|| CoreError::InvalidChart {
            message: format!("{} not found", CHART_FILE),
        })?;

    Ok(files
        .into_iter()
        .filter_map(|(path, content)| {
            path.strip_prefix(&root)
                .map(|rel| (rel.to_string(), content))
        })
        .collect())
}

/// Read every file under `root`, keyed by its `/`-separated relative path
///
/// Symlinked directories are not descended into.
fn collect_dir(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, std::fs::read(path)?);
        }
    }

    Ok(files)
}

fn utf8(path: &str, content: &[u8]) -> Result<String> {
    String::from_utf8(content.to_vec()).map_err(|e| CoreError::InvalidChart {
        message: format!("{} is not valid UTF-8: {}", path, e),
    })
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}
