use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{MzError, Result};

// -----------------------------------------------------------------------------
// Build configuration (rc-file shape)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Root directory; module paths and specifiers are keyed relative to it.
    pub from: String,
    #[serde(rename = "buildESM")]
    pub build_esm: bool,
    #[serde(rename = "buildUMD")]
    pub build_umd: bool,
    /// Rewrite `.js` to `.mjs` in ESM specifiers and output paths.
    #[serde(rename = ".mjs")]
    pub mjs: bool,
    pub ignore_unknown_dependency: bool,
    pub ignore_circular_dependency: bool,
    /// `import * as x` instead of `import x` for indirect and substitute imports.
    pub namespace_import: bool,
    /// Fold re-exports into a single `export … from` where possible.
    pub export_default_from: bool,
    /// Seed entries: specifier -> name. Non-string or empty names get generated.
    pub dep_map: IndexMap<String, serde_json::Value>,
    pub index_name: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            from: ".".to_string(),
            build_esm: true,
            build_umd: false,
            mjs: false,
            ignore_unknown_dependency: false,
            ignore_circular_dependency: false,
            namespace_import: true,
            export_default_from: true,
            dep_map: IndexMap::new(),
            index_name: "Index".to_string(),
        }
    }
}

impl BuildConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|err| MzError::Config(err.to_string()))
    }

    /// Accepts either a plain `{ specifier: name }` object or a `package.json`
    /// document carrying the map under `"mz-dependencies"`.
    pub fn dep_map_from_json(json: &str) -> Result<IndexMap<String, serde_json::Value>> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|err| MzError::Config(err.to_string()))?;
        let map = match value.get("mz-dependencies") {
            Some(nested) => nested.clone(),
            None if value.get("name").is_some() && value.get("version").is_some() => {
                return Err(MzError::Config(
                    "package.json is missing an \"mz-dependencies\" object".to_string(),
                ))
            }
            None => value,
        };
        match map {
            serde_json::Value::Object(obj) => Ok(obj.into_iter().collect()),
            _ => Err(MzError::Config("dependency map must be an object".to_string())),
        }
    }
}
