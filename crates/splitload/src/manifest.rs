use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use splitload_contracts::FRAGMENT_MANIFEST_SCHEMA_VERSION;

use crate::error::LoaderError;
use crate::numbering::{Numbering, MAX_NUM_ENTRIES};

pub const ENV_MANIFEST: &str = "SPLITLOAD_MANIFEST";

pub const DEFAULT_MODULE_NAME: &str = "app";

fn default_module_name() -> String {
    DEFAULT_MODULE_NAME.to_string()
}

/// Build-time partition metadata consumed by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FragmentManifest {
    pub schema_version: String,
    pub num_entries: u32,
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

impl FragmentManifest {
    pub fn new(num_entries: u32) -> Self {
        Self {
            schema_version: FRAGMENT_MANIFEST_SCHEMA_VERSION.to_string(),
            num_entries,
            module_name: default_module_name(),
        }
    }

    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let manifest: FragmentManifest =
            serde_json::from_slice(bytes).context("parse fragment manifest JSON")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read manifest: {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("load manifest: {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.schema_version != FRAGMENT_MANIFEST_SCHEMA_VERSION {
            return Err(LoaderError::InvalidManifest(format!(
                "schema_version mismatch: expected {FRAGMENT_MANIFEST_SCHEMA_VERSION:?} got {:?}",
                self.schema_version
            )));
        }
        if self.num_entries == 0 {
            return Err(LoaderError::InvalidManifest(
                "num_entries must be >= 1 (1 means the program is not split)".to_string(),
            ));
        }
        if self.num_entries > MAX_NUM_ENTRIES {
            return Err(LoaderError::InvalidManifest(format!(
                "num_entries must be <= {MAX_NUM_ENTRIES} so every fragment number fits in u32 (got {})",
                self.num_entries
            )));
        }
        if self.module_name.trim().is_empty() {
            return Err(LoaderError::InvalidManifest(
                "module_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn numbering(&self) -> Numbering {
        Numbering::new(self.num_entries)
    }

    pub fn is_split(&self) -> bool {
        self.num_entries > 1
    }
}
