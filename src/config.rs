//! Engine configuration
//!
//! Read from `tabula.yaml` at the data root. Every key is optional:
//!
//! ```yaml
//! page_size: 100
//! preview_limit: 100
//! scan_batch_size: 500
//! csv_delimiter: ";"
//! csv_bom: true
//! inference_sample_rows: 50
//! max_chart_buckets: 10000
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file inside a data root
pub const CONFIG_FILE: &str = "tabula.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Default page size for entry listings and filter results
    pub page_size: usize,
    /// Number of entries a chart preview aggregates over
    pub preview_limit: usize,
    /// Batch size used when walking every entry of a table
    pub scan_batch_size: usize,
    /// Field delimiter for CSV export
    pub csv_delimiter: char,
    /// Prefix CSV exports with a UTF-8 byte order mark
    pub csv_bom: bool,
    /// Rows sampled to guess field types when preparing an import
    pub inference_sample_rows: usize,
    /// Upper bound on the timeline buckets a chart may densify into
    pub max_chart_buckets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 100,
            preview_limit: 100,
            scan_batch_size: 500,
            csv_delimiter: ';',
            csv_bom: true,
            inference_sample_rows: 50,
            max_chart_buckets: 10_000,
        }
    }
}

impl Config {
    /// Load the configuration stored under `root`, falling back to defaults
    /// when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| {
            crate::Error::FileReadError {
                path: path.clone(),
                source,
            }
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validated()
    }

    /// Write this configuration under `root`
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(CONFIG_FILE);
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|source| crate::Error::FileWriteError { path, source })
    }

    fn validated(self) -> Result<Self> {
        if self.page_size == 0 || self.scan_batch_size == 0 || self.max_chart_buckets == 0 {
            return Err(crate::Error::Other(
                "page_size, scan_batch_size and max_chart_buckets must be greater than zero".to_string(),
            ));
        }
        if !self.csv_delimiter.is_ascii() {
            return Err(crate::Error::Other(format!(
                "csv_delimiter must be a single ASCII character, got '{}'",
                self.csv_delimiter
            )));
        }
        Ok(self)
    }

    /// The export delimiter as the byte the csv writer expects
    pub fn delimiter_byte(&self) -> u8 {
        self.csv_delimiter as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.delimiter_byte(), b';');
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "page_size: 25\ncsv_delimiter: ','\n").unwrap();

        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.csv_delimiter, ',');
        assert_eq!(config.preview_limit, 100);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "page_size: 0\n").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
