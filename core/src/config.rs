use serde::{Deserialize, Serialize};

/// Engine-wide settings. Table rules never live here; they are data in
/// the rate table store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Version of the evaluation code, stamped on every rating run.
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
    /// Decimal places of the currency's minor unit (2 for USD cents).
    #[serde(default = "default_minor_units")]
    pub currency_minor_units: u32,
    /// Rows upserted per write transaction during import.
    #[serde(default = "default_chunk_size")]
    pub import_chunk_size: usize,
    /// Valid rows echoed back by an import preview.
    #[serde(default = "default_sample_rows")]
    pub preview_sample_rows: usize,
}

fn default_engine_version() -> String {
    format!("rating-core/{}", env!("CARGO_PKG_VERSION"))
}

fn default_minor_units() -> u32 {
    2
}

fn default_chunk_size() -> usize {
    500
}

fn default_sample_rows() -> usize {
    5
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            engine_version:       default_engine_version(),
            currency_minor_units: default_minor_units(),
            import_chunk_size:    default_chunk_size(),
            preview_sample_rows:  default_sample_rows(),
        }
    }
}

impl RatingConfig {
    /// Load from the data/ directory. Missing keys fall back to defaults.
    /// In tests, use RatingConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/rating/engine_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        if config.import_chunk_size == 0 {
            anyhow::bail!("{path}: import_chunk_size must be at least 1");
        }
        Ok(config)
    }

    /// Config with hardcoded values for use in tests. Small import
    /// chunks so chunk boundaries get exercised.
    pub fn default_test() -> Self {
        Self {
            engine_version:       "rating-core/test".into(),
            currency_minor_units: 2,
            import_chunk_size:    3,
            preview_sample_rows:  5,
        }
    }
}
