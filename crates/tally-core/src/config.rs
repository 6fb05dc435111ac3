use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Store-level configuration, loaded from `tally.toml` next to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Donation-size bucket stride in cents. Amounts floor-divide onto
    /// multiples of this width; the default matches the $500 bucket of
    /// the source itemization data.
    #[serde(default = "default_size_bucket_cents")]
    pub size_bucket_cents: i64,
    /// Lowest report year accepted as a plausible filing year.
    #[serde(default = "default_min_report_year")]
    pub min_report_year: i64,
    /// Highest report year accepted as a plausible filing year.
    #[serde(default = "default_max_report_year")]
    pub max_report_year: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            size_bucket_cents: default_size_bucket_cents(),
            min_report_year: default_min_report_year(),
            max_report_year: default_max_report_year(),
        }
    }
}

/// Load configuration from `dir/tally.toml`, falling back to defaults
/// when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or
/// if the parsed values are unusable (non-positive bucket width, inverted
/// year range).
pub fn load_store_config(dir: &Path) -> Result<StoreConfig> {
    let path = dir.join("tally.toml");
    if !path.exists() {
        return Ok(StoreConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<StoreConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &StoreConfig) -> Result<()> {
    ensure!(
        config.aggregation.size_bucket_cents > 0,
        "size_bucket_cents must be positive, got {}",
        config.aggregation.size_bucket_cents
    );
    ensure!(
        config.aggregation.min_report_year <= config.aggregation.max_report_year,
        "report year range is inverted: {}..={}",
        config.aggregation.min_report_year,
        config.aggregation.max_report_year
    );
    Ok(())
}

const fn default_size_bucket_cents() -> i64 {
    50_000
}

const fn default_min_report_year() -> i64 {
    1900
}

const fn default_max_report_year() -> i64 {
    2100
}
