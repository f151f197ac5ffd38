//! Configuration management for the collection delegate approver
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::{AssetId, ConfirmationLevel, DiscoveryFilter};

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "APPROVER_CONFIG";

/// Largest approve count that fits a legacy transaction.
///
/// A transaction with `n` approve instructions over distinct token accounts
/// serializes to roughly `197 + 47 * n` bytes; the packet data limit is 1232.
pub const MAX_BATCH_SIZE: usize = 22;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batching, retry and pacing parameters of the approval engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Approve instructions per transaction
    pub batch_size: usize,
    /// Assets per signing request
    pub chunk_size: usize,
    /// Retry rounds after the first attempt
    pub max_retries: u32,
    /// Cap on in-flight builds, submits and confirms; unset runs the whole chunk at once
    pub parallel_batch_size: Option<usize>,
    /// Pacing delay between phases
    pub rate_limit_delay_ms: u64,
    pub commitment: ConfirmationLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            chunk_size: 1000,
            max_retries: 3,
            parallel_batch_size: None,
            rate_limit_delay_ms: 200,
            commitment: ConfirmationLevel::Processed,
        }
    }
}

impl EngineConfig {
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    /// Validate batching limits
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            anyhow::bail!(
                "engine.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.batch_size
            );
        }
        if self.chunk_size < self.batch_size {
            anyhow::bail!(
                "engine.chunk_size ({}) must be at least engine.batch_size ({})",
                self.chunk_size,
                self.batch_size
            );
        }
        if self.parallel_batch_size == Some(0) {
            anyhow::bail!("engine.parallel_batch_size must be positive when set");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Endpoints in failover order
    pub urls: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_confirm_poll_interval_ms() -> u64 {
    500
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Path to a JSON keypair file (solana-keygen format)
    pub keypair_path: Option<String>,
    /// Name of an env var holding a base58 secret key or a JSON byte array
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegationConfig {
    /// Account receiving delegate authority
    pub delegate: String,
    /// Verified collection whose members are approved
    #[serde(default)]
    pub collection: Option<String>,
    /// Verified creator (usually a candy machine) whose NFTs are approved
    #[serde(default)]
    pub creator: Option<String>,
    /// Newline-separated mint list used instead of on-chain discovery
    pub asset_ids_file: Option<String>,
}

impl DelegationConfig {
    pub fn delegate_pubkey(&self) -> Result<Pubkey> {
        Pubkey::from_str(self.delegate.trim())
            .with_context(|| format!("Invalid delegate address: {}", self.delegate))
    }

    /// Discovery mode: a collection, a creator, or every NFT the owner holds
    /// when neither is set
    pub fn discovery_filter(&self) -> Result<DiscoveryFilter> {
        let collection = non_empty(&self.collection);
        let creator = non_empty(&self.creator);

        match (collection, creator) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Set at most one of delegation.collection and delegation.creator")
            }
            (Some(collection), None) => Pubkey::from_str(collection)
                .map(DiscoveryFilter::Collection)
                .with_context(|| format!("Invalid collection address: {}", collection)),
            (None, Some(creator)) => Pubkey::from_str(creator)
                .map(DiscoveryFilter::Creator)
                .with_context(|| format!("Invalid creator address: {}", creator)),
            (None, None) => Ok(DiscoveryFilter::Owner),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus text exposition file written at the end of a run
    pub textfile_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    /// JSON run report destination
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.rpc.urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("At least one RPC URL must be configured");
        }

        self.delegation.delegate_pubkey()?;
        if self.delegation.asset_ids_file.is_none() {
            self.delegation.discovery_filter()?;
        }

        Ok(())
    }

    /// Settings that load but are probably not what was meant.
    ///
    /// Returned rather than logged because settings load before logging is set up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.metrics.enabled && self.metrics.textfile_path.is_none() {
            warnings.push(
                "Metrics enabled without metrics.textfile_path, nothing will be written".to_string(),
            );
        }

        if self.delegation.asset_ids_file.is_none()
            && matches!(self.delegation.discovery_filter(), Ok(DiscoveryFilter::Owner))
        {
            warnings.push(
                "Neither delegation.collection nor delegation.creator is set, every NFT the wallet holds will be approved"
                    .to_string(),
            );
        }

        warnings
    }
}

/// Read a newline-separated list of mint addresses.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_asset_ids(path: &Path) -> Result<Vec<AssetId>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read asset id file: {:?}", path))?;

    contents
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            AssetId::from_str(line)
                .with_context(|| format!("{:?} line {}: invalid mint address {:?}", path, n, line))
        })
        .collect()
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(engine: &str) -> String {
        format!(
            r#"
            [engine]
            {engine}

            [rpc]
            urls = ["https://api.devnet.solana.com"]

            [delegation]
            delegate = "{delegate}"
            collection = "{collection}"
            "#,
            delegate = Pubkey::new_unique(),
            collection = Pubkey::new_unique(),
        )
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("APPROVER_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${APPROVER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_match_reference_values() {
        let settings = Settings::from_toml(&sample("")).unwrap();
        assert_eq!(settings.engine.batch_size, 20);
        assert_eq!(settings.engine.chunk_size, 1000);
        assert_eq!(settings.engine.max_retries, 3);
        assert_eq!(settings.engine.parallel_batch_size, None);
        assert_eq!(settings.engine.rate_limit_delay(), Duration::from_millis(200));
        assert_eq!(settings.engine.commitment, ConfirmationLevel::Processed);
        assert_eq!(settings.rpc.confirm_timeout(), Duration::from_secs(60));
        assert_eq!(settings.logging.format, "pretty");
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_engine_overrides() {
        let settings = Settings::from_toml(&sample(
            "batch_size = 10\nchunk_size = 100\nparallel_batch_size = 5\ncommitment = \"finalized\"",
        ))
        .unwrap();
        assert_eq!(settings.engine.batch_size, 10);
        assert_eq!(settings.engine.chunk_size, 100);
        assert_eq!(settings.engine.parallel_batch_size, Some(5));
        assert_eq!(settings.engine.commitment, ConfirmationLevel::Finalized);
    }

    #[test]
    fn test_rejects_oversized_batches() {
        let err = Settings::from_toml(&sample("batch_size = 30")).unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        assert!(Settings::from_toml(&sample("batch_size = 0")).is_err());
        assert!(Settings::from_toml(&sample("batch_size = 20\nchunk_size = 5")).is_err());
        assert!(Settings::from_toml(&sample("parallel_batch_size = 0")).is_err());
    }

    #[test]
    fn test_rejects_bad_delegate() {
        let input = r#"
            [rpc]
            urls = ["https://api.devnet.solana.com"]

            [delegation]
            delegate = "definitely not base58!"
            collection = "11111111111111111111111111111111"
        "#;
        assert!(Settings::from_toml(input).is_err());
    }

    #[test]
    fn test_asset_file_makes_collection_optional() {
        let input = format!(
            r#"
            [rpc]
            urls = ["https://api.devnet.solana.com"]

            [delegation]
            delegate = "{}"
            collection = ""
            asset_ids_file = "mints.txt"
            "#,
            Pubkey::new_unique()
        );
        let settings = Settings::from_toml(&input).unwrap();
        assert_eq!(settings.delegation.asset_ids_file.as_deref(), Some("mints.txt"));
        assert!(settings.warnings().is_empty());
    }

    fn delegation(extra: &str) -> String {
        format!(
            r#"
            [rpc]
            urls = ["https://api.devnet.solana.com"]

            [delegation]
            delegate = "{}"
            {}
            "#,
            Pubkey::new_unique(),
            extra
        )
    }

    #[test]
    fn test_discovery_mode_selection() {
        let collection = Pubkey::new_unique();
        let settings =
            Settings::from_toml(&delegation(&format!("collection = \"{}\"", collection))).unwrap();
        assert_eq!(
            settings.delegation.discovery_filter().unwrap(),
            DiscoveryFilter::Collection(collection)
        );

        let creator = Pubkey::new_unique();
        let settings =
            Settings::from_toml(&delegation(&format!("creator = \"{}\"", creator))).unwrap();
        assert_eq!(
            settings.delegation.discovery_filter().unwrap(),
            DiscoveryFilter::Creator(creator)
        );

        let settings = Settings::from_toml(&delegation("")).unwrap();
        assert_eq!(settings.delegation.discovery_filter().unwrap(), DiscoveryFilter::Owner);
        assert!(settings.warnings().iter().any(|w| w.contains("every NFT")));
    }

    #[test]
    fn test_rejects_ambiguous_or_bad_discovery() {
        let both = format!(
            "collection = \"{}\"\ncreator = \"{}\"",
            Pubkey::new_unique(),
            Pubkey::new_unique()
        );
        assert!(Settings::from_toml(&delegation(&both)).is_err());
        assert!(Settings::from_toml(&delegation("creator = \"not a key\"")).is_err());
    }

    #[test]
    fn test_metrics_without_path_is_a_warning() {
        let input = format!("{}\n[metrics]\nenabled = true\n", sample(""));
        let settings = Settings::from_toml(&input).unwrap();
        assert_eq!(settings.warnings().len(), 1);
        assert!(settings.warnings()[0].contains("textfile_path"));
    }

    #[test]
    fn test_load_from_env_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approver.toml");
        std::fs::write(&path, sample("max_retries = 1")).unwrap();

        env::set_var(CONFIG_ENV, &path);
        let settings = Settings::load().unwrap();
        env::remove_var(CONFIG_ENV);

        assert_eq!(settings.engine.max_retries, 1);
    }

    #[test]
    fn test_read_asset_ids_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mints.txt");
        let first = Pubkey::new_unique();
        let second = Pubkey::new_unique();
        std::fs::write(&path, format!("# collection export\n{}\n\n  {}  \n", first, second)).unwrap();

        let ids = read_asset_ids(&path).unwrap();
        assert_eq!(ids, vec![AssetId::new(first), AssetId::new(second)]);
    }

    #[test]
    fn test_read_asset_ids_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mints.txt");
        std::fs::write(&path, format!("{}\nnot-a-mint\n", Pubkey::new_unique())).unwrap();

        let err = read_asset_ids(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
