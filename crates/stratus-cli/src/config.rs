use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_aws::CredentialSource;
use stratus_engine::{OpContext, WaitPolicy};

/// Current config schema version. Bump this when adding a migration.
pub const CURRENT_VERSION: u32 = 1;

fn default_owner() -> String {
    "stratus".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratusConfig {
    /// Schema version; missing means v0.
    #[serde(default)]
    pub config_version: u32,
    #[serde(default = "default_region")]
    pub region: String,
    pub credentials: CredentialSource,
    /// Value of the owner tag put on everything this config creates.
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default)]
    pub wait: WaitConfig,
}

impl Default for StratusConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_VERSION,
            region: default_region(),
            credentials: CredentialSource::DefaultChain,
            owner: default_owner(),
            wait: WaitConfig::default(),
        }
    }
}

impl StratusConfig {
    /// Base operation context for this config. Cancellation and deadline
    /// are layered on by the caller.
    pub fn context(&self) -> OpContext {
        OpContext::new()
            .with_owner(self.owner.clone())
            .with_wait_policy(self.wait.policy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        let policy = WaitPolicy::default();
        Self {
            timeout_secs: policy.timeout.as_secs(),
            poll_interval_ms: policy.interval.as_millis() as u64,
        }
    }
}

impl WaitConfig {
    /// A zero interval would poll back to back; a zero timeout could never
    /// see anything settle.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.timeout_secs == 0 {
            return Err(eyre::eyre!("wait.timeout_secs must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(eyre::eyre!("wait.poll_interval_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

pub fn default_config_path() -> eyre::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
    Ok(base.join("stratus").join("config.json"))
}

/// Load the config at `path`, or the default location when `None`.
///
/// A missing file at the default location is not an error; the default
/// config (default credential chain, us-east-1) is used. An explicit path
/// must exist.
pub fn load_config(path: Option<&Path>) -> eyre::Result<StratusConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(StratusConfig::default());
        }
        Err(e) => {
            return Err(eyre::eyre!(
                "failed to read config at {}: {e}",
                path.display()
            ));
        }
    };

    let config = parse_config(&contents)?;
    tracing::debug!(path = %path.display(), region = %config.region, "config loaded");
    Ok(config)
}

/// Parse config JSON, migrating older versions forward.
pub fn parse_config(contents: &str) -> eyre::Result<StratusConfig> {
    // Parse as raw JSON so migrations run before deserializing.
    let json: serde_json::Value = serde_json::from_str(contents)?;
    let on_disk_version = match json.get("config_version") {
        None => 0,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| eyre::eyre!("config_version {v} is not a valid version number"))?,
    };

    let migrated = migrate(json, on_disk_version)?;
    let config: StratusConfig = serde_json::from_value(migrated)?;
    config.wait.validate()?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
/// Each migration is a pure transform on the raw JSON value.
pub fn migrate(mut json: serde_json::Value, from_version: u32) -> eyre::Result<serde_json::Value> {
    if from_version > CURRENT_VERSION {
        return Err(eyre::eyre!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update stratus."
        ));
    }

    // v0 -> v1: top-level `aws_profile` became `credentials`.
    if from_version < 1 {
        let obj = json
            .as_object_mut()
            .ok_or_else(|| eyre::eyre!("config is not a JSON object"))?;
        if !obj.contains_key("credentials") {
            let credentials = match obj.remove("aws_profile") {
                Some(serde_json::Value::String(profile_name)) => {
                    serde_json::json!({"type": "profile", "profile_name": profile_name})
                }
                _ => serde_json::json!({"type": "default_chain"}),
            };
            obj.insert("credentials".to_string(), credentials);
        }
        obj.remove("aws_profile");
        obj.insert(
            "config_version".to_string(),
            serde_json::Value::Number(1.into()),
        );
        tracing::info!("migrated config v0 -> v1 (aws_profile -> credentials)");
    }

    Ok(json)
}
