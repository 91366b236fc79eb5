//! ---
//! rota_section: "01-core-functionality"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Shared primitives and utilities for the access core."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use carerota_security::rbac::Role;
use carerota_security::InMemoryIdentityProvider;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_access_token_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_refresh_token_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_active() -> bool {
    true
}

/// Primary configuration object for the CareRota access core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "CARE_ROTA_CONFIG";

    /// Load configuration from disk, respecting the `CARE_ROTA_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        let source = Self::resolve_source(candidates)?;
        let config = Self::from_path(&source)?;
        Ok(LoadedAppConfig { config, source })
    }

    /// `CARE_ROTA_CONFIG` when set and non-blank, else the first existing candidate.
    fn resolve_source<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf> {
        if let Some(path) = std::env::var(Self::ENV_CONFIG_PATH)
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(PathBuf::from(path));
        }
        candidates
            .iter()
            .map(|candidate| -> &Path { candidate.as_ref() })
            .find(|candidate| candidate.exists())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                let inspected: Vec<String> = candidates
                    .iter()
                    .map(|candidate| candidate.as_ref().display().to_string())
                    .collect();
                anyhow!("no configuration file found; inspected {}", inspected.join(", "))
            })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.identity.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

/// Settings for the bundled in-memory identity provider.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_access_token_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub access_token_ttl: Duration,
    #[serde(default = "default_refresh_token_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub refresh_token_ttl: Duration,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: default_access_token_ttl(),
            refresh_token_ttl: default_refresh_token_ttl(),
            users: Vec::new(),
        }
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.access_token_ttl.is_zero() {
            return Err(anyhow!("identity.access_token_ttl must be greater than zero"));
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(anyhow!(
                "identity.refresh_token_ttl must not be shorter than access_token_ttl"
            ));
        }
        let mut seen = HashSet::new();
        for user in &self.users {
            let email = user.email.trim().to_lowercase();
            if email.is_empty() {
                return Err(anyhow!("seeded user '{}' has an empty email", user.name));
            }
            if !seen.insert(email) {
                return Err(anyhow!("seeded user email '{}' is duplicated", user.email));
            }
            if user.role == Role::FacilityAdmin && user.facility_id.is_none() {
                return Err(anyhow!(
                    "facility_admin '{}' must declare a facility_id",
                    user.email
                ));
            }
        }
        Ok(())
    }
}

impl IdentityConfig {
    /// Build the in-memory provider and provision every seeded account.
    pub fn build_provider(&self) -> Result<InMemoryIdentityProvider> {
        let provider = InMemoryIdentityProvider::new(
            chrono::Duration::from_std(self.access_token_ttl)
                .context("identity.access_token_ttl out of range")?,
            chrono::Duration::from_std(self.refresh_token_ttl)
                .context("identity.refresh_token_ttl out of range")?,
        );
        for seed in &self.users {
            let record = provider
                .create_user(
                    &seed.email,
                    &seed.name,
                    &seed.password,
                    seed.role,
                    seed.facility_id.clone(),
                )
                .with_context(|| format!("unable to provision {}", seed.email))?;
            if !seed.is_active {
                provider.set_active(&record.id, false)?;
            }
            debug!(
                principal = %record.id,
                role = %record.role,
                active = seed.is_active,
                "seeded account"
            );
        }
        Ok(provider)
    }
}

/// Account provisioned into the in-memory identity provider at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub facility_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use carerota_security::{CredentialVerifier, ProfileResolver};

    const SAMPLE: &str = r#"
[logging]
format = "pretty"

[api]
listen = "127.0.0.1:9000"

[identity]
access_token_ttl = 900

[[identity.users]]
email = "admin@example.org"
name = "Admin"
password = "s3cret"
role = "system_admin"

[[identity.users]]
email = "lead@example.org"
name = "Lead"
password = "s3cret"
role = "facility_admin"
facility_id = "fac-1"
"#;

    #[test]
    fn parses_sample_configuration() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.api.listen.port(), 9000);
        assert_eq!(config.identity.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.identity.refresh_token_ttl, default_refresh_token_ttl());
        assert_eq!(config.identity.users.len(), 2);
        assert_eq!(config.identity.users[1].role, Role::FacilityAdmin);
        assert!(config.identity.users[0].is_active);
    }

    #[test]
    fn facility_admin_requires_facility() {
        let raw = r#"
[[identity.users]]
email = "lead@example.org"
name = "Lead"
password = "x"
role = "facility_admin"
"#;
        let err = raw.parse::<AppConfig>().unwrap_err();
        assert!(format!("{err:#}").contains("facility_id"));
    }

    #[test]
    fn duplicate_emails_rejected() {
        let raw = r#"
[[identity.users]]
email = "a@example.org"
name = "A"
password = "x"
role = "user"

[[identity.users]]
email = "A@example.org"
name = "B"
password = "y"
role = "user"
"#;
        assert!(raw.parse::<AppConfig>().is_err());
    }

    #[tokio::test]
    async fn seeded_provider_honours_active_flag() {
        let raw = r#"
[[identity.users]]
email = "carer@example.org"
name = "Carer"
password = "pw"
role = "user"

[[identity.users]]
email = "gone@example.org"
name = "Gone"
password = "pw"
role = "user"
is_active = false
"#;
        let config: AppConfig = raw.parse().unwrap();
        let provider = config.identity.build_provider().unwrap();
        let session = provider.verify("carer@example.org", "pw").await.unwrap();
        let record = provider
            .get_by_principal(&session.principal_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_active);

        let gone = provider.verify("gone@example.org", "pw").await.unwrap();
        let record = provider
            .get_by_principal(&gone.principal_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_active);
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rota.toml");
        fs::write(&path, SAMPLE).unwrap();
        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.identity.users.len(), 2);
    }
}
