//! Platform configuration
//!
//! A single immutable [`PlatformConfig`] carries every fixed identifier the
//! engine relies on (network name, container names, version pins, paths).
//! Components receive it by reference rather than reading constants, so
//! tests can substitute names freely.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deployment environment of the orchestrator itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

/// Top-level platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Brand slug used for the default remote base path
    pub brand_slug: String,
    /// Human readable brand name, shown in procedure messages
    pub brand_name: String,
    /// Base path override for the remote layout
    pub remote_base_path: Option<PathBuf>,
    /// Base path for the local layout
    pub local_base_path: PathBuf,
    /// Force the local layout even where the remote one would apply
    pub force_local_paths: bool,
    /// Overlay network shared by managed services
    pub network_name: String,
    /// Swarm binding used by the orchestrator's own cluster init
    pub swarm: SwarmBinding,
    /// Reverse proxy identifiers
    pub proxy: ProxySettings,
    /// Monitoring sidecar identifiers
    pub monitoring: MonitoringSettings,
    /// Pinned tool versions baked into the bootstrap procedure
    pub tools: ToolVersions,
    /// Metadata store service
    pub metadata_store: ManagedStoreSettings,
    /// Cache service
    pub cache: ManagedStoreSettings,
    /// Image tag the platform itself is running
    pub image_tag: String,
    /// Orchestrator environment
    pub environment: Environment,
    /// Managed multi-tenant mode
    pub cloud: bool,
    /// Connect-phase timeout for remote shell sessions, in seconds
    pub ssh_connect_timeout_secs: u64,
    /// Deployments service endpoint
    pub deploy_service: DeployServiceSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            brand_slug: "guildserver".to_string(),
            brand_name: "GuildServer".to_string(),
            remote_base_path: None,
            local_base_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib"))
                .join("guildserver"),
            force_local_paths: false,
            network_name: "guildserver-network".to_string(),
            swarm: SwarmBinding::default(),
            proxy: ProxySettings::default(),
            monitoring: MonitoringSettings::default(),
            tools: ToolVersions::default(),
            metadata_store: ManagedStoreSettings {
                name: "guildserver-postgres".to_string(),
                image: "postgres:16".to_string(),
                volume: "guildserver-postgres-database".to_string(),
                data_path: "/var/lib/postgresql/data".to_string(),
                port: 5432,
                env: vec![
                    "POSTGRES_USER=guildserver".to_string(),
                    "POSTGRES_DB=guildserver".to_string(),
                    "POSTGRES_PASSWORD=guildserver".to_string(),
                ],
            },
            cache: ManagedStoreSettings {
                name: "guildserver-redis".to_string(),
                image: "redis:7".to_string(),
                volume: "redis-data-volume".to_string(),
                data_path: "/data".to_string(),
                port: 6379,
                env: Vec::new(),
            },
            image_tag: "latest".to_string(),
            environment: Environment::Production,
            cloud: false,
            ssh_connect_timeout_secs: 20,
            deploy_service: DeployServiceSettings::default(),
        }
    }
}

/// Swarm listen/advertise binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmBinding {
    pub advertise_addr: String,
    pub listen_addr: String,
}

impl Default for SwarmBinding {
    fn default() -> Self {
        Self {
            advertise_addr: "127.0.0.1".to_string(),
            listen_addr: "0.0.0.0".to_string(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Name of both the standalone container and the legacy swarm service
    pub container_name: String,
    pub image: String,
    pub version: String,
    pub http_port: u16,
    pub https_port: u16,
    pub http3_port: u16,
    /// Email used for the ACME resolver
    pub acme_email: Option<String>,
}

impl ProxySettings {
    /// Full image reference, e.g. `traefik:v3.1.2`
    pub fn image_ref(&self) -> String {
        format!("{}:v{}", self.image, self.version)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            container_name: "guildserver-traefik".to_string(),
            image: "traefik".to_string(),
            version: "3.1.2".to_string(),
            http_port: 80,
            https_port: 443,
            http3_port: 443,
            acme_email: None,
        }
    }
}

/// Monitoring sidecar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub container_name: String,
    pub storage_path: PathBuf,
    pub image_repository: String,
    pub stable_tag: String,
    pub canary_tag: String,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            container_name: "guildserver-monitoring".to_string(),
            storage_path: PathBuf::from("/etc/guildserver/monitoring/monitoring.db"),
            image_repository: "guildserver/monitoring".to_string(),
            stable_tag: "latest".to_string(),
            canary_tag: "canary".to_string(),
        }
    }
}

/// Tool versions pinned into the bootstrap procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolVersions {
    pub docker: String,
    pub nixpacks: String,
    pub buildpacks: String,
    pub railpack: String,
}

impl Default for ToolVersions {
    fn default() -> Self {
        Self {
            docker: "27.0.3".to_string(),
            nixpacks: "1.39.0".to_string(),
            buildpacks: "0.35.0".to_string(),
            railpack: "0.2.2".to_string(),
        }
    }
}

/// A stateful managed service (metadata store or cache)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedStoreSettings {
    pub name: String,
    pub image: String,
    pub volume: String,
    pub data_path: String,
    pub port: u16,
    #[serde(default)]
    pub env: Vec<String>,
}

/// Deployments service endpoint and shared secret
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployServiceSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Which directory layout to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// Layout on a provisioned server
    Remote,
    /// Layout on the orchestrator's own host
    Local,
}

/// Fixed directory layout under a base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub base: PathBuf,
    pub traefik: PathBuf,
    pub traefik_dynamic: PathBuf,
    pub logs: PathBuf,
    pub applications: PathBuf,
    pub compose: PathBuf,
    pub ssh: PathBuf,
    pub certificates: PathBuf,
    pub monitoring: PathBuf,
    pub registry: PathBuf,
    pub schedules: PathBuf,
    pub volume_backups: PathBuf,
}

impl Paths {
    /// Derive the layout under `base`
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let traefik = base.join("traefik");
        let traefik_dynamic = traefik.join("dynamic");
        Self {
            traefik: traefik.clone(),
            certificates: traefik_dynamic.join("certificates"),
            traefik_dynamic,
            logs: base.join("logs"),
            applications: base.join("applications"),
            compose: base.join("compose"),
            ssh: base.join("ssh"),
            monitoring: base.join("monitoring"),
            registry: base.join("registry"),
            schedules: base.join("schedules"),
            volume_backups: base.join("volume-backups"),
            base,
        }
    }

    /// Every directory in the layout, base first
    pub fn all(&self) -> Vec<&Path> {
        vec![
            &self.base,
            &self.traefik,
            &self.traefik_dynamic,
            &self.logs,
            &self.applications,
            &self.compose,
            &self.ssh,
            &self.certificates,
            &self.monitoring,
            &self.registry,
            &self.schedules,
            &self.volume_backups,
        ]
    }

    pub fn traefik_config(&self) -> PathBuf {
        self.traefik.join("traefik.yml")
    }

    pub fn middlewares_config(&self) -> PathBuf {
        self.traefik_dynamic.join("middlewares.yml")
    }

    pub fn acme_store(&self) -> PathBuf {
        self.traefik_dynamic.join("acme.json")
    }
}

impl PlatformConfig {
    /// Load from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    FleetError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::parse_str(&interpolate(&content, |key| std::env::var(key).ok())?)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn parse_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.cloud = parse_bool(lookup("IS_CLOUD").as_deref(), self.cloud);
        self.force_local_paths = parse_bool(
            lookup("GUILDSERVER_FORCE_LOCAL_PATHS").as_deref(),
            self.force_local_paths,
        );

        let env = non_empty(lookup("GUILDSERVER_ENV")).or_else(|| non_empty(lookup("NODE_ENV")));
        match env.as_deref() {
            Some("development") => self.environment = Environment::Development,
            Some("production") => self.environment = Environment::Production,
            _ => {}
        }

        if let Some(tag) = non_empty(lookup("GUILDSERVER_IMAGE_TAG")) {
            self.image_tag = tag;
        }
        if let Some(base) = non_empty(lookup("GUILDSERVER_BASE_PATH")) {
            self.local_base_path = PathBuf::from(base);
        }
        if let Some(base) = non_empty(lookup("GUILDSERVER_REMOTE_BASE_PATH")) {
            self.remote_base_path = Some(PathBuf::from(base));
        }
        if let Some(url) = non_empty(lookup("SERVER_URL")) {
            self.deploy_service.url = Some(url);
        }
        if let Some(key) = non_empty(lookup("API_KEY")) {
            self.deploy_service.api_key = Some(key);
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Resolve the directory layout for a scope
    pub fn paths(&self, scope: PathScope) -> Paths {
        let use_remote = !self.force_local_paths
            && (scope == PathScope::Remote
                || self.environment == Environment::Production
                || self.cloud);

        if use_remote {
            Paths::under(self.remote_base())
        } else {
            Paths::under(&self.local_base_path)
        }
    }

    fn remote_base(&self) -> PathBuf {
        match &self.remote_base_path {
            Some(base) if !base.starts_with("/tmp") => base.clone(),
            _ => PathBuf::from(format!("/etc/{}", self.brand_slug)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean flag, falling back to `default` for unknown values
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "false" | "0" | "no" | "off" | "" => false,
        "true" | "1" | "yes" | "on" => true,
        _ => default,
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references in a config document.
/// Unset variables without a default expand to an empty string.
pub fn interpolate<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| FleetError::Config(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            match non_empty(lookup(&caps[1])) {
                Some(value) => value,
                None => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned())
}
