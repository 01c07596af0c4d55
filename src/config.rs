use std::{net::SocketAddr, path::Path, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use data_model::{OwnerId, DEFAULT_CATEGORY, PLACEHOLDER_OWNER};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "DOCVAULT_";

pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// MIME types accepted under [`TypePolicy::Strict`].
pub const ALLOWED_MIME_TYPES: [&str; 10] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "image/jpeg",
    "image/png",
    "image/gif",
];

/// Which of the two server shapes to run.
///
/// `full` serves the document API with strict type checking; `local` is the
/// development upload server with a fixed localhost URL and no type policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Full,
    Local,
}

impl Profile {
    pub fn default_listen_addr(self) -> &'static str {
        match self {
            Profile::Full => "0.0.0.0:5000",
            Profile::Local => "0.0.0.0:3001",
        }
    }

    pub fn default_type_policy(self) -> TypePolicy {
        match self {
            Profile::Full => TypePolicy::Strict,
            Profile::Local => TypePolicy::Permissive,
        }
    }

    pub fn default_public_base_url(self) -> Option<&'static str> {
        match self {
            Profile::Full => None,
            Profile::Local => Some("http://localhost:3001"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    Strict,
    Permissive,
}

impl TypePolicy {
    pub fn allows(self, content_type: Option<&str>) -> bool {
        match self {
            TypePolicy::Permissive => true,
            TypePolicy::Strict => content_type
                .map(mime_essence)
                .is_some_and(|mime| ALLOWED_MIME_TYPES.contains(&mime.as_str())),
        }
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// How `GET /api/documents/{userId}` finds an owner's documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingMode {
    /// Every blob in the store is reported as the requested owner's. There is
    /// no ownership check in this mode.
    #[default]
    Directory,
    /// Owner-filtered query against the metadata catalog.
    Catalog,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Http,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub kind: CatalogKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_catalog_timeout_secs() -> u64 {
    10
}

/// What to do with a written blob when the catalog refuses to index it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogFailurePolicy {
    /// Delete the orphan blob.
    #[default]
    Compensate,
    /// Keep the blob and return its descriptor so the client can retry the
    /// catalog create.
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: u64,
    /// Defaults to the profile's policy.
    pub type_policy: Option<TypePolicy>,
    pub default_category: String,
    pub default_owner: OwnerId,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
            type_policy: None,
            default_category: DEFAULT_CATEGORY.to_string(),
            default_owner: PLACEHOLDER_OWNER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Staging files older than this are treated as abandoned writes.
    pub staging_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            staging_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enable_metrics: bool,
    pub enable_tracing: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Defaults to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317 if empty.
    pub endpoint: Option<String>,
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
    pub instance_id: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            enable_tracing: false,
            endpoint: None,
            metrics_interval: Duration::from_secs(10),
            instance_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub env: String,
    pub profile: Profile,
    /// Defaults to the profile's address.
    pub listen_addr: Option<String>,
    /// Scheme and host used to build document URLs. When unset the full
    /// profile derives it from each request's `Host` header.
    pub public_base_url: Option<String>,
    pub blob_storage: BlobStorageConfig,
    pub upload: UploadConfig,
    pub listing_mode: ListingMode,
    pub catalog: Option<CatalogConfig>,
    pub on_catalog_failure: CatalogFailurePolicy,
    pub request_timeout_secs: u64,
    pub gc: GcConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            profile: Profile::default(),
            listen_addr: None,
            public_base_url: None,
            blob_storage: Default::default(),
            upload: Default::default(),
            listing_mode: ListingMode::default(),
            catalog: None,
            on_catalog_failure: CatalogFailurePolicy::default(),
            request_timeout_secs: 60,
            gc: Default::default(),
            telemetry: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &Path) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DOCVAULT_*` environment variables.
    pub fn from_env() -> Result<ServerConfig> {
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    pub fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr().parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr()));
        }
        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow!("upload.max_file_size_bytes must be positive"));
        }
        if let Some(base) = self.public_base_url() {
            let url = url::Url::parse(&base)
                .map_err(|e| anyhow!("invalid public_base_url {}: {}", base, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!("public_base_url must be http or https: {}", base));
            }
        }
        if self.listing_mode == ListingMode::Catalog && self.catalog.is_none() {
            return Err(anyhow!("listing_mode catalog requires a catalog section"));
        }
        if let Some(catalog) = &self.catalog {
            if catalog.kind == CatalogKind::Http {
                let base = catalog
                    .base_url
                    .as_ref()
                    .ok_or_else(|| anyhow!("http catalog requires base_url"))?;
                url::Url::parse(base)
                    .map_err(|e| anyhow!("invalid catalog base_url {}: {}", base, e))?;
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        self.listen_addr
            .clone()
            .unwrap_or_else(|| self.profile.default_listen_addr().to_string())
    }

    pub fn public_base_url(&self) -> Option<String> {
        self.public_base_url
            .clone()
            .or_else(|| self.profile.default_public_base_url().map(str::to_string))
            .map(|base| base.trim_end_matches('/').to_string())
    }

    pub fn type_policy(&self) -> TypePolicy {
        self.upload
            .type_policy
            .unwrap_or_else(|| self.profile.default_type_policy())
    }

    /// Router body limit: the file limit plus room for multipart framing and
    /// the text fields.
    pub fn body_limit_bytes(&self) -> usize {
        (self.upload.max_file_size_bytes + 1024 * 1024) as usize
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.env, Uuid::new_v4()))
    }
}

// Serde module for Duration serialization/deserialization
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
