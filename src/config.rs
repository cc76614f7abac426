use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Destination values that mean "not configured yet".
const PLACEHOLDER_DESTINATIONS: [&str; 4] = ["", "/path/to/destination", "\\path\\to\\destination", "."];
const PLACEHOLDER_SOURCE: &str = "/path/to/files";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub destination_dir: String,
    /// Comma separated list of source directories.
    #[serde(default)]
    pub source_dir: String,
    /// Comma separated list of extensions, e.g. `.mkv,.mp4`. Empty allows everything.
    #[serde(default)]
    pub allowed_extensions: String,
    #[serde(default)]
    pub category_folders: Vec<String>,
    #[serde(default)]
    pub use_source_structure: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub api_host: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    pub subscriber_capacity: usize,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub metadata: MetadataConfig,
    pub events: EventsConfig,
    pub security: Option<SecurityConfig>,
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_connections() -> u32 {
    16
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl LibraryConfig {
    /// True when the destination is unset, a known placeholder, or does not exist on disk.
    pub fn is_placeholder(&self) -> bool {
        let dest = self.destination_dir.trim();
        PLACEHOLDER_DESTINATIONS.contains(&dest) || !Path::new(dest).is_dir()
    }

    pub fn destination_root(&self) -> PathBuf {
        PathBuf::from(self.destination_dir.trim())
    }

    /// Configured source directories, skipping blanks and the placeholder value.
    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.source_dir
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != PLACEHOLDER_SOURCE)
            .map(PathBuf::from)
            .collect()
    }

    /// Normalized allowed extensions (lowercase, leading dot).
    pub fn allowed_extensions(&self) -> Vec<String> {
        self.allowed_extensions
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
            .collect()
    }
}

impl AuthConfig {
    /// Returns the expected bearer token when authentication is active.
    pub fn required_token(&self) -> Option<&str> {
        if self.enabled && !self.token.trim().is_empty() {
            Some(self.token.trim())
        } else {
            None
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: webdavhub.toml (in CWD)
        .add_source(::config::File::with_name("webdavhub").required(false));

    if let Ok(custom_path) = std::env::var("WEBDAVHUB_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    builder = builder.add_source(::config::Environment::with_prefix("WEBDAVHUB").separator("__"));

    // Flat variables shared with the processing pipeline win over everything else
    for (var, key) in LEGACY_ENV {
        if let Ok(value) = std::env::var(var) {
            builder = builder.set_override(*key, legacy_value(key, &value))?;
        }
    }

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

const LEGACY_ENV: &[(&str, &str)] = &[
    ("DESTINATION_DIR", "library.destination_dir"),
    ("SOURCE_DIR", "library.source_dir"),
    ("ALLOWED_EXTENSIONS", "library.allowed_extensions"),
    ("USE_SOURCE_STRUCTURE", "library.use_source_structure"),
    ("CINESYNC_AUTH_ENABLED", "auth.enabled"),
    ("CINESYNC_AUTH_TOKEN", "auth.token"),
    ("CINESYNC_IP", "server.host"),
    ("CINESYNC_API_PORT", "server.port"),
    ("CINESYNC_API_HOST", "metadata.api_host"),
];

fn legacy_value(key: &str, raw: &str) -> ::config::Value {
    let raw = raw.trim();
    match key {
        "auth.enabled" => (!matches!(raw.to_ascii_lowercase().as_str(), "false" | "0" | "")).into(),
        "library.use_source_structure" => raw.eq_ignore_ascii_case("true").into(),
        _ => raw.to_string().into(),
    }
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if cfg.server.max_body_bytes == 0 {
        return Err(anyhow::anyhow!("server.max_body_bytes must be > 0"));
    }
    if cfg.database.max_connections == 0 {
        return Err(anyhow::anyhow!("database.max_connections must be > 0"));
    }
    if cfg.metadata.timeout_ms == 0 {
        return Err(anyhow::anyhow!("metadata.timeout_ms must be > 0"));
    }
    if cfg.events.subscriber_capacity == 0 {
        return Err(anyhow::anyhow!("events.subscriber_capacity must be > 0"));
    }
    if cfg.auth.enabled && cfg.auth.token.trim().is_empty() {
        tracing::warn!("auth.enabled is set but no auth.token is configured; requests are not checked");
    }
    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
