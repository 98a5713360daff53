//! Configuration loader for the root file and per-tenant subscription files.
//!
//! Loading produces a [`LoadedConfig`] whose subscriptions are keyed and
//! sorted by alias so plans come out the same on every run. Billing scopes are
//! resolved here, before anything reaches the graph.

use crate::error::{ConfigError, LandingZoneError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{LandingZoneConfig, Settings, SubscriptionSpec};

/// Fully loaded configuration ready for validation and flattening.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Global settings, with environment overrides applied.
    pub settings: Settings,
    /// Subscriptions keyed by alias.
    pub subscriptions: BTreeMap<String, SubscriptionSpec>,
    /// Directory of the root file; relative paths resolve against it.
    pub base_dir: PathBuf,
}

/// Configuration parser for loading landing zone configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the root file, its tenant files and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, if two sources
    /// define the same subscription key, or if billing inputs are incomplete.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedConfig> {
        let path = path.as_ref();
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config.settings);

        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut sources: BTreeMap<String, String> = BTreeMap::new();
        let mut subscriptions = BTreeMap::new();

        for (i, spec) in std::mem::take(&mut config.subscriptions).into_iter().enumerate() {
            let source = format!("{}:subscriptions[{i}]", path.display());
            if spec.key.is_empty() {
                return Err(ConfigError::missing(source, "key").into());
            }
            Self::insert_subscription(&mut subscriptions, &mut sources, spec, source)?;
        }

        let dir = base_dir.join(&config.subscriptions_dir);
        for file in tenant_files(&dir)? {
            let mut spec = self.load_subscription_file(&file)?;
            if spec.key.is_empty() {
                spec.key = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
            }
            Self::insert_subscription(
                &mut subscriptions,
                &mut sources,
                spec,
                file.display().to_string(),
            )?;
        }

        resolve_billing_scopes(&config.settings, &mut subscriptions)?;

        info!("Loaded {} subscription(s)", subscriptions.len());

        Ok(LoadedConfig {
            settings: config.settings,
            subscriptions,
            base_dir,
        })
    }

    /// Loads the root configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LandingZoneConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses the root configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<LandingZoneConfig> {
        debug!("Parsing YAML configuration");

        serde_yaml::from_str(content).map_err(|e| {
            LandingZoneError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Loads one tenant file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_subscription_file(&self, path: impl AsRef<Path>) -> Result<SubscriptionSpec> {
        let path = path.as_ref();
        debug!("Loading tenant file: {}", path.display());

        let content = read_file(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            LandingZoneError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: Some(path.display().to_string()),
            })
        })
    }

    fn insert_subscription(
        subscriptions: &mut BTreeMap<String, SubscriptionSpec>,
        sources: &mut BTreeMap<String, String>,
        spec: SubscriptionSpec,
        source: String,
    ) -> Result<()> {
        if let Some(first) = sources.get(&spec.key) {
            return Err(ConfigError::ConfigConflict {
                kind: String::from("subscription"),
                key: spec.key,
                first: first.clone(),
                second: source,
            }
            .into());
        }
        sources.insert(spec.key.clone(), source);
        subscriptions.insert(spec.key.clone(), spec);
        Ok(())
    }

    /// Applies environment variable overrides to the settings.
    fn apply_env_overrides(settings: &mut Settings) {
        if let Ok(location) = std::env::var("LANDING_ZONE_DEFAULT_LOCATION") {
            debug!("Overriding settings.default_location from environment");
            settings.default_location = location;
        }

        if let Ok(vnet_id) = std::env::var("LANDING_ZONE_HUB_VNET_ID") {
            debug!("Overriding settings.hub.vnet_id from environment");
            settings.hub.vnet_id = Some(vnet_id);
        }

        if let Ok(dir) = std::env::var("LANDING_ZONE_LEDGER_DIR") {
            debug!("Overriding settings.ledger.dir from environment");
            settings.ledger.dir = Some(dir);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                LandingZoneError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the management-plane bearer token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_access_token() -> Result<String> {
        std::env::var("AZURE_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                LandingZoneError::Config(ConfigError::MissingEnvVar {
                    name: String::from("AZURE_ACCESS_TOKEN"),
                })
            })
    }

    /// Gets the connectivity (hub) bearer token, if a separate one is set.
    #[must_use]
    pub fn get_connectivity_token() -> Option<String> {
        std::env::var("AZURE_CONNECTIVITY_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
    }
}

/// Resolves each subscription's billing scope from its own or the global inputs.
fn resolve_billing_scopes(
    settings: &Settings,
    subscriptions: &mut BTreeMap<String, SubscriptionSpec>,
) -> Result<()> {
    for (key, spec) in subscriptions.iter_mut() {
        if spec.billing_scope.is_some() {
            continue;
        }
        let Some(billing) = spec.billing.as_ref().or(settings.billing.as_ref()) else {
            continue;
        };
        match billing.scope() {
            Ok(scope) => spec.billing_scope = scope,
            Err(field) => {
                return Err(ConfigError::missing(format!("subscription '{key}' billing"), field).into());
            }
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(LandingZoneError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        LandingZoneError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

/// Lists `*.yaml`/`*.yml` files in a directory, sorted by name.
fn tenant_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        debug!("Subscriptions directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["landing-zone.yaml", "landing-zone.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(LandingZoneError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
