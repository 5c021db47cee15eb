//! Configuration du convertisseur
//!
//! Les valeurs sont résolues par couches successives :
//!
//! 1. configuration par défaut embarquée (`config.yaml` du crate) ;
//! 2. `config.yaml` du répertoire de configuration, fusionné récursivement ;
//! 3. variables `PMOAPPLEMUSIC_CONFIG__<SECTION>__<CLE>` ;
//! 4. pour les valeurs encore absentes : variables `APPLE_AUTHORIZATION`,
//!    `APPLE_MEDIA_USER_TOKEN`, `APPLE_COOKIES`, `APPLE_COUNTRY_CODE`,
//!    `BATCH_SIZE`, `DELAY`, puis fichiers `.dat` du répertoire courant.
//!
//! Le répertoire de configuration est cherché dans cet ordre : argument
//! explicite, variable `PMOAPPLEMUSIC_CONFIG`, `./.pmoapplemusic`,
//! `~/.pmoapplemusic`.

use crate::api::{
    AppleMusicApi, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SEARCH_BASE,
    DEFAULT_USER_AGENT,
};
use crate::api::catalog::DEFAULT_SEARCH_LIMIT;
use crate::error::{AppleMusicError, Result};
use crate::limiter::{self, RateLimitedClient, RateLimiter, RetryPolicy};
use crate::models::Region;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_CONFIG: &str = include_str!("config.yaml");

/// Variable désignant le répertoire de configuration
pub const ENV_CONFIG_DIR: &str = "PMOAPPLEMUSIC_CONFIG";

const ENV_PREFIX: &str = "PMOAPPLEMUSIC_CONFIG__";

const CONFIG_DIR_NAME: &str = ".pmoapplemusic";
const CONFIG_FILE_NAME: &str = "config.yaml";

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_DELAY_SECONDS: f64 = 1.0;
/// Délai minimal entre deux lots, quelle que soit la configuration
pub const MIN_DELAY_SECONDS: f64 = 0.5;

/// Credentials et points d'accès Apple Music
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppleMusicSection {
    pub authorization: String,
    pub media_user_token: String,
    pub cookies: String,
    pub country_code: String,
    pub api_base: String,
    pub search_base: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for AppleMusicSection {
    fn default() -> Self {
        Self {
            authorization: String::new(),
            media_user_token: String::new(),
            cookies: String::new(),
            country_code: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            search_base: DEFAULT_SEARCH_BASE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Paramètres de conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSection {
    pub batch_size: Option<usize>,
    pub delay_seconds: Option<f64>,
    pub failure_dir: PathBuf,
    pub search_limit: u32,
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            batch_size: None,
            delay_seconds: None,
            failure_dir: PathBuf::from("."),
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Paramètres du seau à jetons et des retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub capacity: u32,
    pub period_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: limiter::DEFAULT_CAPACITY,
            period_ms: limiter::DEFAULT_PERIOD.as_millis() as u64,
            max_attempts: limiter::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: limiter::DEFAULT_BASE_DELAY.as_millis() as u64,
            max_jitter_ms: limiter::DEFAULT_MAX_JITTER.as_millis() as u64,
        }
    }
}

/// Configuration complète du convertisseur
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub apple_music: AppleMusicSection,
    pub conversion: ConversionSection,
    pub rate_limit: RateLimitSection,
}

impl ConverterConfig {
    /// Charge la configuration depuis toutes les sources
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let external = match Self::find_config_dir(config_dir) {
            Some(dir) => {
                let path = dir.join(CONFIG_FILE_NAME);
                match fs::read_to_string(&path) {
                    Ok(content) => {
                        info!(config_file = %path.display(), "Loaded config file");
                        Some(content)
                    }
                    Err(_) => {
                        info!(config_file = %path.display(), "Config file not found, using default embedded config");
                        None
                    }
                }
            }
            None => {
                debug!("No config directory, using default embedded config");
                None
            }
        };

        let mut config = Self::from_layers(external.as_deref(), env::vars())?;
        config.apply_legacy_sources(|name| env::var(name).ok(), Path::new("."));
        Ok(config)
    }

    /// Cherche le répertoire de configuration
    pub fn find_config_dir(directory: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = directory {
            return Some(dir.to_path_buf());
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return Some(PathBuf::from(env_path));
        }

        let local = Path::new(CONFIG_DIR_NAME);
        if local.is_dir() {
            return Some(local.to_path_buf());
        }

        home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME))
            .filter(|dir| dir.is_dir())
    }

    /// Défauts embarqués, fichier externe puis surcharges d'environnement
    pub fn from_layers<I>(external: Option<&str>, env_vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(external) = external {
            let external_value: Value = serde_yaml::from_str(external)?;
            merge_yaml(&mut value, &external_value);
        }

        let mut value = lower_keys(value);
        apply_env_overrides(&mut value, env_vars);

        Ok(serde_yaml::from_value(value)?)
    }

    /// Complète les valeurs absentes depuis les variables historiques et les fichiers `.dat`
    pub fn apply_legacy_sources<F>(&mut self, lookup: F, work_dir: &Path)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &str, file: &str| -> Option<String> {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    fs::read_to_string(work_dir.join(file))
                        .ok()
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                })
        };

        let section = &mut self.apple_music;
        for (field, var, file) in [
            (&mut section.authorization, "APPLE_AUTHORIZATION", "token.dat"),
            (&mut section.media_user_token, "APPLE_MEDIA_USER_TOKEN", "media_user_token.dat"),
            (&mut section.cookies, "APPLE_COOKIES", "cookies.dat"),
            (&mut section.country_code, "APPLE_COUNTRY_CODE", "country_code.dat"),
        ] {
            if field.trim().is_empty() {
                if let Some(value) = read(var, file) {
                    debug!(env_var = var, file, "Using legacy credential source");
                    *field = value;
                }
            }
        }

        if self.conversion.batch_size.is_none() {
            self.conversion.batch_size = read("BATCH_SIZE", "batch_size.dat")
                .and_then(|v| v.parse().ok());
        }
        if self.conversion.delay_seconds.is_none() {
            self.conversion.delay_seconds = lookup("DELAY").and_then(|v| v.trim().parse().ok());
        }
    }

    /// Vérifie que la conversion peut démarrer
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("authorization", &self.apple_music.authorization),
            ("media_user_token", &self.apple_music.media_user_token),
            ("cookies", &self.apple_music.cookies),
            ("country_code", &self.apple_music.country_code),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(AppleMusicError::Configuration(format!(
                "Missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if self.batch_size() == 0 {
            return Err(AppleMusicError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.rate_limit.capacity == 0 || self.rate_limit.period_ms == 0 {
            return Err(AppleMusicError::Configuration(
                "rate_limit capacity and period_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn region(&self) -> Region {
        Region::new(&self.apple_music.country_code)
    }

    pub fn batch_size(&self) -> usize {
        self.conversion.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Délai de pacing, jamais inférieur à 0.5 s
    pub fn delay(&self) -> Duration {
        let seconds = self
            .conversion
            .delay_seconds
            .filter(|d| d.is_finite())
            .unwrap_or(DEFAULT_DELAY_SECONDS)
            .max(MIN_DELAY_SECONDS);
        Duration::from_secs_f64(seconds)
    }

    pub fn failure_dir(&self) -> &Path {
        &self.conversion.failure_dir
    }

    /// Limiteur partagé par tous les appels d'une exécution
    pub fn rate_limited_client(&self) -> RateLimitedClient {
        let section = &self.rate_limit;
        RateLimitedClient::new(
            RateLimiter::new(section.capacity, Duration::from_millis(section.period_ms)),
            RetryPolicy {
                max_attempts: section.max_attempts,
                base_delay: Duration::from_millis(section.base_delay_ms),
                max_jitter: Duration::from_millis(section.max_jitter_ms),
            },
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.apple_music.request_timeout_secs)
    }

    /// Client API authentifié partageant `limiter`
    pub fn build_api(&self, limiter: Arc<RateLimitedClient>) -> Result<AppleMusicApi> {
        let section = &self.apple_music;
        AppleMusicApi::builder()
            .api_base(&section.api_base)
            .search_base(&section.search_base)
            .authorization(&section.authorization)
            .media_user_token(&section.media_user_token)
            .cookies(&section.cookies)
            .user_agent(&section.user_agent)
            .timeout(self.request_timeout())
            .limiter(limiter)
            .build()
    }
}

fn apply_env_overrides<I>(config: &mut Value, env_vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in env_vars {
        if let Some(path) = key.strip_prefix(ENV_PREFIX) {
            let path: Vec<String> = path.split("__").map(str::to_lowercase).collect();
            debug!(key = %key, "Applying environment override");
            set_value(config, &path, convert_env_value(&value));
        }
    }
}

/// Les valeurs scalaires sont typées (nombres, booléens), le reste reste textuel
fn convert_env_value(value: &str) -> Value {
    match serde_yaml::from_str::<Value>(value) {
        Ok(parsed @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => parsed,
        _ => Value::String(value.to_string()),
    }
}

fn set_value(data: &mut Value, path: &[String], value: Value) {
    let Some((key, rest)) = path.split_first() else {
        *data = value;
        return;
    };

    if !matches!(data, Value::Mapping(_)) {
        *data = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = data {
        let entry = map
            .entry(Value::String(key.clone()))
            .or_insert(Value::Null);
        set_value(entry, rest, value);
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lower_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Fusion récursive : les scalaires et séquences de `external` remplacent ceux de `default`
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
