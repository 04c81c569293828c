use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::agent::context::UserProfile;
use crate::sandbox::DEFAULT_INTERPRETER;

pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 10;
const MAX_EXECUTION_TIMEOUT_SECS: u64 = 600;
const MAX_AGE: u8 = 120;

const APP_DIR_NAME: &str = "neurocode";
const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "neurocode.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// File the settings were read from, if one existed.
    pub config_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub database_path: PathBuf,
    pub python: String,
    pub execution_timeout_secs: u64,
    pub profile: ProfileSeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    PreferNotToSay,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::NonBinary => "Non-binary",
            Self::PreferNotToSay => "Prefer not to say",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "Male" => Ok(Self::Male),
            "Female" => Ok(Self::Female),
            "Non-binary" => Ok(Self::NonBinary),
            "Prefer not to say" => Ok(Self::PreferNotToSay),
            _ => Err(format!(
                "unknown gender '{value}', expected one of Male, Female, Non-binary, Prefer not to say"
            )),
        }
    }
}

pub fn parse_age(value: i64) -> std::result::Result<u8, String> {
    u8::try_from(value)
        .ok()
        .filter(|age| *age <= MAX_AGE)
        .ok_or_else(|| format!("age must be between 0 and {MAX_AGE}, got {value}"))
}

/// Initial profile values from the `[profile]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSeed {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub description: Option<String>,
}

impl ProfileSeed {
    pub fn to_profile(&self) -> UserProfile {
        let mut profile = UserProfile::default();
        if let Some(first_name) = &self.first_name {
            profile.set("first_name", first_name.as_str());
        }
        if let Some(last_name) = &self.last_name {
            profile.set("last_name", last_name.as_str());
        }
        if let Some(age) = self.age {
            profile.set("age", Value::from(age));
        }
        if let Some(gender) = self.gender {
            profile.set("gender", gender.as_str());
        }
        if let Some(description) = &self.description {
            profile.set("description", description.as_str());
        }
        profile
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileConfig {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    database_path: Option<PathBuf>,
    python: Option<String>,
    execution_timeout_secs: Option<i64>,
    profile: Option<RawProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    first_name: Option<String>,
    last_name: Option<String>,
    age: Option<i64>,
    gender: Option<String>,
    description: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    /// An explicit path must exist; the discovered default path is optional.
    pub fn load_with_path(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Failed to load config {}: file not found", path.display());
                }
                path.to_path_buf()
            }
            None => discover_config_path()?,
        };
        let file_config = load_file_config(&config_path)?;

        dotenvy::dotenv().ok();

        let file_api_key = file_string(file_config.as_ref(), |cfg| cfg.api_key.as_ref());
        let file_model = file_string(file_config.as_ref(), |cfg| cfg.model.as_ref());
        let file_base_url = file_string(file_config.as_ref(), |cfg| cfg.base_url.as_ref());
        let file_python = file_string(file_config.as_ref(), |cfg| cfg.python.as_ref());
        let file_database = file_config
            .as_ref()
            .and_then(|cfg| cfg.database_path.clone())
            .filter(|path| !path.as_os_str().is_empty());

        let execution_timeout_secs = validate_timeout(
            file_config.as_ref().and_then(|cfg| cfg.execution_timeout_secs),
            &config_path,
        )?;
        let profile = validate_profile(
            file_config.as_ref().and_then(|cfg| cfg.profile.as_ref()),
            &config_path,
        )?;

        let database_path = match env_non_empty("NEUROCODE_DATABASE")
            .map(PathBuf::from)
            .or(file_database)
        {
            Some(path) => path,
            None => default_database_path()?,
        };

        Ok(Self {
            config_path: file_config.as_ref().map(|_| config_path.clone()),
            api_key: env_non_empty("NEUROCODE_API_KEY").or(file_api_key),
            model: env_non_empty("NEUROCODE_MODEL")
                .or(file_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: env_non_empty("NEUROCODE_BASE_URL")
                .or(file_base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_path,
            python: env_non_empty("NEUROCODE_PYTHON")
                .or(file_python)
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            execution_timeout_secs,
            profile,
        })
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    app_path("XDG_CONFIG_HOME", ".config", CONFIG_FILE_NAME, "config")
}

fn default_database_path() -> Result<PathBuf> {
    app_path("XDG_DATA_HOME", ".local/share", DATABASE_FILE_NAME, "database")
}

/// `$<xdg_var>/neurocode/<file>`, else `~/<home_fallback>/neurocode/<file>`.
fn app_path(xdg_var: &str, home_fallback: &str, file: &str, what: &str) -> Result<PathBuf> {
    let base = match env::var(xdg_var) {
        Ok(value) => match non_empty(&value) {
            Some(dir) => PathBuf::from(dir),
            None => bail!("Failed to resolve {what} path: {xdg_var} is set but empty"),
        },
        Err(_) => dirs::home_dir()
            .ok_or_else(|| anyhow!("Failed to resolve {what} path: HOME directory is unavailable"))?
            .join(home_fallback),
    };
    Ok(base.join(APP_DIR_NAME).join(file))
}

fn load_file_config(config_path: &Path) -> Result<Option<RawFileConfig>> {
    if !config_path.is_file() {
        return Ok(None);
    }

    let text = fs::read_to_string(config_path)
        .map_err(|err| config_error(config_path, "", &format!("unable to read file: {err}")))?;
    toml::from_str(&text)
        .map(Some)
        .map_err(|err| config_error(config_path, "", &err.to_string()))
}

fn validate_timeout(raw: Option<i64>, config_path: &Path) -> Result<u64> {
    let Some(secs) = raw else {
        return Ok(DEFAULT_EXECUTION_TIMEOUT_SECS);
    };
    u64::try_from(secs)
        .ok()
        .filter(|secs| (1..=MAX_EXECUTION_TIMEOUT_SECS).contains(secs))
        .ok_or_else(|| {
            config_error(
                config_path,
                "execution_timeout_secs",
                &format!("must be between 1 and {MAX_EXECUTION_TIMEOUT_SECS}, got {secs}"),
            )
        })
}

fn validate_profile(raw: Option<&RawProfile>, config_path: &Path) -> Result<ProfileSeed> {
    let Some(profile) = raw else {
        return Ok(ProfileSeed::default());
    };

    let age = profile
        .age
        .map(parse_age)
        .transpose()
        .map_err(|reason| config_error(config_path, "profile.age", &reason))?;
    let gender = profile
        .gender
        .as_deref()
        .map(Gender::from_str)
        .transpose()
        .map_err(|reason| config_error(config_path, "profile.gender", &reason))?;

    Ok(ProfileSeed {
        first_name: profile.first_name.as_deref().and_then(non_empty).map(ToOwned::to_owned),
        last_name: profile.last_name.as_deref().and_then(non_empty).map(ToOwned::to_owned),
        age,
        gender,
        description: profile.description.as_deref().and_then(non_empty).map(ToOwned::to_owned),
    })
}

fn file_string(
    file_config: Option<&RawFileConfig>,
    pick: impl Fn(&RawFileConfig) -> Option<&String>,
) -> Option<String> {
    file_config
        .and_then(pick)
        .and_then(|value| non_empty(value).map(ToOwned::to_owned))
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|value| non_empty(&value).map(ToOwned::to_owned))
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn config_error(config_path: &Path, key_path: &str, reason: &str) -> anyhow::Error {
    if key_path.is_empty() {
        anyhow!("Failed to load config {}: {reason}", config_path.display())
    } else {
        anyhow!(
            "Failed to load config {}: {key_path}: {reason}",
            config_path.display()
        )
    }
}
