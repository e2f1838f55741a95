use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use gpui::*;
use gpui_component::{Theme, ThemeMode, ThemeRegistry};
use koda_service::{DEFAULT_MODEL, ServiceConfig};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "koda";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Topic value token preselected in the selector (e.g. `hilla-react`).
    #[serde(default)]
    pub default_topic: String,
    #[serde(
        default = "default_theme_mode",
        serialize_with = "serialize_theme_mode",
        deserialize_with = "deserialize_theme_mode"
    )]
    pub theme_mode: ThemeMode,
    #[serde(default)]
    pub theme_name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            default_topic: String::new(),
            theme_mode: default_theme_mode(),
            theme_name: String::new(),
        }
    }
}

impl ServiceSettings {
    pub fn to_service_config(&self) -> Option<ServiceConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(ServiceConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model_name,
        ))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model_name = if self.model_name.trim().is_empty() {
            default_model_name()
        } else {
            self.model_name.trim().to_string()
        };
        self.default_topic = self.default_topic.trim().to_string();
        self.theme_name = self.theme_name.trim().to_string();
        self
    }

    pub fn apply_theme(&self, window: Option<&mut Window>, cx: &mut App) {
        if let Some(theme_config) = ThemeRegistry::global(cx)
            .themes()
            .get(&SharedString::from(self.theme_name.trim().to_string()))
            .cloned()
        {
            let mode = theme_config.mode;
            let theme = Theme::global_mut(cx);
            if mode.is_dark() {
                theme.dark_theme = theme_config;
            } else {
                theme.light_theme = theme_config;
            }
            Theme::change(mode, window, cx);
            return;
        }

        Theme::change(self.theme_mode, window, cx);
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ServiceSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".koda"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ServiceSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ServiceSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ServiceSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ServiceSettings::default();
        }

        let figment = Figment::from(Serialized::defaults(ServiceSettings::default()))
            .merge(Json::file(path));

        match figment.extract::<ServiceSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ServiceSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ServiceSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_theme_mode() -> ThemeMode {
    ThemeMode::Light
}

fn serialize_theme_mode<S>(value: &ThemeMode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.name())
}

fn deserialize_theme_mode<'de, D>(deserializer: D) -> Result<ThemeMode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(parse_theme_mode(&value))
}

fn parse_theme_mode(value: &str) -> ThemeMode {
    if value.trim().eq_ignore_ascii_case("dark") {
        ThemeMode::Dark
    } else {
        ThemeMode::Light
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_backfills_blank_fields() {
        let settings = ServiceSettings {
            provider_id: "  ".to_string(),
            api_key: " key ".to_string(),
            endpoint: String::new(),
            model_name: " ".to_string(),
            default_topic: " flow ".to_string(),
            theme_mode: ThemeMode::Light,
            theme_name: String::new(),
        }
        .normalized();

        assert_eq!(settings.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.model_name, DEFAULT_MODEL);
        assert_eq!(settings.default_topic, "flow");
    }

    #[test]
    fn service_config_requires_an_api_key() {
        assert!(ServiceSettings::default().to_service_config().is_none());

        let configured = ServiceSettings {
            api_key: "sk-test".to_string(),
            ..ServiceSettings::default()
        };
        let config = configured.to_service_config().expect("key present");
        assert_eq!(config.model_id, DEFAULT_MODEL);
    }
}
