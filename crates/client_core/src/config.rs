use std::{fs, path::Path};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "kyc_client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Reuse a user's session id across attempts instead of minting a new one.
    pub reuse_session_ids: bool,
    pub opening_message: String,
    pub opening_display_message: String,
    pub upload_message: String,
    pub confirm_message: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            request_timeout_secs: 30,
            reuse_session_ids: false,
            opening_message: "Start identity verification".into(),
            opening_display_message: "Start my KYC verification".into(),
            upload_message: "Here is my documents".into(),
            confirm_message: "Yes the data is correct. Please verify and complete my KYC."
                .into(),
        }
    }
}

impl ClientSettings {
    /// Parsed base url; only http(s) endpoints are accepted.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.api_base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(ConfigError::UnsupportedScheme(self.api_base_url.clone())),
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the toml file at `path` when present, then env overrides
/// looked up through `env`.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<ClientSettings>(&raw) {
            Ok(file_cfg) => file_cfg,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config: ignoring unreadable settings file");
                ClientSettings::default()
            }
        },
        Err(_) => ClientSettings::default(),
    };

    if let Some(v) = env("KYC_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = env("APP__REUSE_SESSION_IDS") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.reuse_session_ids = parsed;
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn temp_settings_file(contents: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("kyc_client_test_{suffix}.toml"));
        fs::write(&path, contents).expect("write settings");
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from(Path::new("/nonexistent/kyc_client.toml"), no_env);
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.opening_message, "Start identity verification");
    }

    #[test]
    fn file_values_fill_in_over_defaults() {
        let path = temp_settings_file(
            "api_base_url = \"https://kyc.example.com/api\"\nreuse_session_ids = true\n",
        );
        let settings = load_settings_from(&path, no_env);
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.api_base_url, "https://kyc.example.com/api");
        assert!(settings.reuse_session_ids);
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn env_overrides_win_and_bad_numbers_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KYC_API_URL", "http://first:1"),
            ("APP__API_BASE_URL", "http://second:2/api"),
            ("APP__REQUEST_TIMEOUT_SECS", "soon"),
            ("APP__REUSE_SESSION_IDS", "true"),
        ]);
        let settings = load_settings_from(Path::new("/nonexistent/kyc_client.toml"), |key| {
            vars.get(key).map(|v| v.to_string())
        });
        assert_eq!(settings.api_base_url, "http://second:2/api");
        assert_eq!(settings.request_timeout_secs, 30);
        assert!(settings.reuse_session_ids);
    }

    #[test]
    fn base_url_must_be_http() {
        let mut settings = ClientSettings::default();
        assert_eq!(settings.api_base().expect("url").path(), "/api");

        settings.api_base_url = "ftp://files.example.com".into();
        assert!(matches!(
            settings.api_base(),
            Err(ConfigError::UnsupportedScheme(_))
        ));

        settings.api_base_url = "not a url".into();
        assert!(matches!(
            settings.api_base(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }
}
