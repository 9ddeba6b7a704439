use std::{collections::HashMap, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use shared::domain::Identity;
use url::Url;

use crate::{error::ClientError, presentation::DeviceCapability, session::LoginPath};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    #[default]
    Delegated,
    TestCredential,
}

impl FromStr for LoginMode {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delegated" => Ok(Self::Delegated),
            "test_credential" | "test-credential" => Ok(Self::TestCredential),
            other => Err(ClientError::Config(format!("unknown login mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractorMode {
    #[default]
    Live,
    Preview,
}

impl FromStr for InteractorMode {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "preview" | "mock" => Ok(Self::Preview),
            other => Err(ClientError::Config(format!(
                "unknown interactor mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: String,
    pub login_mode: LoginMode,
    pub test_credential: Option<String>,
    pub test_identity_name: String,
    pub test_identity_email: String,
    pub interactors: InteractorMode,
    pub device: DeviceCapability,
    pub event_capacity: usize,
    /// `None` keeps the credential in memory only.
    pub credential_path: Option<PathBuf>,
    /// No timeout unless configured.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".into(),
            login_mode: LoginMode::Delegated,
            test_credential: None,
            test_identity_name: "Test User".into(),
            test_identity_email: "test@example.com".into(),
            interactors: InteractorMode::Live,
            device: DeviceCapability::Compact,
            event_capacity: 256,
            credential_path: None,
            request_timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn preview() -> Self {
        Self {
            interactors: InteractorMode::Preview,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Resolves the sign-in path. Test-credential mode needs a secret.
    pub fn login_path(&self) -> Result<LoginPath, ClientError> {
        match self.login_mode {
            LoginMode::Delegated => Ok(LoginPath::Delegated),
            LoginMode::TestCredential => {
                let secret = self.test_credential.clone().ok_or_else(|| {
                    ClientError::Config(
                        "login_mode=test_credential requires test_credential to be set".into(),
                    )
                })?;
                Ok(LoginPath::TestCredential {
                    secret,
                    identity: Identity {
                        name: self.test_identity_name.clone(),
                        email: self.test_identity_email.clone(),
                    },
                })
            }
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let url = Url::parse(&self.backend_url).map_err(|err| {
            ClientError::Config(format!("invalid backend_url '{}': {err}", self.backend_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "backend_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.event_capacity == 0 {
            return Err(ClientError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

pub fn load_settings() -> Result<Settings, ClientError> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| {
        std::env::var(key).ok()
    })
}

/// Defaults, then `path` (flat string keys) if it exists, then `APP__*`
/// variables from `env`.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, ClientError> {
    let mut values: HashMap<String, String> = HashMap::new();

    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg = toml::from_str::<HashMap<String, String>>(&raw).map_err(|err| {
            ClientError::Config(format!("failed to parse '{}': {err}", path.display()))
        })?;
        values.extend(file_cfg);
    }

    for key in [
        "backend_url",
        "login_mode",
        "test_credential",
        "test_identity_name",
        "test_identity_email",
        "interactors",
        "device",
        "event_capacity",
        "credential_path",
        "request_timeout_secs",
    ] {
        if let Some(value) = env(&format!("APP__{}", key.to_ascii_uppercase())) {
            values.insert(key.to_string(), value);
        }
    }

    let mut settings = Settings::default();
    if let Some(v) = values.remove("backend_url") {
        settings.backend_url = v;
    }
    if let Some(v) = values.remove("login_mode") {
        settings.login_mode = v.parse()?;
    }
    if let Some(v) = values.remove("test_credential") {
        settings.test_credential = Some(v);
    }
    if let Some(v) = values.remove("test_identity_name") {
        settings.test_identity_name = v;
    }
    if let Some(v) = values.remove("test_identity_email") {
        settings.test_identity_email = v;
    }
    if let Some(v) = values.remove("interactors") {
        settings.interactors = v.parse()?;
    }
    if let Some(v) = values.remove("device") {
        settings.device = v.parse()?;
    }
    if let Some(v) = values.remove("event_capacity") {
        settings.event_capacity = parse_number("event_capacity", &v)?;
    }
    if let Some(v) = values.remove("credential_path") {
        settings.credential_path = Some(PathBuf::from(v));
    }
    if let Some(v) = values.remove("request_timeout_secs") {
        settings.request_timeout_secs = Some(parse_number("request_timeout_secs", &v)?);
    }

    settings.validate()?;
    Ok(settings)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ClientError> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{key} must be a number, got '{value}'")))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
