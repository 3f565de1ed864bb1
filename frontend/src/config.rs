use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_STORAGE_KEY: &str = "portfolio-auth";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Durable storage key for "remember me" sessions.
    pub storage_key: String,
    /// Reconfirm identity with `/auth/me` when a live token is found on start.
    pub verify_on_check: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            verify_on_check: true,
        }
    }
}

static API_BASE_URL: OnceLock<String> = OnceLock::new();
static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

fn cache_base_url(value: &str) -> String {
    let value = value.trim_end_matches('/').to_string();
    let _ = API_BASE_URL.set(value.clone());
    value
}

/// Settings from `config.json` once loaded, defaults before that.
pub fn session_settings() -> SessionSettings {
    RUNTIME_CONFIG
        .get()
        .map(|cfg| cfg.session.clone())
        .unwrap_or_default()
}

pub fn log_level() -> log::Level {
    RUNTIME_CONFIG
        .get()
        .and_then(|cfg| cfg.log_level.as_deref())
        .and_then(|level| level.parse().ok())
        .unwrap_or(log::Level::Info)
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::RuntimeConfig;

    fn global_string(object_name: &str, keys: [&str; 2]) -> Option<String> {
        // Optional globals, e.g. window.__PORTFOLIO_ENV = { API_BASE_URL: "..." }
        let w = web_sys::window()?;
        let any = js_sys::Reflect::get(&w, &object_name.into()).ok()?;
        if any.is_undefined() || any.is_null() {
            return None;
        }
        let obj = js_sys::Object::from(any);
        keys.iter()
            .filter_map(|key| js_sys::Reflect::get(&obj, &(*key).into()).ok())
            .find(|v| !v.is_undefined() && !v.is_null())
            .and_then(|v| v.as_string())
    }

    pub(super) fn snapshot_from_globals() -> Option<String> {
        global_string("__PORTFOLIO_ENV", ["API_BASE_URL", "api_base_url"])
            .or_else(|| global_string("__PORTFOLIO_CONFIG", ["api_base_url", "API_BASE_URL"]))
    }

    pub(super) async fn fetch_runtime_config() -> Option<RuntimeConfig> {
        let origin = web_sys::window()?.location().origin().ok()?;
        let resp = reqwest::get(format!("{}/config.json", origin)).await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<RuntimeConfig>().await.ok()
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod host {
    use super::RuntimeConfig;

    pub(super) fn snapshot_from_globals() -> Option<String> {
        std::env::var("PORTFOLIO_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub(super) async fn fetch_runtime_config() -> Option<RuntimeConfig> {
        None
    }
}

#[cfg(target_arch = "wasm32")]
use browser as platform;
#[cfg(not(target_arch = "wasm32"))]
use host as platform;

/// Fetched on first use whatever the base URL source is, so session
/// settings and log level always come from `config.json` when it exists.
async fn load_runtime_config() -> Option<&'static RuntimeConfig> {
    if RUNTIME_CONFIG.get().is_none() {
        if let Some(cfg) = platform::fetch_runtime_config().await {
            let _ = RUNTIME_CONFIG.set(cfg);
        }
    }
    RUNTIME_CONFIG.get()
}

/// Globals win over `config.json`, which wins over the default.
fn pick_base_url(global: Option<String>, cfg: Option<&RuntimeConfig>) -> String {
    global
        .or_else(|| cfg.and_then(|cfg| cfg.api_base_url.clone()))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

pub async fn await_api_base_url() -> String {
    if let Some(cached) = API_BASE_URL.get() {
        return cached.clone();
    }
    let cfg = load_runtime_config().await;
    cache_base_url(&pick_base_url(platform::snapshot_from_globals(), cfg))
}

pub async fn init() {
    let base = await_api_base_url().await;
    log::debug!("API base URL resolved to {}", base);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_settings_default_to_portfolio_key() {
        let settings = SessionSettings::default();
        assert_eq!(settings.storage_key, "portfolio-auth");
        assert!(settings.verify_on_check);
    }

    #[test]
    fn runtime_config_fills_missing_sections() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"api_base_url":"https://photos.example/api"}"#).unwrap();
        assert_eq!(cfg.api_base_url.as_deref(), Some("https://photos.example/api"));
        assert_eq!(cfg.session, SessionSettings::default());
        assert!(cfg.log_level.is_none());

        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"session":{"verify_on_check":false}}"#).unwrap();
        assert!(!cfg.session.verify_on_check);
        assert_eq!(cfg.session.storage_key, DEFAULT_STORAGE_KEY);
    }

    #[test]
    fn base_url_prefers_globals_then_config_file() {
        let cfg: RuntimeConfig = serde_json::from_str(
            r#"{"api_base_url":"https://photos.example/api","session":{"verify_on_check":false}}"#,
        )
        .unwrap();

        assert_eq!(
            pick_base_url(Some("https://override.example/api".into()), Some(&cfg)),
            "https://override.example/api"
        );
        assert_eq!(pick_base_url(None, Some(&cfg)), "https://photos.example/api");
        assert_eq!(pick_base_url(None, None), DEFAULT_API_BASE_URL);

        let bare = RuntimeConfig::default();
        assert_eq!(pick_base_url(None, Some(&bare)), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn log_level_defaults_to_info() {
        assert_eq!(log_level(), log::Level::Info);
    }
}
