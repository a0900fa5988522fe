//! Configuration surface: the one leaf component every other module
//! depends on and none of them mutate.
//!
//! Loaded the way the teacher's `core::config::app_config::load_config`
//! loads `AppConfig`: layered `config::Config` sources (defaults, a YAML
//! file, then environment variables, highest priority last), then
//! `try_deserialize`d into a single struct. This gateway has one flat
//! settings surface rather than Navius's many per-subsystem config
//! structs, so a single `GATEWAY_` environment prefix is enough.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

fn default_target_base_url() -> String {
    "http://mlflow:5000".to_string()
}

fn default_request_timeout_seconds() -> f64 {
    30.0
}

fn default_auth_enabled() -> bool {
    true
}

fn default_auth_mode() -> String {
    "oidc".to_string()
}

fn default_oidc_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_tenant_claim() -> String {
    "tenant_id".to_string()
}

fn default_role_claim() -> String {
    "roles".to_string()
}

fn default_tenant_tag_key() -> String {
    "tenant".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_name() -> String {
    "mlflow-policy-enforcement-gateway".to_string()
}

/// Typed settings for the whole gateway, deserialized from layered
/// config sources. Field names match the environment-variable /
/// config-key names in `spec.md` §6 exactly (modulo the `GATEWAY_`
/// prefix environment variables carry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_target_base_url")]
    pub target_base_url: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: f64,

    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,

    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    #[serde(default)]
    pub oidc_issuer: Option<String>,

    #[serde(default)]
    pub oidc_audience: Option<String>,

    #[serde(default = "default_oidc_algorithms")]
    pub oidc_algorithms: Vec<String>,

    #[serde(default)]
    pub jwks_uri: Option<String>,

    #[serde(default)]
    pub jwks_json: Option<String>,

    #[serde(default = "default_tenant_claim")]
    pub tenant_claim: String,

    #[serde(default = "default_role_claim")]
    pub role_claim: String,

    #[serde(default)]
    pub rbac_viewer_aliases: String,

    #[serde(default)]
    pub rbac_contributor_aliases: String,

    #[serde(default)]
    pub rbac_admin_aliases: String,

    #[serde(default = "default_tenant_tag_key")]
    pub tenant_tag_key: String,

    #[serde(default)]
    pub rbac_default_deny: bool,

    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            target_base_url: default_target_base_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            auth_enabled: default_auth_enabled(),
            auth_mode: default_auth_mode(),
            oidc_issuer: None,
            oidc_audience: None,
            oidc_algorithms: default_oidc_algorithms(),
            jwks_uri: None,
            jwks_json: None,
            tenant_claim: default_tenant_claim(),
            role_claim: default_role_claim(),
            rbac_viewer_aliases: String::new(),
            rbac_contributor_aliases: String::new(),
            rbac_admin_aliases: String::new(),
            tenant_tag_key: default_tenant_tag_key(),
            rbac_default_deny: false,
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            log_level: default_log_level(),
            app_name: default_app_name(),
        }
    }
}

impl GatewayConfig {
    /// `auth_enabled AND auth_mode != "off"`, per `spec.md` §6.
    pub fn auth_is_enabled(&self) -> bool {
        self.auth_enabled && self.auth_mode.to_lowercase() != "off"
    }

    /// The timeout applied to the `/readyz` upstream probe:
    /// `min(request_timeout_seconds, 2.0)`.
    pub fn readiness_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.request_timeout_seconds.min(2.0).max(0.0))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.request_timeout_seconds.max(0.0))
    }

    /// Fails loud at startup rather than serving with a nonsensical
    /// configuration; grounded on the teacher's `load_config` validation
    /// pass, reworked to return an error instead of panicking since this
    /// is a long-running network service, not a CLI tool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if reqwest::Url::parse(&self.target_base_url).is_err() {
            return Err(ConfigError::Message(format!(
                "target_base_url is not a valid URL: {}",
                self.target_base_url
            )));
        }

        let mode = self.auth_mode.to_lowercase();
        if mode != "oidc" && mode != "off" {
            return Err(ConfigError::Message(format!(
                "auth_mode must be 'oidc' or 'off', got '{}'",
                self.auth_mode
            )));
        }

        if self.auth_is_enabled() && self.jwks_uri.is_none() && self.jwks_json.is_none() {
            return Err(ConfigError::Message(
                "auth is enabled but neither jwks_uri nor jwks_json is configured".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration the way the teacher's `load_config` does:
/// `default.yaml` < `local.yaml` < `{RUN_ENV}.yaml` <
/// `local-{RUN_ENV}.yaml` < environment variables (`GATEWAY_` prefix).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "./config".to_string());
    let environment = env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string());

    tracing::info!("loading configuration for environment: {}", environment);

    let config = Config::builder()
        .add_source(File::from(Path::new(&config_dir).join("default.yaml")).required(false))
        .add_source(File::from(Path::new(&config_dir).join("local.yaml")).required(false))
        .add_source(
            File::from(Path::new(&config_dir).join(format!("{}.yaml", environment)))
                .required(false),
        )
        .add_source(
            File::from(Path::new(&config_dir).join(format!("local-{}.yaml", environment)))
                .required(false),
        )
        .add_source(Environment::with_prefix("GATEWAY").separator("_"))
        .build()?;

    let gateway_config: GatewayConfig = config.try_deserialize()?;
    gateway_config.validate()?;
    Ok(gateway_config)
}
