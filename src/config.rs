/*
 * Responsibility
 * - 環境変数や設定の読み込み (Azure AD / local issuer / claims source など)
 * - 設定値のバリデーション (不足なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::services::auth::scheme::{EXTERNAL_PROVIDER, LOCAL_BEARER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// What a request does when its claims cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentFailurePolicy {
    /// Reject the request (503).
    FailClosed,
    /// Continue with the validated but unenriched principal.
    Degrade,
}

impl FromStr for EnrichmentFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "fail_closed" | "fail-closed" => Ok(Self::FailClosed),
            "degrade" | "degraded" => Ok(Self::Degrade),
            _ => Err(ConfigError::Invalid("ENRICHMENT_FAILURE_POLICY")),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Azure AD (external provider) settings.
#[derive(Clone)]
pub struct AzureAdConfig {
    pub instance: Url,
    pub tenant_id: String,
    pub client_id: String,
    pub public_key_pem: String,
}

impl AzureAdConfig {
    /// v2.0 issuer: `{instance}{tenant}/v2.0`
    pub fn issuer(&self) -> String {
        format!("{}{}/v2.0", self.instance, self.tenant_id)
    }
}

/// Local bearer issuer settings.
#[derive(Clone)]
pub struct LocalBearerConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_seconds: u64,
}

#[derive(Clone)]
pub struct ClaimsConfig {
    pub valkey_url: Option<String>,
    pub key_prefix: String,
    pub static_roles: Vec<String>,
    pub fetch_timeout: Duration,
    pub failure_policy: EnrichmentFailurePolicy,
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub azure_ad: AzureAdConfig,
    pub local: LocalBearerConfig,
    pub token_leeway_seconds: u64,

    pub external_issuer_prefix: String,
    pub external_scheme: String,
    pub default_scheme: String,

    pub claims: ClaimsConfig,
}

// Secrets stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("app_env", &self.app_env)
            .field("azure_instance", &self.azure_ad.instance.as_str())
            .field("azure_tenant_id", &self.azure_ad.tenant_id)
            .field("local_issuer", &self.local.issuer)
            .field("external_issuer_prefix", &self.external_issuer_prefix)
            .field("external_scheme", &self.external_scheme)
            .field("default_scheme", &self.default_scheme)
            .field("claims_valkey", &self.claims.valkey_url.is_some())
            .field("failure_policy", &self.claims.failure_policy)
            .finish_non_exhaustive()
    }
}

const MIN_LOCAL_SECRET_LEN: usize = 32;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production).
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let port: u16 = get("PORT").and_then(|s| s.parse().ok()).unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = get("APP_ENV")
            .map(|v| AppEnv::parse(&v))
            .unwrap_or(AppEnv::Development);

        // Authority base must end with '/' so issuer/prefix concatenation is well-formed.
        let mut instance = get("AZURE_AD_INSTANCE")
            .unwrap_or_else(|| "https://login.microsoftonline.com/".to_string());
        if !instance.ends_with('/') {
            instance.push('/');
        }
        let instance = Url::parse(&instance).map_err(|_| ConfigError::Invalid("AZURE_AD_INSTANCE"))?;
        if instance.scheme() != "https" && app_env.is_production() {
            return Err(ConfigError::Invalid("AZURE_AD_INSTANCE"));
        }

        let azure_ad = AzureAdConfig {
            instance,
            tenant_id: required("AZURE_AD_TENANT_ID")?,
            client_id: required("AZURE_AD_CLIENT_ID")?,
            public_key_pem: required("AZURE_AD_PUBLIC_KEY_PEM")?.replace("\\n", "\n"),
        };

        let external_issuer_prefix = get("EXTERNAL_ISSUER_PREFIX")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| azure_ad.instance.to_string());

        let secret = required("LOCAL_JWT_SECRET")?;
        if secret.len() < MIN_LOCAL_SECRET_LEN {
            return Err(ConfigError::Invalid("LOCAL_JWT_SECRET"));
        }

        let local = LocalBearerConfig {
            secret,
            issuer: get("LOCAL_JWT_ISSUER").unwrap_or_else(|| "multi-auth-api".to_string()),
            audience: get("LOCAL_JWT_AUDIENCE").unwrap_or_else(|| "multi-auth-api".to_string()),
            token_ttl_seconds: get("LOCAL_TOKEN_TTL_SECONDS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
        };

        let token_leeway_seconds = get("TOKEN_LEEWAY_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let external_scheme = get("EXTERNAL_SCHEME").unwrap_or_else(|| EXTERNAL_PROVIDER.to_string());
        let default_scheme = get("DEFAULT_SCHEME").unwrap_or_else(|| LOCAL_BEARER.to_string());
        if external_scheme == default_scheme {
            return Err(ConfigError::Invalid("EXTERNAL_SCHEME"));
        }

        let static_roles = get("CLAIMS_STATIC_ROLES")
            .unwrap_or_else(|| "Administrator".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let failure_policy = match get("ENRICHMENT_FAILURE_POLICY") {
            Some(v) => v.parse()?,
            None => EnrichmentFailurePolicy::FailClosed,
        };

        let claims = ClaimsConfig {
            valkey_url: get("CLAIMS_VALKEY_URL").filter(|v| !v.trim().is_empty()),
            key_prefix: get("CLAIMS_KEY_PREFIX").unwrap_or_else(|| "claims".to_string()),
            static_roles,
            fetch_timeout: Duration::from_millis(
                get("CLAIMS_FETCH_TIMEOUT_MS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(2000),
            ),
            failure_policy,
        };

        Ok(Self {
            addr,
            app_env,
            azure_ad,
            local,
            token_leeway_seconds,
            external_issuer_prefix,
            external_scheme,
            default_scheme,
            claims,
        })
    }
}
