use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StripeSettings {
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_stripe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
    #[serde(default = "default_currency_fallback")]
    pub currency_fallback: String,
}

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            timeout_ms: default_stripe_timeout_ms(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
            currency_fallback: default_currency_fallback(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from: String,
    /// Comma-separated list; each address is an independent target.
    #[serde(default)]
    pub admin_recipients: String,
}

impl EmailSettings {
    pub fn admin_recipient_list(&self) -> Vec<String> {
        self.admin_recipients
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stripe: StripeSettings,
    #[serde(default)]
    pub email: EmailSettings,
    pub server_port: u16,
    pub database_path: String,
    /// Comma-separated CORS origin allow-list.
    #[serde(default)]
    pub allowed_origins: String,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default)]
    pub self_url: String,
    #[serde(default)]
    pub companion_url: String,
    #[serde(default = "default_keep_alive_interval", with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stripe: StripeSettings::default(),
            email: EmailSettings::default(),
            server_port: 4242,
            database_path: "data/guidepay.redb".to_string(),
            allowed_origins: String::new(),
            success_url: "https://example.com/payment/success".to_string(),
            cancel_url: "https://example.com/payment/cancel".to_string(),
            self_url: String::new(),
            companion_url: String::new(),
            keep_alive_interval: default_keep_alive_interval(),
            environment: default_environment(),
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: STRIPE_SECRET_KEY, STRIPE_WEBHOOK_SECRET,
    /// STRIPE_TIMEOUT_MS, STRIPE_WEBHOOK_TOLERANCE_SECONDS, CURRENCY_FALLBACK,
    /// EMAIL_API_KEY, EMAIL_FROM, ADMIN_RECIPIENTS, SERVER_PORT, DATABASE_PATH,
    /// ALLOWED_ORIGINS, SUCCESS_URL, CANCEL_URL, SELF_URL, COMPANION_URL,
    /// KEEP_ALIVE_INTERVAL, ENVIRONMENT
    pub fn load() -> Self {
        // 1) Start with defaults + config.toml only if it exists
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg: Config = fig.extract().unwrap_or_default();

        // 2) Overlay environment variables explicitly
        if let Ok(v) = std::env::var("STRIPE_SECRET_KEY") {
            cfg.stripe.secret_key = v;
        }
        if let Ok(v) = std::env::var("STRIPE_WEBHOOK_SECRET") {
            cfg.stripe.webhook_secret = v;
        }
        if let Ok(v) = std::env::var("STRIPE_TIMEOUT_MS") {
            cfg.stripe.timeout_ms = v.parse().unwrap_or(cfg.stripe.timeout_ms);
        }
        if let Ok(v) = std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECONDS") {
            cfg.stripe.webhook_tolerance_seconds =
                v.parse().unwrap_or(cfg.stripe.webhook_tolerance_seconds);
        }
        if let Ok(v) = std::env::var("CURRENCY_FALLBACK") {
            cfg.stripe.currency_fallback = v.to_ascii_lowercase();
        }
        if let Ok(v) = std::env::var("EMAIL_API_KEY") {
            cfg.email.api_key = v;
        }
        if let Ok(v) = std::env::var("EMAIL_FROM") {
            cfg.email.from = v;
        }
        if let Ok(v) = std::env::var("ADMIN_RECIPIENTS") {
            cfg.email.admin_recipients = v;
        }
        if let Ok(v) = std::env::var("SERVER_PORT") {
            cfg.server_port = v.parse().unwrap_or(cfg.server_port);
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = std::env::var("ALLOWED_ORIGINS") {
            cfg.allowed_origins = v;
        }
        if let Ok(v) = std::env::var("SUCCESS_URL") {
            cfg.success_url = v;
        }
        if let Ok(v) = std::env::var("CANCEL_URL") {
            cfg.cancel_url = v;
        }
        if let Ok(v) = std::env::var("SELF_URL") {
            cfg.self_url = v;
        }
        if let Ok(v) = std::env::var("COMPANION_URL") {
            cfg.companion_url = v;
        }
        if let Ok(v) = std::env::var("KEEP_ALIVE_INTERVAL") {
            cfg.keep_alive_interval = parse_duration_env(&v, cfg.keep_alive_interval);
        }
        if let Ok(v) = std::env::var("ENVIRONMENT") {
            cfg.environment = v;
        }

        cfg
    }

    pub fn from_env() -> Self {
        Self::load()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn allowed_origin_list(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_stripe_timeout_ms() -> u64 {
    15_000
}

fn default_webhook_tolerance_seconds() -> i64 {
    300 // 5 minutes
}

fn default_currency_fallback() -> String {
    "gbp".to_string()
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(840) // 14 minutes, under typical idle-spindown windows
}

fn default_environment() -> String {
    "development".to_string()
}
