use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub jwt_secret: String,
    /// Base URL of the external payment gateway's checkout page.
    pub gateway_base_url: String,
    /// Merchant code issued by the gateway.
    pub gateway_merchant_code: String,
    /// Shared HMAC secret for signing redirects and verifying callbacks.
    pub gateway_hash_secret: String,
    /// URL the gateway redirects the payer back to (our callback endpoint).
    pub gateway_return_url: String,
    pub gateway_currency: String,
    pub gateway_locale: String,
    /// Client page the callback handler redirects to, with `?status=`.
    pub client_payment_result_url: String,
    /// Optional outbound sink for resident notifications.
    pub notification_webhook_url: Option<String>,
    pub default_common_fee: i64,
    pub default_cleaning_fee: i64,
    pub default_electricity_price: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentora API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            jwt_secret: env_or("JWT_SECRET", "dev-only-secret"),
            gateway_base_url: env_or(
                "GATEWAY_BASE_URL",
                "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
            ),
            gateway_merchant_code: env_or("GATEWAY_MERCHANT_CODE", ""),
            gateway_hash_secret: env_or("GATEWAY_HASH_SECRET", ""),
            gateway_return_url: env_or(
                "GATEWAY_RETURN_URL",
                "http://localhost:8000/v1/payments/callback",
            ),
            gateway_currency: env_or("GATEWAY_CURRENCY", "VND"),
            gateway_locale: env_or("GATEWAY_LOCALE", "vn"),
            client_payment_result_url: env_or(
                "CLIENT_PAYMENT_RESULT_URL",
                "http://localhost:3000/payment/result",
            ),
            notification_webhook_url: env_opt("NOTIFICATION_WEBHOOK_URL"),
            default_common_fee: env_parse_or("DEFAULT_COMMON_FEE", 300_000),
            default_cleaning_fee: env_parse_or("DEFAULT_CLEANING_FEE", 100_000),
            default_electricity_price: env_parse_or("DEFAULT_ELECTRICITY_PRICE", 3_800),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn parses_csv_with_blanks() {
        assert_eq!(
            parse_csv("http://a, ,http://b,"),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }
}
