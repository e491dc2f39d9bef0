//! Environment-driven configuration.
//! ---------------------------------
//! All knobs come from `KEYSTOCK_*` variables with development defaults, so a
//! bare `cargo run` serves on port 5000 against `./data` without any setup.
//! The directory (LDAP) settings mirror the deployment they were written for:
//! a service account that may search the user subtree, and a user base DN
//! whose entries carry the login name in a configurable attribute.

use std::str::FromStr;
use tracing::{info, warn};

/// Development fallback for the token signing secret. Deployments must
/// override it; `from_env` warns whenever it is still in effect.
pub const DEV_TOKEN_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub data_root: String,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub cookie_secure: bool,
    pub directory: DirectoryConfig,
}

/// Connection and search parameters for the external directory service.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub server_uri: String,
    pub tls_validate: bool,
    pub timeout_secs: u64,
    pub bind_dn: String,
    pub bind_password: String,
    pub user_base_dn: String,
    pub username_attr: String,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Config {
        let token_secret = env_str("KEYSTOCK_SECRET", DEV_TOKEN_SECRET);
        if token_secret == DEV_TOKEN_SECRET {
            warn!(target: "keystock", "KEYSTOCK_SECRET is unset; using the development signing secret");
        }
        Config {
            http_port: env_parse("KEYSTOCK_HTTP_PORT", 5000),
            data_root: env_str("KEYSTOCK_DATA_ROOT", "data"),
            token_secret,
            token_ttl_minutes: env_parse("KEYSTOCK_TOKEN_TTL_MINUTES", 60),
            cookie_secure: env_bool("KEYSTOCK_COOKIE_SECURE", false),
            directory: DirectoryConfig::from_env(),
        }
    }

    /// Startup banner at info level so something always prints at default
    /// verbosity. Secrets are reported as set/default, never echoed.
    pub fn log_summary(&self) {
        let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
        let secret_state = if self.token_secret == DEV_TOKEN_SECRET { "default" } else { "set" };
        info!(
            target: "keystock",
            "keystock starting: RUST_LOG='{}', http_port={}, data_root='{}', token_ttl={}m, secret={}, cookie_secure={}, ldap_uri='{}'",
            rust_log, self.http_port, self.data_root, self.token_ttl_minutes, secret_state,
            self.cookie_secure, self.directory.server_uri
        );
    }
}

impl DirectoryConfig {
    pub fn from_env() -> DirectoryConfig {
        DirectoryConfig {
            server_uri: env_str("KEYSTOCK_LDAP_URI", "ldaps://localhost:636"),
            tls_validate: env_bool("KEYSTOCK_LDAP_TLS_VALIDATE", true),
            timeout_secs: env_parse("KEYSTOCK_LDAP_TIMEOUT_SECS", 5),
            bind_dn: env_str("KEYSTOCK_LDAP_BIND_DN", "cn=admin,dc=example,dc=com"),
            bind_password: env_str("KEYSTOCK_LDAP_BIND_PASSWORD", ""),
            user_base_dn: env_str("KEYSTOCK_LDAP_USER_BASE_DN", "ou=people,dc=example,dc=com"),
            username_attr: env_str("KEYSTOCK_LDAP_USERNAME_ATTR", "uid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a unique variable name; parallel tests never collide.

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("KEYSTOCK_TEST_PORT_GARBAGE", "not-a-number");
        assert_eq!(env_parse("KEYSTOCK_TEST_PORT_GARBAGE", 5000u16), 5000);
        std::env::set_var("KEYSTOCK_TEST_PORT_OK", " 8080 ");
        assert_eq!(env_parse("KEYSTOCK_TEST_PORT_OK", 5000u16), 8080);
        assert_eq!(env_parse("KEYSTOCK_TEST_PORT_UNSET", 5000u16), 5000);
    }

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        for (val, expect) in [("1", true), ("true", true), ("YES", true), ("On", true), ("0", false), ("false", false), ("nope", false)] {
            std::env::set_var("KEYSTOCK_TEST_BOOL", val);
            assert_eq!(env_bool("KEYSTOCK_TEST_BOOL", true), expect, "value {:?}", val);
        }
        std::env::remove_var("KEYSTOCK_TEST_BOOL");
        assert!(env_bool("KEYSTOCK_TEST_BOOL", true));
        assert!(!env_bool("KEYSTOCK_TEST_BOOL", false));
    }
}
