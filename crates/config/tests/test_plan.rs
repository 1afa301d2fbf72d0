//! Comprehensive test plan for the `concierge-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use concierge_config::{load, AppConfig, AuthConfig, CallConfig, HttpConfig, HubConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "CONCIERGE_CONFIG",
    "CONCIERGE__AUTH__SESSION_TTL_SECONDS",
    "CONCIERGE__AUTH__SYSTEM_TOKEN",
    "CONCIERGE__CALL__TOKEN_ATTEMPTS",
    "CONCIERGE__DATABASE__MAX_CONNECTIONS",
    "CONCIERGE__DATABASE__URL",
    "CONCIERGE__HTTP__ADDRESS",
    "CONCIERGE__HTTP__PORT",
    "CONCIERGE__HUB__HEARTBEAT_INTERVAL_SECONDS",
    "CONCIERGE__HUB__IDLE_TIMEOUT_SECONDS",
    "CONCIERGE__HUB__OUTBOUND_CAPACITY",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(
        config.database.max_connections,
        defaults.database.max_connections
    );
    assert_eq!(config.auth.session_ttl_seconds, defaults.auth.session_ttl_seconds);
    assert!(config.auth.system_token.is_none());
    assert_eq!(config.hub.outbound_capacity, defaults.hub.outbound_capacity);
    assert_eq!(config.call.token_attempts, defaults.call.token_attempts);
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "concierge.toml",
        r#"
        [http]
        port = 4242
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/concierge.toml",
        r#"
        [http]
        port = 5151
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.http.port, 4242);
}

#[test]
#[serial]
fn load_merges_partial_file_with_defaults() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "concierge.toml",
        r#"
        [http]
        port = 8181

        [database]
        max_connections = 50

        [hub]
        outbound_capacity = 32
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = AppConfig::default();

    assert_eq!(config.http.port, 8181);
    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.database.max_connections, 50);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(config.hub.outbound_capacity, 32);
    assert_eq!(
        config.hub.idle_timeout_seconds,
        defaults.hub.idle_timeout_seconds
    );
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "concierge.toml",
        r#"
        [http]
        port = 3030
        "#,
    );

    ctx.set_var("CONCIERGE__HTTP__PORT", "8080");
    ctx.set_var("CONCIERGE__AUTH__SYSTEM_TOKEN", "push-secret");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.http.port, 8080);
    assert_eq!(config.auth.system_token.as_deref(), Some("push-secret"));
}

#[test]
#[serial]
fn load_supports_database_url_environment_variable() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let url = "sqlite:///var/lib/concierge/chat.db";
    ctx.set_var("CONCIERGE__DATABASE__URL", url);

    let config = load().expect("configuration load should read database env override");
    assert_eq!(config.database.url, url);
}

#[test]
#[serial]
fn load_rejects_heartbeat_not_shorter_than_idle_timeout() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "concierge.toml",
        r#"
        [hub]
        heartbeat_interval_seconds = 90
        idle_timeout_seconds = 60
        "#,
    );

    let error = load().expect_err("heartbeat longer than idle timeout must be rejected");
    assert!(error.to_string().contains("invalid configuration"));
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "concierge.toml",
        r#"
        [http]
        port = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn auth_config_defaults_leave_system_token_unset() {
    let defaults = AuthConfig::default();
    assert!(defaults.system_token.is_none());
    assert_eq!(defaults.session_ttl_seconds, 86_400);
}

#[test]
fn hub_config_validation_rejects_zero_capacity() {
    let hub = HubConfig {
        outbound_capacity: 0,
        ..HubConfig::default()
    };
    assert!(hub.validate().is_err());
    assert!(HubConfig::default().validate().is_ok());
}

#[test]
fn call_config_defaults_allow_several_attempts() {
    let defaults = CallConfig::default();
    assert_eq!(defaults.token_attempts, 5);
    assert_eq!(defaults.token_length, 16);
}

#[test]
fn http_config_defaults_match_expected_host_and_port() {
    let defaults = HttpConfig::default();
    assert_eq!(defaults.address, "127.0.0.1");
    assert_eq!(defaults.port, 7070);
}
