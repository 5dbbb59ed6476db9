//! Config module tests

use std::time::Duration;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("TEST_VAR_SET");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.broker.host, "localhost");
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.broker.keepalive, 60);
    assert_eq!(config.broker.qos, 0);
    assert_eq!(
        config.broker.topics,
        vec!["sensor/gyroscope", "sensor/gps", "sensor/photo"]
    );
    assert_eq!(config.queue.region, "us-west-2");
    assert_eq!(config.queue.access_key, "dummy");
    assert_eq!(config.queue.endpoint, None);
    assert_eq!(config.limits.max_payload_size, 256 * 1024);
}

#[test]
fn test_parse_minimal_config() {
    let toml = r#"
[broker]
host = "mosquitto"
port = 1884
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.broker.address(), "mosquitto:1884");
    // Everything else defaults
    assert_eq!(config.broker.topics.len(), 3);
    assert_eq!(config.queue.region, "us-west-2");
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[broker]
host = "broker.internal"
port = 1883
client_id = "bridge-01"
keepalive = 30
connect_timeout = "5s"
topics = ["sensor/gyroscope", "sensor/gps"]
qos = 1

[queue]
url = "https://sqs.us-east-1.amazonaws.com/123456789012/telemetry"
region = "us-east-1"
send_timeout = "3s"

[limits]
max_payload_size = 1024
channel_capacity = 16
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.broker.client_id, "bridge-01");
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.broker.topics.len(), 2);
    assert_eq!(config.broker.qos, 1);
    assert_eq!(
        config.queue.url,
        "https://sqs.us-east-1.amazonaws.com/123456789012/telemetry"
    );
    assert_eq!(config.queue.send_timeout, Duration::from_secs(3));
    assert_eq!(config.limits.max_payload_size, 1024);
    assert_eq!(config.limits.channel_capacity, 16);
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = std::env::temp_dir();
    let config_path = temp_dir.join("fleetbridge_test_config.toml");

    std::env::set_var("TEST_BROKER_HOST", "10.0.0.5");

    let config_content = r#"
[broker]
host = "${TEST_BROKER_HOST}"
port = ${TEST_BROKER_PORT:-1885}
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.broker.host, "10.0.0.5");
    assert_eq!(config.broker.port, 1885); // Uses default

    std::fs::remove_file(&config_path).ok();
    std::env::remove_var("TEST_BROKER_HOST");
}

#[test]
fn test_well_known_env_overrides() {
    std::env::set_var(ENV_QUEUE_URL, "http://localhost:4566/000000000000/my-queue");
    std::env::set_var(ENV_QUEUE_ENDPOINT, "http://localhost:4566");

    let config = Config::load(std::path::Path::new("/nonexistent/fleetbridge.toml")).unwrap();
    assert_eq!(
        config.queue.url,
        "http://localhost:4566/000000000000/my-queue"
    );
    assert_eq!(
        config.queue.endpoint.as_deref(),
        Some("http://localhost:4566")
    );

    std::env::remove_var(ENV_QUEUE_URL);
    std::env::remove_var(ENV_QUEUE_ENDPOINT);
}

#[test]
fn test_validate_rejects_empty_topics() {
    let toml = r#"
[broker]
topics = []
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validate_rejects_wildcard_topics() {
    let toml = r#"
[broker]
topics = ["sensor/#"]
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validate_rejects_qos2() {
    let toml = r#"
[broker]
qos = 2
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validate_rejects_empty_queue_url() {
    let toml = r#"
[queue]
url = ""
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}
