use super::*;

fn config_value(config: &ClientConfig, key: &str) -> Option<String> {
    config.get(key).map(str::to_string)
}

#[test]
fn test_new_config_defaults() {
    let config = KafkaEventBusConfig::new("localhost:9092", "atlas-saga-orchestrator");
    assert_eq!(config.bootstrap_servers, "localhost:9092");
    assert_eq!(config.group_id, "atlas-saga-orchestrator");
    assert_eq!(config.session_timeout_ms, 10_000);
    assert!(config.security_protocol.is_none());
}

#[test]
fn test_sasl_config() {
    let config = KafkaEventBusConfig::new("localhost:9092", "g").with_sasl("user", "pass", "PLAIN");
    assert_eq!(config.sasl_username.as_deref(), Some("user"));
    assert_eq!(config.sasl_password.as_deref(), Some("pass"));
    assert_eq!(config.sasl_mechanism.as_deref(), Some("PLAIN"));
    assert_eq!(config.security_protocol.as_deref(), Some("SASL_SSL"));
}

#[test]
fn test_consumer_config_disables_auto_commit() {
    let config = KafkaEventBusConfig::new("broker:9092", "atlas-rates").with_session_timeout_ms(6000);
    let client = config.build_consumer_config();
    assert_eq!(config_value(&client, "group.id").as_deref(), Some("atlas-rates"));
    assert_eq!(config_value(&client, "enable.auto.commit").as_deref(), Some("false"));
    assert_eq!(config_value(&client, "session.timeout.ms").as_deref(), Some("6000"));
}

#[test]
fn test_producer_config_is_idempotent() {
    let config = KafkaEventBusConfig::new("broker:9092", "g").with_security_protocol("SSL");
    let client = config.build_producer_config();
    assert_eq!(config_value(&client, "enable.idempotence").as_deref(), Some("true"));
    assert_eq!(config_value(&client, "acks").as_deref(), Some("all"));
    assert_eq!(config_value(&client, "security.protocol").as_deref(), Some("SSL"));
}
