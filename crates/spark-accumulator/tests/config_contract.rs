//! `config_contract` 集成测试：验证 `AccumulatorConfig` 在宿主配置文件中的序列化契约。
//!
//! # 测试目标（Why）
//! - 宿主通常把累积器参数嵌入自身的 TOML/JSON 配置，字段名与单位必须稳定；
//! - 反序列化只负责形状，取值合法性由 `validate()` 与构造函数把关。

use std::time::Duration;

use serde::Deserialize;
use spark_accumulator::{Accumulator, AccumulatorConfig, AccumulatorError, BoxError, ConfigError};

#[derive(Debug, Deserialize)]
struct HostConfig {
    service: String,
    accumulator: AccumulatorConfig,
}

#[test]
fn parses_embedded_toml_table() {
    let raw = r#"
        service = "ingest"

        [accumulator]
        max_size = 500
        flush_interval_ms = 250
    "#;
    let host: HostConfig = toml::from_str(raw).expect("合法 TOML");

    assert_eq!(host.service, "ingest");
    assert_eq!(host.accumulator.max_size(), 500);
    assert_eq!(host.accumulator.flush_interval(), Duration::from_millis(250));
    assert_eq!(host.accumulator.pending_capacity(), 1_000);
    assert!(host.accumulator.validate().is_ok());
}

#[test]
fn json_round_trip_keeps_explicit_capacity() {
    let config = AccumulatorConfig::new(16, Duration::from_secs(2)).with_pending_capacity(64);
    let encoded = serde_json::to_value(&config).expect("序列化成功");
    assert_eq!(
        encoded,
        serde_json::json!({
            "max_size": 16,
            "flush_interval_ms": 2000,
            "pending_capacity": 64,
        })
    );

    let decoded: AccumulatorConfig = serde_json::from_value(encoded).expect("反序列化成功");
    assert_eq!(decoded, config);
}

#[test]
fn default_capacity_is_not_serialized() {
    let config = AccumulatorConfig::new(8, Duration::from_millis(10));
    let encoded = serde_json::to_string(&config).expect("序列化成功");
    assert!(!encoded.contains("pending_capacity"));
}

#[test]
fn unknown_fields_are_rejected() {
    let raw = r#"
        max_size = 10
        flush_interval_ms = 10
        flush_interval = 10
    "#;
    assert!(toml::from_str::<AccumulatorConfig>(raw).is_err());
}

#[tokio::test]
async fn invalid_values_fail_at_construction() {
    let raw = r#"{ "max_size": 0, "flush_interval_ms": 100 }"#;
    let config: AccumulatorConfig = serde_json::from_str(raw).expect("形状合法");

    let err = Accumulator::with_config(config, |_batch: Vec<u8>| async { Ok::<(), BoxError>(()) })
        .expect_err("阈值为 0 必须拒绝");
    assert!(matches!(
        err,
        AccumulatorError::Config(ConfigError::ZeroMaxSize)
    ));
    assert_eq!(err.code(), "spark.accumulator.invalid_config");
}

#[test]
fn sub_millisecond_interval_is_never_truncated() {
    let config = AccumulatorConfig::new(10, Duration::from_micros(500));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::FlushIntervalNotWholeMillis { .. })
    ));
    assert!(
        serde_json::to_string(&config).is_err(),
        "亚毫秒周期不得被序列化为截断后的毫秒数"
    );

    let whole = AccumulatorConfig::new(10, Duration::from_millis(1_500));
    let encoded = serde_json::to_string(&whole).expect("整毫秒周期可序列化");
    let decoded: AccumulatorConfig = serde_json::from_str(&encoded).expect("反序列化成功");
    assert_eq!(decoded, whole);
    assert!(decoded.validate().is_ok());
}
