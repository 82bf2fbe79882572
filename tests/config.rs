// Configuration loading and validation.

use dmxp_dispatcher::Core::Buffer::LogBuffer;
use dmxp_dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherError, Mode};

fn field_of(err: DispatcherError) -> String {
    match err {
        DispatcherError::Config { field, message } => {
            println!("{field}: {message}");
            field
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_defaults() {
    let config = DispatcherConfig::default();
    assert_eq!(config.name, "dispatcher");
    assert_eq!(config.partition_count, 3);
    assert_eq!(config.partition_size, 1024 * 1024);
    assert_eq!(config.effective_window_length(), 1024 * 1024);
    assert_eq!(config.mode, Mode::Broadcast);
    assert!(config.subscriptions.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "name": "replication",
        "partition_count": 4,
        "partition_size": 65536,
        "window_length": 131072,
        "mode": "pipeline",
        "subscriptions": ["log-stream", "snapshot"]
    }"#;

    let config: DispatcherConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.mode, Mode::Pipeline);
    assert_eq!(config.effective_window_length(), 131072);

    let dispatcher = Dispatcher::from_config(config).unwrap();
    assert_eq!(dispatcher.name(), "replication");
    assert_eq!(dispatcher.mode(), Mode::Pipeline);
    assert_eq!(dispatcher.window_length(), 131072);
    assert_eq!(dispatcher.position_codec().partition_count(), 4);
    assert_eq!(dispatcher.log_buffer().partition_size(), 65536);
    assert_eq!(dispatcher.subscription_count(), 2);
}

#[test]
fn test_partial_json_uses_defaults() {
    let config: DispatcherConfig = serde_json::from_str(r#"{ "partition_size": 4096 }"#).unwrap();
    assert_eq!(config.partition_count, 3);
    assert_eq!(config.window_length, None);
    assert_eq!(config.effective_window_length(), 4096);

    // round trip through the serialized form
    let text = serde_json::to_string(&config).unwrap();
    let back: DispatcherConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_unknown_fields_are_rejected() {
    let result: Result<DispatcherConfig, _> = serde_json::from_str(r#"{ "partitions": 4 }"#);
    assert!(result.is_err());
}

#[test]
fn test_validation_errors() {
    let base = || DispatcherConfig {
        partition_size: 1024,
        ..DispatcherConfig::default()
    };

    let mut config = base();
    config.partition_count = 1;
    assert_eq!(field_of(config.validate().unwrap_err()), "partition_count");

    let mut config = base();
    config.partition_size = 1001;
    assert_eq!(field_of(config.validate().unwrap_err()), "partition_size");

    let mut config = base();
    config.window_length = Some(512);
    assert_eq!(field_of(config.validate().unwrap_err()), "window_length");

    // a window spanning the whole ring could recycle unread data
    let mut config = base();
    config.window_length = Some(3 * 1024);
    assert_eq!(field_of(config.validate().unwrap_err()), "window_length");

    let mut config = base();
    config.subscriptions = vec!["a".into(), "a".into()];
    assert_eq!(field_of(config.validate().unwrap_err()), "subscriptions");

    let mut config = base();
    config.subscriptions = vec![String::new()];
    assert_eq!(field_of(config.validate().unwrap_err()), "subscriptions");

    let mut config = base();
    config.mode = Mode::Pipeline;
    assert_eq!(field_of(config.validate().unwrap_err()), "subscriptions");
}

#[test]
fn test_oversized_ring_is_a_config_error() {
    // window bounds would overflow usize; must be reported, not panic
    let config = DispatcherConfig {
        partition_count: usize::MAX / 512,
        partition_size: 1024,
        ..DispatcherConfig::default()
    };
    assert_eq!(field_of(config.validate().unwrap_err()), "partition_count");
    assert!(matches!(
        Dispatcher::from_config(config),
        Err(DispatcherError::Config { .. })
    ));
}

#[test]
fn test_log_buffer_shares_config_geometry_checks() {
    let config = DispatcherConfig {
        partition_count: 1,
        partition_size: 1024,
        ..DispatcherConfig::default()
    };
    let from_config = config.validate().unwrap_err().to_string();
    let from_buffer = LogBuffer::new(1, 1024).unwrap_err().to_string();
    println!("{from_config}");
    assert_eq!(from_config, from_buffer);
    assert_eq!(
        field_of(LogBuffer::check_geometry(3, 1001).unwrap_err()),
        "partition_size"
    );
}

#[test]
fn test_builder_buffer_size_splits_across_partitions() {
    let builder = DispatcherBuilder::new()
        .with_buffer_size(3 * 4096 + 5)
        .with_partition_count(3);
    let config = builder.config();
    assert_eq!(config.partition_size, 4096);

    let dispatcher = builder.build().unwrap();
    assert_eq!(dispatcher.log_buffer().partition_size(), 4096);
    assert_eq!(dispatcher.log_buffer().partition_count(), 3);
}

#[test]
fn test_builder_from_config() {
    let config = DispatcherConfig {
        name: "from-config".into(),
        partition_size: 2048,
        ..DispatcherConfig::default()
    };
    let dispatcher = DispatcherBuilder::from_config(config)
        .with_subscription("late-addition")
        .build()
        .unwrap();

    assert_eq!(dispatcher.name(), "from-config");
    assert!(dispatcher.get_subscription_by_name("late-addition").is_some());
    assert!(matches!(
        Dispatcher::builder().with_partition_count(0).build(),
        Err(DispatcherError::Config { .. })
    ));
}
