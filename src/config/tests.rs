use super::*;

#[test]
fn test_default_config_is_valid() {
    assert!(Config::default().validate().is_ok());
}

#[test]
fn test_validate_zero_top_k() {
    let mut config = Config::default();
    config.vector.top_k = 0;
    assert_eq!(config.validate(), Err(ConfigError::ZeroTopK));
}

#[test]
fn test_validate_threshold_range() {
    let mut config = Config::default();
    config.vector.threshold = 1.5;
    assert_eq!(
        config.validate(),
        Err(ConfigError::ThresholdOutOfRange { value: 1.5 })
    );
}

#[test]
fn test_validate_temperature_range() {
    let mut config = Config::default();
    config.llm.temperature = -0.1;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::TemperatureOutOfRange { .. })
    ));
}

#[test]
fn test_content_priority_parse() {
    assert_eq!(ContentPriority::parse("image_text"), ContentPriority::ImageText);
    assert_eq!(ContentPriority::parse("text_only"), ContentPriority::TextOnly);
    assert_eq!(ContentPriority::parse("none"), ContentPriority::None);
    assert_eq!(ContentPriority::parse("bogus"), ContentPriority::None);
}

#[test]
fn test_content_priority_serde_round_trip() {
    let json = serde_json::to_string(&ContentPriority::ImageText).unwrap();
    assert_eq!(json, "\"image_text\"");
    let back: ContentPriority = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ContentPriority::ImageText);
}

#[test]
fn test_config_deserializes_with_partial_fields() {
    let config: Config = serde_json::from_str(
        r#"{"vector": {"top_k": 7, "debug_mode": true}, "product_intro": "hi"}"#,
    )
    .unwrap();
    assert_eq!(config.vector.top_k, 7);
    assert!(config.vector.debug_mode);
    assert!((config.vector.threshold - 0.6).abs() < 1e-6);
    assert_eq!(config.product_intro, "hi");
}
