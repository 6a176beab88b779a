//! Result model, registry and dispatcher working together

mod common;

use std::sync::Arc;

use checkup::{
    CheckResult, CheckStatus, DispatchError, PluginConstructor, PluginInfo, PluginRegistry, PluginType, RegistryError,
    ResultError, run_check, try_run_check,
};
use common::{ConcurrencyGauge, StaticPlugin, config, init_tracing, test_registry};
use serde_json::json;

#[test]
fn test_result_round_trip_through_json() {
    let original = CheckResult::warning("Certificate expires soon").with_response_time(0.25).with_detail("days", 12);

    let text = serde_json::to_string(&original).unwrap();
    let parsed: CheckResult = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, original);

    let value = original.to_value();
    assert_eq!(value["status"], json!("warning"));
    assert_eq!(CheckResult::from_value(value).unwrap(), original);
}

#[test]
fn test_result_rejects_unknown_status() {
    let err = CheckResult::from_value(json!({"status": "degraded", "message": "x", "response_time": 0.0}));
    assert!(matches!(err, Err(ResultError::InvalidStatus(s)) if s == "degraded"));
    assert!(CheckResult::from_status_str("ok", "x", 0.0, Default::default()).is_err());
}

#[test]
fn test_registry_first_registration_wins() {
    init_tracing();
    let mut registry = PluginRegistry::new();
    registry.register_type::<StaticPlugin>().unwrap();

    let replacement = PluginInfo {
        description: "impostor".into(),
        required_config: vec![],
        optional_config: vec![],
    };
    let impostor: PluginConstructor = Arc::new(|config| Box::new(common::FailingPlugin::from_config(config)));
    let err = registry.register("static", replacement, impostor).unwrap_err();

    assert_eq!(err, RegistryError::DuplicateRegistration("static".into()));
    assert_eq!(registry.info("static").unwrap().description, "Returns a fixed result");
    assert_eq!(registry.list_names(), vec!["static"]);
}

#[test]
fn test_registry_rejects_bad_names() {
    let mut registry = PluginRegistry::new();
    let info = PluginInfo { description: String::new(), required_config: vec![], optional_config: vec![] };
    let constructor: PluginConstructor = Arc::new(|config| Box::new(StaticPlugin::from_config(config)));
    let err = registry.register("Has Spaces", info, constructor).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPlugin { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_dispatch_unknown_plugin() {
    init_tracing();
    let registry = test_registry(Arc::new(ConcurrencyGauge::default()));

    let result = run_check(&registry, "nonexistent", config(json!({}))).await;
    assert_eq!(result.status(), CheckStatus::Error);
    assert_eq!(result.message(), "Plugin 'nonexistent' not found in registry");
    assert_eq!(result.raw_data()["error_type"], json!("PluginNotFound"));

    let err = try_run_check(&registry, "nonexistent", config(json!({}))).await.unwrap_err();
    assert!(matches!(err, DispatchError::PluginNotFound(name) if name == "nonexistent"));
}

#[tokio::test]
async fn test_dispatch_invalid_configuration_echoes_config() {
    let registry = test_registry(Arc::new(ConcurrencyGauge::default()));

    let result = run_check(&registry, "static", config(json!({"message": "no status"}))).await;
    assert!(result.is_error());
    assert_eq!(result.message(), "Invalid configuration for plugin static");
    assert_eq!(result.raw_data()["config"], json!({"message": "no status"}));
    assert_eq!(result.raw_data()["error_type"], json!("InvalidConfiguration"));
}

#[tokio::test]
async fn test_dispatch_passes_plugin_result_through() {
    let registry = test_registry(Arc::new(ConcurrencyGauge::default()));

    let result = run_check(&registry, "static", config(json!({"status": "warning", "message": "meh"}))).await;
    assert_eq!(result.status(), CheckStatus::Warning);
    assert_eq!(result.message(), "meh");
}

#[tokio::test]
async fn test_dispatch_contains_plugin_errors() {
    let registry = test_registry(Arc::new(ConcurrencyGauge::default()));

    let result = run_check(&registry, "failing", config(json!({}))).await;
    assert!(result.is_error());
    assert!(result.message().starts_with("Exception running check:"));
    assert!(result.message().contains("connection reset by peer"));
    assert_eq!(result.raw_data()["error_type"], json!("io::Error"));
}

#[tokio::test]
async fn test_dispatch_contains_panics() {
    let registry = test_registry(Arc::new(ConcurrencyGauge::default()));

    let result = run_check(&registry, "panicking", config(json!({}))).await;
    assert!(result.is_error());
    assert_eq!(result.raw_data()["error"], json!("plugin exploded"));
    assert_eq!(result.raw_data()["error_type"], json!("panic"));
}
