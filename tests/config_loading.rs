use std::io::Write;
use std::time::Duration;

use redraft_core::config::AppConfig;
use redraft_core::error::RedraftError;

fn write_config(toml_content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[model]
provider = "openrouter"
model_id = "deepseek/deepseek-chat"
api_key = "sk-test-key"
base_url = "https://openrouter.ai/api/v1/chat/completions"
max_tokens = 2048
temperature = 0.3

[model.retry]
max_retries = 5
initial_backoff_ms = 200
max_backoff_ms = 5000

[model.extra_headers]
"X-Title" = "redraft"

[[fallback_models]]
provider = "ollama"
model_id = "llama3.2"
base_url = "http://localhost:11434/v1/chat/completions"

[workflow]
max_revisions = 3
approval_marker = "LGTM"
stage_timeout_secs = 45
max_steps = 20
output_file = "out/report.md"

[stages]
planner = 0.1
researcher = 0.3
writer = 0.7
reviewer = 0.0
reviser = 0.6
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openrouter");
    assert_eq!(config.model.model_id, "deepseek/deepseek-chat");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.extra_headers.get("X-Title").map(String::as_str), Some("redraft"));

    let retry = config.model.retry.expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "ollama");

    assert_eq!(config.workflow.max_revisions, 3);
    assert_eq!(config.workflow.approval_marker, "LGTM");
    assert_eq!(config.workflow.stage_timeout(), Some(Duration::from_secs(45)));
    assert_eq!(config.workflow.max_steps, 20);
    assert_eq!(config.workflow.output_file, "out/report.md");

    assert_eq!(config.stages.planner, 0.1);
    assert_eq!(config.stages.reviser, 0.6);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("REDRAFT_TEST_API_KEY", "expanded-key-value");

    let tmp = write_config(
        r#"
[model]
model_id = "test-model"
api_key = "${REDRAFT_TEST_API_KEY}"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("REDRAFT_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_config(
        r#"
[model]
model_id = "llama3.2"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openrouter");
    assert!(config.model.retry.is_none());
    assert_eq!(config.workflow.max_revisions, 2);
    assert_eq!(config.workflow.approval_marker, "APPROVE");
    assert_eq!(config.workflow.stage_timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.workflow.output_file, "research_report.md");
    assert_eq!(config.stages.planner, 0.0);
    assert_eq!(config.stages.writer, 0.5);
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/redraft.toml")).unwrap_err();
    assert!(matches!(err, RedraftError::ConfigNotFound(_)));
    assert!(err.is_configuration());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let tmp = write_config("[model\nmodel_id = ");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, RedraftError::Config(_)));
}

#[test]
fn test_redacted_config_serializes_without_keys() {
    let tmp = write_config(
        r#"
[model]
model_id = "m"
api_key = "sk-secret"
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");
    let shown = toml::to_string_pretty(&config.redacted()).expect("serialize");
    assert!(!shown.contains("sk-secret"));
    assert!(shown.contains("***"));
}
