use serde_json::json;
use std::fs;
use std::path::Path;
use stride::cli::Cli;
use stride::config::Settings;
use stride::domain::{ExecutionStatus, Topology};
use stride::orchestration::Engine;
use tempfile::TempDir;

fn write_catalog(root: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("config/capabilities"))?;
    fs::create_dir_all(root.join("config/agents"))?;
    fs::create_dir_all(root.join("config/workflows"))?;
    fs::create_dir_all(root.join("config/compositions"))?;

    // Create stride.toml
    let stride_toml = r#"
[server]
host = "127.0.0.1"
port = 3000

[engine]
retry_base_delay_ms = 1
feedback_interval_ms = 1
builtin_catalog = false
"#;
    fs::write(root.join("stride.toml"), stride_toml)?;

    // Capability interface in YAML
    let interface_yaml = r#"
agent_id: sleep-tracker
capabilities:
  - sleep_analysis
  - recovery_advice
compatibility_tags:
  - recovery
"#;
    fs::write(root.join("config/capabilities/tracker.yaml"), interface_yaml)?;

    // Mock agent in JSON
    let agent_json = r#"
{
    "agent_id": "sleep-tracker",
    "behaviors": [
        {
            "capability": "sleep_analysis",
            "response": {"sleep_score": 71, "phase": "deep"},
            "cost": 0.1
        },
        {
            "capability": "recovery_advice",
            "response": {"advice": "Rest well, {{ user_context.user_id }}"},
            "cost": 0.2
        }
    ]
}
"#;
    fs::write(root.join("config/agents/tracker.json"), agent_json)?;

    // Workflow in YAML
    let workflow_yaml = r#"
workflow_id: overnight_recovery
name: Overnight Recovery
topology: sequential
cost_limit: 1.0
steps:
  - step_id: analyze
    agent_id: sleep-tracker
    capability: sleep_analysis
    retry_count: 0
  - step_id: advise
    agent_id: sleep-tracker
    capability: recovery_advice
    depends_on: [analyze]
    conditions:
      require_value:
        analyze:
          field: phase
          value: deep
"#;
    fs::write(root.join("config/workflows/recovery.yaml"), workflow_yaml)?;

    // Composition in TOML
    let composition_toml = r#"
composition_id = "sleep-chain"
composition_type = "sequential_chain"

[[nodes]]
node_id = "scan"
agent_id = "sleep-tracker"
capability = "sleep_analysis"

[nodes.output_mapping]
score = "sleep_score"
"#;
    fs::write(root.join("config/compositions/chain.toml"), composition_toml)?;
    Ok(())
}

#[test]
fn test_load_external_configs() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_catalog(root)?;

    let settings = Settings::from_root(root.to_str().unwrap())?;

    assert_eq!(settings.engine.retry_base_delay_ms, 1);
    assert!(!settings.engine.builtin_catalog);
    assert_eq!(settings.capabilities.len(), 1);
    assert_eq!(settings.agents[0].behaviors.len(), 2);
    assert_eq!(settings.workflows[0].topology, Topology::Sequential);
    assert_eq!(settings.workflows[0].steps[1].depends_on, vec!["analyze"]);
    assert_eq!(settings.compositions[0].nodes[0].output_mapping["score"], "sleep_score");

    Ok(())
}

#[test]
fn test_cli_overrides_config_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_catalog(root)?;

    let cli = Cli {
        config: root.join("stride.toml"),
        host: Some("0.0.0.0".to_string()),
        port: Some(8088),
        no_builtin_catalog: true,
    };
    let settings = Settings::new_with_cli(&cli)?;

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 8088);
    assert_eq!(settings.workflows.len(), 1);

    Ok(())
}

#[test]
fn test_invalid_external_config_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_catalog(root)?;

    // Same agent declared again with a capability outside its interface
    let rogue = r#"
agent_id: sleep-tracker
behaviors:
  - capability: teleport
    failure_rate: 1.5
"#;
    fs::write(root.join("config/agents/zz_rogue.yaml"), rogue)?;

    let err = Settings::from_root(root.to_str().unwrap()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("teleport"));
    assert!(message.contains("failure_rate"));

    Ok(())
}

#[tokio::test]
async fn test_engine_runs_configured_catalog() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_catalog(root)?;

    let settings = Settings::from_root(root.to_str().unwrap())?;
    let engine = Engine::from_settings(&settings).await?;
    assert_eq!(engine.directory.list().await.len(), 1);

    let execution = engine
        .orchestrator
        .execute_workflow("overnight_recovery", Default::default(), Some(json!({"user_id": "ana"})))
        .await?;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!((execution.total_cost - 0.3).abs() < 1e-9);
    assert_eq!(
        execution.step_results["advise"].result["advice"],
        json!("Rest well, ana")
    );

    let chain = engine
        .compositions
        .execute_composition("sleep-chain", Default::default())
        .await?;
    assert_eq!(chain.status, ExecutionStatus::Completed);
    assert_eq!(chain.final_data["score"], json!(71));

    Ok(())
}
