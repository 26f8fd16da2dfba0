//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use vigil_core::error::ConfigError;
use vigil_core::redteam::{load_corpus, run_cases};
use vigil_core::verification::PolicyEngine;
use vigil_core::{
    Alert, PipelineState, SeedDocument, TriageSystem, VigilConfig, compute_payload_hash,
};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Triage { alert, playbooks } => {
            handle_triage(&alert, playbooks.as_deref(), workspace).await
        }
        Commands::Redteam { corpus, results } => handle_redteam(&corpus, &results, workspace),
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Hash { text } => {
            println!("{}", compute_payload_hash(&text));
            Ok(())
        }
    }
}

fn load(workspace: &Path) -> anyhow::Result<VigilConfig> {
    Ok(vigil_core::load_config(Some(workspace), None).map_err(ConfigError::from)?)
}

async fn handle_triage(
    alert_path: &Path,
    playbooks: Option<&Path>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let state = triage(alert_path, playbooks, workspace).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// Ingest the alert file the same way the webhook boundary would: hash
/// the raw bytes, sanitize, validate. Then run it through the pipeline.
async fn triage(
    alert_path: &Path,
    playbooks: Option<&Path>,
    workspace: &Path,
) -> anyhow::Result<PipelineState> {
    let config = load(workspace)?;
    let system = TriageSystem::from_config(&config)?;

    if let Some(dir) = playbooks {
        let documents = read_playbooks(dir)?;
        let stored = system.seed(&documents)?;
        tracing::info!(found = documents.len(), stored, "Indexed playbooks");
    }

    let raw = std::fs::read_to_string(alert_path)
        .map_err(|e| anyhow::anyhow!("Cannot read alert {}: {}", alert_path.display(), e))?;
    let alert = Alert::from_raw_json(&raw)?;
    tracing::info!(alert_id = %alert.id, payload_hash = %alert.payload_hash, "Alert ingested");

    Ok(system.orchestrator.run(alert).await?)
}

/// Collect `*.md` and `*.txt` files under `dir`. The file stem is both the
/// document id and the source tag checked against the allowlist.
fn read_playbooks(dir: &Path) -> anyhow::Result<Vec<SeedDocument>> {
    if !dir.is_dir() {
        anyhow::bail!("Playbook directory not found: {}", dir.display());
    }

    let mut documents = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let is_playbook = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "md" || e == "txt");
        if !is_playbook {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let content = std::fs::read_to_string(path)?;
        documents.push(SeedDocument {
            doc_id: stem.to_string(),
            content,
            metadata: BTreeMap::from([
                ("source".to_string(), json!(stem)),
                ("path".to_string(), json!(path.display().to_string())),
            ]),
        });
    }
    Ok(documents)
}

fn handle_redteam(corpus: &Path, results: &Path, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let engine = PolicyEngine::with_patterns(&config.verification.extra_deny_patterns)?;
    let cases = load_corpus(corpus)?;
    let report = run_cases(&engine, &cases);

    std::fs::write(results, serde_json::to_string_pretty(&report)?)?;

    for detail in report.details.iter().filter(|d| !d.test_passed) {
        println!(
            "  MISS {}: expected {}, got {}",
            detail.id, detail.expected, detail.actual
        );
    }
    println!(
        "Red team: {}/{} cases matched ({:.1}%). Report written to {}",
        report.summary.passed,
        report.summary.total,
        report.summary.rate * 100.0,
        results.display()
    );
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
