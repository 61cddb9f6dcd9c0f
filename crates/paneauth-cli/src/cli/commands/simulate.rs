//! Simulate command handler.

use std::path::Path;

use anyhow::{Context, Result};
use paneauth_core::config::AuthConfig;
use paneauth_core::orchestrator::FlowState;
use paneauth_core::sim::{Scenario, Simulation};
use serde::Serialize;

#[derive(Serialize)]
struct Summary {
    trace: Vec<&'static str>,
    succeeded: bool,
    output: String,
    error_kind: Option<&'static str>,
    show_sign_out: bool,
}

pub async fn run(config: AuthConfig, scenario_path: &Path, dialog: bool, json: bool) -> Result<()> {
    let scenario = Scenario::load(scenario_path)?;
    let sim = Simulation::new(scenario, config);
    let taskpane = sim.taskpane().context("build taskpane")?;

    let report = if dialog {
        taskpane.sign_in_with_dialog().await
    } else {
        taskpane.sign_in().await
    };
    tracing::debug!(calls = sim.log.calls().len(), "simulation finished");

    let summary = Summary {
        trace: report.trace.iter().map(|s| s.name()).collect(),
        succeeded: report.terminal_state() == FlowState::Succeeded,
        output: sim.output.last().unwrap_or_default(),
        error_kind: report
            .result
            .as_ref()
            .err()
            .and_then(|e| e.kind())
            .map(|k| k.name()),
        show_sign_out: report.show_sign_out,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("trace: {}", summary.trace.join(" -> "));
    println!("output: {}", summary.output);
    if let Some(kind) = summary.error_kind {
        println!("kind: {kind}");
    }
    println!(
        "sign-out: {}",
        if summary.show_sign_out { "shown" } else { "hidden" }
    );
    Ok(())
}
