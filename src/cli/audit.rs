//! CLI `audit` command: report, and optionally repair, divergence between the
//! local store and the graph.

use anyhow::Result;

use crate::server::{ensure_graph_service, AppState};

pub async fn audit(state: &AppState, repair: bool) -> Result<()> {
    ensure_graph_service(state).await;
    let id = state.identity.current().await?;
    let report = state.auditor.audit(&id).await?;

    println!("Consistency report for {id}");
    println!("{}", "=".repeat(40));
    println!("Missing in graph:     {}", report.missing_in_graph.len());
    for fact_id in &report.missing_in_graph {
        println!("  {fact_id}");
    }
    println!("Orphaned in graph:    {}", report.orphaned_in_graph.len());
    for entity in &report.orphaned_in_graph {
        println!("  {entity}");
    }

    if !repair {
        if !report.missing_in_graph.is_empty() {
            println!();
            println!("Run `cortex audit --repair` to re-issue the missing graph writes.");
        }
        return Ok(());
    }

    let result = state.auditor.repair(&report).await?;
    println!();
    println!("Repair");
    println!("  Repaired:           {}", result.repaired.len());
    println!("  Skipped:            {}", result.skipped.len());
    println!("  Failed:             {}", result.failed.len());
    for failure in &result.failed {
        println!("    {}: {}", failure.fact_id, failure.error);
    }
    if !result.orphans_left_for_review.is_empty() {
        println!(
            "  {} orphaned entities left for manual review",
            result.orphans_left_for_review.len()
        );
    }
    Ok(())
}
