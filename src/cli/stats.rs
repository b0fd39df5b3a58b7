use anyhow::Result;

use crate::server::AppState;

/// Display fact store statistics for the active identity.
pub async fn stats(state: &AppState) -> Result<()> {
    let id = state.identity.current().await?;
    let stats = state.store.stats().await?;

    println!("Fact Statistics ({id})");
    println!("{}", "=".repeat(40));
    println!("  Active facts:        {}", stats.count);
    println!("  Superseded:          {}", stats.superseded_count);
    println!(
        "  Recent ({}h):         {}",
        state.config.retrieval.recent_window_hours, stats.recent_count
    );
    println!("  Pending graph writes: {}", stats.pending_graph_writes);
    println!();

    if !stats.topic_histogram.is_empty() {
        println!("By Topic:");
        for (topic, count) in &stats.topic_histogram {
            println!("  {:<20} {}", topic, count);
        }
    }

    Ok(())
}
