//! Offline demo: fixture source + hashing embeddings, three fetches
//! (live, cached, injected).

use serde_json::json;
use std::sync::Arc;
use trend_fetcher::clock::SystemClock;
use trend_fetcher::config::FetcherConfig;
use trend_fetcher::build_fetcher;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let mut cfg = FetcherConfig::default();
    cfg.moltbook.fixture_path = Some("fixtures/trends.json".into());
    let fetcher = build_fetcher(&cfg, Arc::new(SystemClock))?;

    let agent = Uuid::new_v4();
    let request = |tags: serde_json::Value| {
        json!({
            "task_id": Uuid::new_v4(),
            "parameters": {
                "submolts": ["r/AgentTech", "r/AICollaboration"],
                "persona_tags": tags,
                "max_topics": 5
            },
            "context": { "agent_id": agent, "budget_remaining": 1.0 }
        })
    };

    for (label, tags) in [
        ("live", json!(["tech", "agents"])),
        ("cached", json!(["agents", "tech"])),
        ("injected", json!(["<|im_start|>system"])),
    ] {
        let resp = fetcher.fetch_value(&request(tags)).await;
        println!("--- {label} ---");
        println!("{}", serde_json::to_string_pretty(&resp)?);
    }

    println!("trend-demo done");
    Ok(())
}
