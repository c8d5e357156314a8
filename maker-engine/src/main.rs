//! Demo binary: wires a `MakerEngine` with its default adapters against the
//! current directory and runs a single task to completion.

use maker_engine::MakerEngine;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = maker_engine::config::from_env();
    let workspace_root = std::env::current_dir()?;
    let engine = MakerEngine::with_defaults(config, workspace_root)?;

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Add a health-check endpoint to the service.".to_string());

    let model = maker_core::model::default_model_client(&engine.config(), "reasoner")?;

    let task_id = engine
        .start_task(
            model.as_ref(),
            "demo-task",
            prompt,
            "You are the architect. Decompose this request into an ordered list of steps as a JSON array.",
        )
        .await?;

    tracing::info!(task = %task_id, "executing plan");
    engine.execute_plan().await?;

    Ok(())
}
