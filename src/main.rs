use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vision_chat::cli::{resolve_model, App, Args};
use vision_chat::llm::gateways::OllamaGateway;
use vision_chat::llm::{LlmGateway, ModelDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = args.settings().context("invalid settings")?;

    let gateway: Arc<dyn LlmGateway> = Arc::new(
        OllamaGateway::with_config(settings.ollama_config()).context("could not build HTTP client")?,
    );
    let model = resolve_model(&ModelDirectory::new(gateway.clone()), settings.model.clone()).await;
    info!("Using model {} at {}", model, settings.host);

    println!("vision-chat: {} via {}", model, settings.host);
    println!("Load an image with /load <path>, then type a question. /help lists commands.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut app = App::new(gateway, &settings, model, std::io::stdout()).with_mode(args.mode);
    app.run(stdin).await?;

    Ok(())
}
