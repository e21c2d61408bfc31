use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    replaybook_cli::cli::app::run().await
}
