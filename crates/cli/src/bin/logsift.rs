use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    logsift_cli::main_entry().await
}
