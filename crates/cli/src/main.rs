use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    chatnav_cli::main_entry().await
}
