#[tokio::main]
async fn main() -> anyhow::Result<()> {
    finrisk_lib::run().await
}
