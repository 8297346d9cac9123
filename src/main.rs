#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tapedeck::runtime::run().await
}
