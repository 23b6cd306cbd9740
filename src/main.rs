#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parkspot_lib::run().await
}
