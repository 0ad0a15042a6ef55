#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cicd_server::bootstrapper::run().await
}
