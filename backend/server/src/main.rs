#[tokio::main]
async fn main() -> anyhow::Result<()> {
    incidence::start_server().await
}
