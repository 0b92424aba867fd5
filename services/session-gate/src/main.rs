#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    session_gate::run().await?;
    Ok(())
}
