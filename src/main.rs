#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_links::run().await {
        eprintln!("exam-links fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
