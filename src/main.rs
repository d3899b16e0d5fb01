#[tokio::main]
async fn main() {
    if let Err(err) = x402_paywall::run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
