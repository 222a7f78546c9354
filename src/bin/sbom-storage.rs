use sbom_storage::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::start().await {
        let message = format!("{e:#}");
        if tracing::dispatcher::has_been_set() {
            tracing::error!(error = %message, "Fatal error");
        } else {
            eprintln!("Error: {message}");
        }
        std::process::exit(1);
    }
}
