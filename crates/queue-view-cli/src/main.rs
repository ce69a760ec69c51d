use queue_view_cli::run_cli;
use tracing::{debug, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        debug!(error = ?e, "Command failed");
        if e.is_transient() {
            warn!("The failure may be temporary; running the command again may succeed");
        }

        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }
}
