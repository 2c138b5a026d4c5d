use clap::Parser;

use alarmd::cli::{self, Cli};
use alarmd::errors::AlarmError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {e}");
        let code = if matches!(e.downcast_ref::<AlarmError>(), Some(AlarmError::Storage(_))) {
            2
        } else {
            1
        };
        std::process::exit(code);
    }
}
