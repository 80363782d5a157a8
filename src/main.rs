mod cli;
mod config;
mod constants;
mod engine;
mod error;
mod git;
mod logger;
mod mask;
mod output;
mod providers;
mod query;

use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use crate::mask::mask;

#[tokio::main]
async fn main() {
    // Peek at the raw args for quiet mode (needed before anything prints)
    let args: Vec<String> = std::env::args().collect();
    let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

    // Create cancellation token for cooperative shutdown
    let cancel_token = CancellationToken::new();
    let cancel_clone = cancel_token.clone();

    // CTRL-C handling via ctrlc crate (SetConsoleCtrlHandler on Windows,
    // sigaction on Unix). First press: graceful shutdown via
    // CancellationToken. Second press: force exit.
    ctrlc::set_handler(move || {
        if constants::SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            // Second CTRL-C: force exit
            eprintln!("\nforced shutdown");
            std::process::exit(130);
        }
        if !is_quiet {
            eprintln!("\nshutting down gracefully... (press Ctrl-C again to force)");
        }
        constants::SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        cancel_clone.cancel();
    })
    .expect("Failed to set CTRL-C handler");

    // Tracing is initialized inside cli::run once the config dir is known.
    let code = match cli::run(cancel_token).await {
        Ok(code) => code,
        Err(e) => {
            // Every error surface goes through the masker, even here.
            eprintln!("error: {}", mask(&e.to_string()));
            e.exit_code()
        }
    };
    std::process::exit(code);
}
