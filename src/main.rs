use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fincore::api::{Cli, Command, run_cli_simulation, run_http_server};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            if let Err(e) = run_http_server(args).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Simulate(args) => {
            let outcome = tokio::task::spawn_blocking(move || run_cli_simulation(args)).await;
            match outcome {
                Ok(Ok(json)) => println!("{json}"),
                Ok(Err(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(2);
                }
                Err(e) => {
                    eprintln!("Simulation task failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
