//! Workbench - Main Entry Point

use clap::Parser;
use regression_workbench::cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regression_workbench=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reply = run(cli)?;
    println!("{}", reply.to_json_pretty()?);

    if !reply.success {
        std::process::exit(1);
    }
    Ok(())
}
