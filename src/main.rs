use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use remote_mirror::cli::Cli;

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = remote_mirror::run(&cli);

    let code = remote_mirror::emit_report(&result, cli.json, &mut std::io::stdout().lock());
    ExitCode::from(code)
}
