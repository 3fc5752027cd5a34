use std::process::ExitCode;

use clap::Parser;
use survey_cli::{INFRA_EXIT_CODE, SurveyCli};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "survey_core=debug,survey_cli=debug"
    } else {
        "survey_core=info,survey_cli=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = SurveyCli::parse();
    init_tracing(cli.verbose);

    match cli.run().await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(INFRA_EXIT_CODE)
        }
    }
}
