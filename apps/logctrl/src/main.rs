use clap::Parser;
use logctrl::telemetry::logging;
use logctrl::terminal::app;
use logctrl::terminal::cli::Cli;
use logctrl::terminal::config::LaunchRole;
use logctrl::terminal::error::HostError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("logctrl: {err}");
            1
        }
    };
    logging::shutdown();
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), HostError> {
    let role = LaunchRole::resolve()?;
    logging::init(&cli.logging.to_config(role))?;
    app::run(cli, role).await
}
