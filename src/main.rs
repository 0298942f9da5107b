//! agentbox-ssh-proxy - filtering SSH agent proxy for sandboxed containers

use clap::{CommandFactory, Parser};
use clap_complete::env::CompleteEnv;
use std::process::ExitCode;

use agentbox_ssh_proxy::cli::commands;
use agentbox_ssh_proxy::cli::exit_code;
use agentbox_ssh_proxy::cli::{Cli, Commands};
use agentbox_ssh_proxy::logging::{self, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // Handle dynamic shell completion if COMPLETE env var is set
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();

    if let Err(e) = logging::init(&LogConfig::from_flags(cli.verbose, cli.quiet)) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args, cli.config).await,
        Commands::Cleanup(args) => commands::cleanup::execute(args, cli.config).await,
        Commands::Version => {
            commands::version::print_version(cli.verbose);
            Ok(())
        }
    };

    match result {
        Ok(()) => exit_code::ExitCode::Success.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code::ExitCode::for_error(&e).into()
        }
    }
}
