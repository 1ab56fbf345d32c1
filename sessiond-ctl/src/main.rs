//! sessiond-ctl: command-line control client for sessiond

use clap::Parser;

use sessiond_ctl::cli::Cli;
use sessiond_ctl::{commands, Client};
use sessiond_utils::{init_logging_with_config, LogConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging_with_config(LogConfig::ctl()) {
        eprintln!("{}", e);
    }

    let cli = Cli::parse();
    let client = match cli.socket {
        Some(path) => Client::new(path),
        None => Client::with_default_socket(),
    };

    let exit_code = match commands::execute(cli.command, &client, cli.json).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}
