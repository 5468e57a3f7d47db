use std::io::{self, Write};

use clap::Parser;

use mail_ledger::build_sync_service;
use mail_ledger::config::AppConfig;
use mail_ledger::mailbox::Credentials;

#[derive(Parser, Debug)]
#[command(
    name = "sync_once",
    about = "Synchronize one mailbox into its ledger and print the ledger link"
)]
struct Args {
    /// IMAP server as `host` or `host:port`.
    #[arg(long)]
    address: String,

    /// Login name; also the ledger owner.
    #[arg(long)]
    user: String,

    /// Password or app password.
    #[arg(long, env = "MAIL_LEDGER_SECRET", hide_env_values = true)]
    secret: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let credentials = Credentials {
        address: args.address.trim().to_string(),
        user: args.user.trim().to_string(),
        secret: args.secret,
    };

    if credentials.address.is_empty() || credentials.user.is_empty() {
        writeln!(io::stderr(), "error: --address and --user must not be empty")?;
        std::process::exit(2);
    }

    let service = build_sync_service(AppConfig::from_env()).await;

    match service.sync(&credentials).await {
        Ok(outcome) => {
            log::info!(
                "{} new messages recorded for {}",
                outcome.new_messages,
                credentials.user
            );
            writeln!(io::stdout(), "{}", outcome.link)?;
            Ok(())
        }
        Err(err) => {
            writeln!(io::stderr(), "error: {err}")?;
            std::process::exit(if err.is_client_error() { 2 } else { 1 });
        }
    }
}
