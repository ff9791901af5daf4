use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use protect_broker::comms::local_api;
use protect_broker::utils::logging;
use protect_broker::Settings;

#[derive(Parser)]
#[command(name = "protect-broker", version, about = "PingOne worker-credential broker for the Protect demo")]
struct AppCli {
    /// JSON settings file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Overrides PORT from the settings
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration and exit
    CheckConfig,
}

fn load_settings(path: Option<&str>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    if args.verbose {
        logging::init_with("debug");
    } else {
        logging::init();
    }

    let settings = load_settings(args.config.as_deref())?;
    if let Err(e) = settings.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    match args.command {
        Some(Commands::CheckConfig) => {
            info!(
                environment_id = settings.environment_id.as_deref().unwrap_or_default(),
                region = %settings.region,
                "configuration is valid"
            );
        }
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(settings.port);
            local_api::serve(settings, port).await?;
        }
        None => {
            let port = settings.port;
            local_api::serve(settings, port).await?;
        }
    }

    Ok(())
}
