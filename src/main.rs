use clap::{Parser, Subcommand};

use tokenkeeper::cli::auth::DEFAULT_AUTH_TIMEOUT_MS;
use tokenkeeper::cli::output::print_error;

#[derive(Parser)]
#[command(
    name = "tokenkeeper",
    version,
    about = "Keeps OAuth access tokens fresh and sends authenticated API requests"
)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authorization code flow and store the resulting tokens
    Auth {
        /// How long to wait for the browser callback, in milliseconds
        #[arg(long, env = "TOKENKEEPER_AUTH_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show whether credentials exist and when they expire
    Status {
        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Refresh the access token if it is close to expiry
    Refresh {
        /// Refresh even if the token is still fresh
        #[arg(long)]
        force: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Send an authenticated request to the configured API
    Request {
        /// HTTP method, e.g. GET or POST
        method: String,

        /// Path relative to apiBaseUrl, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },

    /// Run the refresh scheduler and the status/auth HTTP endpoints
    Serve,
}

impl Commands {
    fn json(&self) -> bool {
        matches!(
            self,
            Commands::Status { json: true } | Commands::Refresh { json: true, .. }
        )
    }

    fn default_log_level(&self) -> &'static str {
        match self {
            Commands::Serve => "info",
            _ => "warn",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TOKENKEEPER_LOG_LEVEL").unwrap_or_else(
                |_| tracing_subscriber::EnvFilter::new(cli.command.default_log_level()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let json = cli.command.json();
    if let Err(e) = run(cli).await {
        print_error(&e, json);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), tokenkeeper::TokenError> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Auth {
            timeout_ms,
            no_browser,
        } => {
            let timeout =
                std::time::Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_AUTH_TIMEOUT_MS));
            tokenkeeper::cli::auth::run_auth(config, timeout, !no_browser).await
        }
        Commands::Status { json } => tokenkeeper::cli::status::run_status(config, json).await,
        Commands::Refresh { force, json } => {
            tokenkeeper::cli::status::run_refresh(config, force, json).await
        }
        Commands::Request { method, path, data } => {
            tokenkeeper::cli::request::run_request(config, &method, &path, data.as_deref()).await
        }
        Commands::Serve => tokenkeeper::cli::serve::run_serve(config).await,
    }
}
