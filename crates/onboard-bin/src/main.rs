//! Onboard - headless client for the investment onboarding backend.

mod app;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use onboard_config_and_utils::{init_logging, Config, Paths};
use onboarding_records::OtpChannel;

/// Onboard command-line interface.
#[derive(Parser)]
#[command(name = "onboard")]
#[command(about = "Sign in, onboard and verify against the hosted backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, logs and the session cache. Defaults to ~/.onboard
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Skip the internet reachability probe
    #[arg(long, global = true)]
    no_probe: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the endpoint URL and anon key without touching the network
    CheckConfig,
    /// Run the internet reachability probe
    Probe,
    /// Load the session and print the resulting state
    Status,
    /// Print every state change until interrupted
    Watch,
    /// Sign in with email and password
    SignIn {
        email: String,
        #[arg(long, env = "ONBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    SignUp {
        email: String,
        #[arg(long, env = "ONBOARD_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Sign out and forget the cached session
    SignOut,
    /// One-time verification codes
    Otp {
        #[command(subcommand)]
        command: OtpCommands,
    },
    /// Onboarding wizard steps
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },
    /// Check the seeded reference tables
    ReferenceCheck,
}

#[derive(Subcommand)]
enum OtpCommands {
    /// Issue a new code for the signed-in user
    Issue { channel: OtpChannel, contact: String },
    /// Verify a code
    Verify { channel: OtpChannel, code: String },
}

#[derive(Subcommand)]
enum StepCommands {
    /// Mark a step complete
    Complete {
        step: u32,
        /// Step answers as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &paths);

    match cli.command {
        Commands::CheckConfig => app::check_config(&config)?,
        Commands::Probe => app::probe(&config).await?,
        command => {
            let client = app::connect(&config, &paths, cli.no_probe).await?;
            let result = run(&client, command).await;
            client.shutdown().await;
            result?;
        }
    }

    Ok(())
}

async fn run(client: &app::Client, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Status => client.status().await?,
        Commands::Watch => client.watch().await?,
        Commands::SignIn { email, password } => client.sign_in(&email, &password).await?,
        Commands::SignUp {
            email,
            password,
            full_name,
        } => {
            client
                .sign_up(&email, &password, full_name.as_deref())
                .await?
        }
        Commands::SignOut => client.sign_out().await?,
        Commands::Otp { command } => match command {
            OtpCommands::Issue { channel, contact } => client.issue_otp(channel, &contact).await?,
            OtpCommands::Verify { channel, code } => client.verify_otp(channel, &code).await?,
        },
        Commands::Step { command } => match command {
            StepCommands::Complete { step, data } => {
                client.complete_step(step, data.as_deref()).await?
            }
        },
        Commands::ReferenceCheck => client.reference_check().await?,
        Commands::CheckConfig | Commands::Probe => {}
    }
    Ok(())
}
