use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "kfgcp", version, about = "Reconcile a Kubeflow deployment on GCP")]
struct Cli {
    /// Deployment spec file.
    #[arg(long, global = true, default_value = "app.yaml", env = "KFGCP_SPEC")]
    spec: PathBuf,

    /// Sandbox state file. Defaults to `.kfgcp-sandbox.json` next to the spec.
    #[arg(long, global = true, env = "KFGCP_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a new deployment spec and enable the project's APIs.
    Init(commands::init::InitArgs),

    /// Show what apply would do, using local files only.
    Plan,

    /// Create or update every resource for the spec.
    Apply,

    /// Delete the spec's deployments and remove its identities from the policy.
    Delete,

    /// Show the observed state of every resource group.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let state = cli.state.clone();

    match cli.cmd {
        Command::Init(args) => commands::init::run(&cli.spec, state.as_deref(), args).await,
        Command::Plan => commands::plan::run(&cli.spec),
        Command::Apply => commands::apply::run(&cli.spec, state.as_deref()).await,
        Command::Delete => commands::delete::run(&cli.spec, state.as_deref()).await,
        Command::Status => commands::status::run(&cli.spec, state.as_deref()).await,
    }
}
