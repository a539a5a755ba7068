//! pkgdriver CLI - install, uninstall and diff packages on target clusters

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;

use error::CliError;

#[derive(Parser)]
#[command(name = "pkgdriver")]
#[command(version)]
#[command(about = "Reconcile OCI-hosted chart packages against target clusters", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    cluster: ClusterArgs,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

/// Connection settings shared by every command
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Target cluster name (empty for the current cluster)
    #[arg(long, global = true, env = "PKGDRIVER_CLUSTER", default_value = "")]
    pub cluster: String,

    /// Namespace holding `<cluster>-kubeconfig` secrets
    #[arg(long, global = true, env = "PKGDRIVER_KUBECONFIG_NAMESPACE", default_value = "default")]
    pub kubeconfig_namespace: String,

    /// Release storage backend (secret or memory)
    #[arg(long, global = true, env = "PKGDRIVER_STORAGE")]
    pub storage: Option<String>,

    /// Namespace releases are stored in
    #[arg(long, global = true, env = "PKGDRIVER_NAMESPACE")]
    pub storage_namespace: Option<String>,

    /// Registry pull secret name
    #[arg(long, global = true, env = "PKGDRIVER_SECRET_NAME")]
    pub secret_name: Option<String>,

    /// Namespace of the registry pull secret and the tracking ConfigMap
    #[arg(long, global = true, env = "PKGDRIVER_SECRET_NAMESPACE")]
    pub secret_namespace: Option<String>,

    /// Registry credentials file (Docker config.json format)
    #[arg(long, global = true, env = "PKGDRIVER_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,
}

/// Values sources shared by install and diff
#[derive(Args, Debug, Clone)]
pub struct ValuesArgs {
    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package, or upgrade it if already installed
    #[command(disable_version_flag = true)]
    Install {
        /// Package (release) name
        name: String,

        /// Chart URI (oci://, https:// or a bare registry reference)
        chart: String,

        /// Chart version tag
        #[arg(long, default_value = "")]
        version: String,

        /// Chart content digest (sha256:...)
        #[arg(long, default_value = "")]
        digest: String,

        /// Target namespace (defaults to the chart's defaultNamespace)
        #[arg(short, long, default_value = "")]
        namespace: String,

        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Uninstall a package
    Uninstall {
        /// Package (release) name
        name: String,
    },

    /// Compare values against the configuration of an installed package
    Diff {
        /// Package (release) name
        name: String,

        #[command(flatten)]
        values: ValuesArgs,

        /// Exit with status 3 when the configuration changed
        #[arg(long)]
        exit_code: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> error::Result<i32> {
    match cli.command {
        Commands::Install {
            name,
            chart,
            version,
            digest,
            namespace,
            values,
        } => {
            commands::install::run(&cli.cluster, &name, &chart, &version, &digest, &namespace, &values)
                .await?;
            Ok(exit_codes::SUCCESS)
        }

        Commands::Uninstall { name } => {
            commands::uninstall::run(&cli.cluster, &name).await?;
            Ok(exit_codes::SUCCESS)
        }

        Commands::Diff {
            name,
            values,
            exit_code,
        } => {
            let changed = commands::diff::run(&cli.cluster, &name, &values).await?;
            Ok(if changed && exit_code {
                exit_codes::DRIFT_DETECTED
            } else {
                exit_codes::SUCCESS
            })
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => report(err),
    };
    std::process::exit(code);
}

fn report(err: CliError) -> i32 {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    code
}
