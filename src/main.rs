//! jobsync - reconciles training-job Frameworks between the job database and the cluster

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use jobsync_common::kube_utils::create_client;
use jobsync_common::telemetry::{init_telemetry, TelemetryConfig};
use jobsync_common::{DEFAULT_NAMESPACE, FRAMEWORK_API_VERSION, FRAMEWORK_PLURAL};
use jobsync_framework::{
    translate_raw, AddOnUpdate, AddOns, ClusterConfig, HashedNameEncoder, KubeClusterClient,
    NameEncoder, PlainNameEncoder, Reconciler, Snapshot,
};

/// jobsync - push Framework requests to the cluster and project them into job records
#[derive(Parser, Debug)]
#[command(name = "jobsync", version, about, long_about = None)]
struct Cli {
    /// Namespace Frameworks and their secrets live in
    #[arg(long, global = true, env = "JOBSYNC_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Framework API group/version
    #[arg(long, global = true, env = "JOBSYNC_FRAMEWORK_API_VERSION", default_value = FRAMEWORK_API_VERSION)]
    api_version: String,

    /// Framework plural resource name
    #[arg(long, global = true, env = "JOBSYNC_FRAMEWORK_PLURAL", default_value = FRAMEWORK_PLURAL)]
    plural: String,

    /// Path to kubeconfig (in-cluster or ambient config when unset)
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "JOBSYNC_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upsert a Framework from a snapshot file and print its database record
    Sync {
        /// Framework document (JSON)
        #[arg(short = 'f', long)]
        snapshot: PathBuf,

        /// Serialized add-on descriptors (JSON record of *Def fields)
        #[arg(long)]
        addons: Option<PathBuf>,

        /// Include the full serialized snapshot in the printed record
        #[arg(long)]
        with_snapshot: bool,
    },

    /// Delete a Framework, waiting briefly for the request to go out
    Delete {
        /// Framework object name
        name: String,

        /// Seconds to wait before exiting
        #[arg(long, default_value = "2")]
        wait_secs: u64,
    },

    /// Print a database record for a snapshot file (no cluster access)
    Record {
        /// Framework document (JSON)
        #[arg(short = 'f', long)]
        snapshot: PathBuf,

        /// Which record to produce
        #[arg(long, value_enum, default_value_t = RecordKind::All)]
        kind: RecordKind,

        /// Include the full serialized snapshot
        #[arg(long)]
        with_snapshot: bool,
    },

    /// Translate a controller state into a job state
    Translate {
        /// Raw controller state, e.g. AttemptRunning
        state: String,

        /// Exit code of the current attempt
        #[arg(long, allow_hyphen_values = true)]
        exit_code: Option<i32>,

        /// Pending retry delay in seconds
        #[arg(long)]
        retry_delay: Option<i64>,
    },

    /// Encode a platform job name into a Framework object name
    Encode {
        /// Platform job name, e.g. alice~mnist
        name: String,

        /// Encoding scheme
        #[arg(long, value_enum, default_value_t = Scheme::Hashed)]
        scheme: Scheme,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RecordKind {
    Request,
    Status,
    All,
    Legacy,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scheme {
    Plain,
    Hashed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.json_logs,
    })?;

    let cluster_config = ClusterConfig {
        namespace: cli.namespace.clone(),
        api_version: cli.api_version.clone(),
        plural: cli.plural.clone(),
    };

    match cli.command {
        Commands::Sync {
            snapshot,
            addons,
            with_snapshot,
        } => {
            let reconciler = connect(cli.kubeconfig.as_deref(), &cluster_config).await?;
            run_sync(reconciler, &snapshot, addons.as_deref(), with_snapshot).await
        }
        Commands::Delete { name, wait_secs } => {
            let reconciler = connect(cli.kubeconfig.as_deref(), &cluster_config).await?;
            reconciler.silent_delete_framework(name);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
            Ok(())
        }
        Commands::Record {
            snapshot,
            kind,
            with_snapshot,
        } => {
            let mut snapshot = read_snapshot(&snapshot).await?;
            match kind {
                RecordKind::Request => print_json(&snapshot.get_request_update(with_snapshot)?),
                RecordKind::Status => print_json(&snapshot.get_status_update(with_snapshot)?),
                RecordKind::All => print_json(&snapshot.get_all_update(with_snapshot)?),
                RecordKind::Legacy => print_json(&snapshot.get_record_for_legacy_transfer()?),
            }
        }
        Commands::Translate {
            state,
            exit_code,
            retry_delay,
        } => {
            println!("{}", translate_raw(&state, exit_code, retry_delay));
            Ok(())
        }
        Commands::Encode { name, scheme } => {
            let encoder: &dyn NameEncoder = match scheme {
                Scheme::Plain => &PlainNameEncoder,
                Scheme::Hashed => &HashedNameEncoder,
            };
            println!("{}", encoder.encode(&name));
            Ok(())
        }
    }
}

async fn connect(kubeconfig: Option<&Path>, config: &ClusterConfig) -> anyhow::Result<Reconciler> {
    let client = create_client(kubeconfig).await?;
    info!(namespace = %config.namespace, api_version = %config.api_version, "connected to cluster");
    let cluster = KubeClusterClient::new(client, config);
    Ok(Reconciler::new(Arc::new(cluster)))
}

async fn run_sync(
    reconciler: Reconciler,
    snapshot_path: &Path,
    addons_path: Option<&Path>,
    with_snapshot: bool,
) -> anyhow::Result<()> {
    let snapshot = read_snapshot(snapshot_path).await?;
    let add_ons = match addons_path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read add-ons {:?}: {}", path, e))?;
            let update: AddOnUpdate = serde_json::from_str(&raw)?;
            AddOns::from_update(&update)?
        }
        None => AddOns::default(),
    };

    let live = reconciler.synchronize_request(&snapshot, &add_ons).await?;
    let mut live = Snapshot::new(live)?;
    info!(framework = %live.get_name(), state = %live.job_state(), "framework synchronized");
    print_json(&live.get_all_update(with_snapshot)?)
}

async fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read snapshot {:?}: {}", path, e))?;
    Ok(raw.parse::<Snapshot>()?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
