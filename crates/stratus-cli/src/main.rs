use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stratus_cli::{commands, config};
use stratus_engine::{HandlerRegistry, PlanOptions, Reconciler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stratus", version, about = "Reconcile cloud resources against declared config")]
struct Cli {
    /// Config file (default: <config dir>/stratus/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Give up on the whole operation after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what apply would do
    Plan {
        /// Resource type, e.g. s3_bucket
        #[arg(long = "type")]
        resource_type: String,

        /// Desired config JSON. Omit to plan a delete.
        #[arg(long)]
        desired: Option<PathBuf>,

        /// Recorded state. A missing file means nothing is tracked yet.
        #[arg(long)]
        state: Option<PathBuf>,

        /// Save the plan for `apply --plan`
        #[arg(long)]
        out: Option<PathBuf>,

        /// Plan from recorded state only, without reading the live object
        #[arg(long)]
        no_refresh: bool,
    },
    /// Make the live object match the desired config and record new state
    Apply {
        #[arg(long = "type")]
        resource_type: String,

        /// Desired config JSON. Omit to delete.
        #[arg(long)]
        desired: Option<PathBuf>,

        /// Recorded state; read as prior state and overwritten with the result
        #[arg(long)]
        state: PathBuf,

        /// Carry out a plan saved by `plan --out` instead of planning again
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// List registered resource types
    Types,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = config::load_config(cli.config.as_deref())?;
    let sdk_config = stratus_aws::build_aws_config(&config.region, &config.credentials).await;

    let mut registry = HandlerRegistry::new();
    stratus_aws::register_all(&mut registry, &sdk_config)?;
    let reconciler = Reconciler::new(registry);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let mut ctx = config.context().with_cancellation(cancel);
    if let Some(secs) = cli.timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }

    match cli.command {
        Command::Plan {
            resource_type,
            desired,
            state,
            out,
            no_refresh,
        } => {
            let options = PlanOptions {
                refresh: !no_refresh,
            };
            let saved = commands::plan(
                &reconciler,
                &ctx,
                &resource_type,
                desired.as_deref(),
                state.as_deref(),
                options,
            )
            .await?;
            print!("{}", commands::render_plan(&resource_type, &saved.plan));
            if let Some(out) = out {
                commands::save_plan(&out, &saved)?;
            }
        }
        Command::Apply {
            resource_type,
            desired,
            state,
            plan,
        } => {
            let outcome = commands::apply(
                &reconciler,
                &ctx,
                &resource_type,
                desired.as_deref(),
                &state,
                plan.as_deref(),
            )
            .await?;
            println!("{resource_type}: {}", outcome.action);
            for attr in &outcome.changed_attributes {
                println!("  {attr}");
            }
        }
        Command::Types => {
            for resource_type in reconciler.registry().resource_types() {
                println!("{resource_type}");
            }
        }
    }

    Ok(())
}
