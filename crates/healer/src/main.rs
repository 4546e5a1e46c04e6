//! Healer CLI
//!
//! ```bash
//! # Heal one event (file or stdin), outcome JSON on stdout
//! healer heal --event event.json
//! cat event.json | healer heal --event -
//!
//! # Stuck detection over exported task state
//! healer scan --tasks .openagents/tasks.jsonl --subtasks .openagents/subtasks
//!
//! # Dedup records
//! healer attempts
//! healer reset --task oa-123
//! ```

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use healer::stuck::{load_subtasks_dir, load_tasks_jsonl, load_trajectories_dir};
use healer::{
    DedupStore, Healer, HealerInvocation, OrchestratorEvent, OrchestratorState,
    StuckDetectionConfig, detect_stuck, load_healer_config, summarize_stuck_detection,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "healer")]
#[command(about = "Self-healing remediation for orchestrator failures")]
struct Cli {
    /// Project root (holds .openagents/)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Healer for one orchestrator event
    Heal {
        /// Invocation or bare event JSON, `-` for stdin
        #[arg(long)]
        event: String,

        /// Also print the Markdown summary to stderr
        #[arg(long)]
        summary: bool,

        /// Do not write a trajectory file
        #[arg(long)]
        no_trajectory: bool,
    },

    /// Detect stuck tasks and subtasks
    Scan {
        /// Task snapshots, one JSON object per line
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Directory of `{"taskId", "subtasks"}` files
        #[arg(long)]
        subtasks: Option<PathBuf>,

        /// Directory of trajectory files
        #[arg(long)]
        trajectories: Option<PathBuf>,

        /// Print the full result as JSON instead of the digest
        #[arg(long)]
        raw: bool,

        /// Run the Healer on every stuck subtask
        #[arg(long)]
        heal: bool,
    },

    /// List recorded healing attempts
    Attempts,

    /// Forget dedup records
    #[command(group(ArgGroup::new("target").required(true).args(["fingerprint", "task", "all"])))]
    Reset {
        /// One fingerprint key
        #[arg(long)]
        fingerprint: Option<String>,

        /// Every record for a task id
        #[arg(long)]
        task: Option<String>,

        /// Everything
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Heal {
            event,
            summary,
            no_trajectory,
        } => heal(&cli.root, &event, summary, no_trajectory).await,
        Command::Scan {
            tasks,
            subtasks,
            trajectories,
            raw,
            heal,
        } => {
            scan(
                &cli.root,
                tasks.as_deref(),
                subtasks.as_deref(),
                trajectories.as_deref(),
                raw,
                heal,
            )
            .await
        }
        Command::Attempts => attempts(&cli.root),
        Command::Reset {
            fingerprint,
            task,
            all,
        } => reset(&cli.root, fingerprint, task, all),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("healer=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("reading event from stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(source).with_context(|| format!("reading event from {}", source))
}

fn parse_invocation(input: &str) -> Result<HealerInvocation> {
    if let Ok(invocation) = serde_json::from_str::<HealerInvocation>(input) {
        return Ok(invocation);
    }
    let event: OrchestratorEvent =
        serde_json::from_str(input).context("input is neither an invocation nor an event")?;
    Ok(HealerInvocation::new(event))
}

async fn heal(root: &Path, source: &str, print_summary: bool, no_trajectory: bool) -> Result<()> {
    let invocation = parse_invocation(&read_input(source)?)?;
    let mut healer = Healer::for_project(root)?.with_trajectories(!no_trajectory);
    let outcome = healer.heal(invocation).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if print_summary {
        if let Some(run) = healer.last_run() {
            eprintln!("{}", run.summary);
        }
    }
    Ok(())
}

async fn scan(
    root: &Path,
    tasks: Option<&Path>,
    subtasks: Option<&Path>,
    trajectories: Option<&Path>,
    raw: bool,
    heal: bool,
) -> Result<()> {
    if tasks.is_none() && subtasks.is_none() {
        bail!("nothing to scan: pass --tasks and/or --subtasks");
    }

    let config = load_healer_config(root)?;
    let stuck_config = StuckDetectionConfig::from_healer_config(&config);

    let tasks = tasks.map(load_tasks_jsonl).transpose()?.unwrap_or_default();
    let subtasks = subtasks.map(load_subtasks_dir).transpose()?.unwrap_or_default();
    let trajectories = trajectories
        .map(load_trajectories_dir)
        .transpose()?
        .unwrap_or_default();

    let result = detect_stuck(&tasks, &subtasks, &trajectories, &stuck_config);
    if raw {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", summarize_stuck_detection(&result));
    }

    if heal {
        let mut healer = Healer::new(root, config);
        for stuck in &result.stuck_subtasks {
            let Some(entry) = subtasks
                .iter()
                .find(|s| s.task_id == stuck.task_id && s.subtask.id == stuck.subtask_id)
            else {
                continue;
            };
            let outcome = healer
                .heal_stuck(entry, OrchestratorState::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }
    Ok(())
}

fn attempts(root: &Path) -> Result<()> {
    let mut store = DedupStore::for_project(root);
    let attempts = store.attempts()?;
    println!("{}", serde_json::to_string_pretty(&attempts)?);
    Ok(())
}

fn reset(root: &Path, fingerprint: Option<String>, task: Option<String>, all: bool) -> Result<()> {
    let mut store = DedupStore::for_project(root);
    let removed = match (fingerprint, task) {
        (Some(key), _) => usize::from(store.reset(&key)?),
        (None, Some(task_id)) => store.reset_task(&task_id)?,
        (None, None) if all => store.clear()?,
        (None, None) => bail!("pass --fingerprint, --task or --all"),
    };
    println!("Removed {} record(s) from {}", removed, store.path().display());
    Ok(())
}
