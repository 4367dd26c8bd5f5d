//! infralab CLI
//!
//! Main entry point for the guided infrastructure lab.

mod prompt;

use std::io::{stdin, stdout, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::Confirm;
use infralab_orchestrator::{
    Catalog, Config, LabError, Persisted, ProgressFile, ProgressStatus, ProgressStore,
    SessionContext, EXIT_FATAL,
};
use infralab_report::{
    export, ExerciseInput, ExerciseStatus, MarkdownGenerator, ProgressInput, Report, ReportFormat,
};
use infralab_runner::ExternalTool;
use tracing_subscriber::EnvFilter;

use crate::prompt::{status_marker, TerminalPrompter};

/// infralab - guided labs for infrastructure-as-code
///
/// Walks through a catalog of exercises, runs the provisioning tool in each
/// exercise directory, checks the result, and keeps track of your progress.
#[derive(Parser, Debug)]
#[command(name = "infralab")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: infralab.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a lab session
    Run(RunArgs),

    /// List exercises with their status
    List,

    /// Write a progress report to a file
    Export {
        /// Output file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Markdown)]
        format: FormatArg,
    },
}

#[derive(clap::Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
struct RunArgs {
    /// Go straight to one exercise and exit when leaving it
    #[arg(long, value_name = "ID", conflicts_with_all = ["show_stats", "reset_progress", "resume"])]
    exercise: Option<String>,

    /// Print a progress summary and exit
    #[arg(long, conflicts_with_all = ["reset_progress", "resume"])]
    show_stats: bool,

    /// Clear all progress after confirmation
    #[arg(long, conflicts_with = "resume")]
    reset_progress: bool,

    /// Skip the reset confirmation
    #[arg(long, requires = "reset_progress")]
    yes: bool,

    /// Re-enter the exercise you were last working on
    #[arg(long)]
    resume: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Markdown,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Markdown => Self::Markdown,
            FormatArg::Json => Self::Json,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (warn).
    // Logs go to stderr so they stay out of the menus.
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", style("Error:").red().bold());
            let code = e
                .downcast_ref::<LabError>()
                .map_or(EXIT_FATAL, LabError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    tracing::debug!(?config, "Configuration loaded");

    let catalog = load_catalog(&config)?;

    let mut progress_file = ProgressFile::new(config.progress_path());
    let loaded = progress_file.load();
    if let Some(warning) = &loaded.warning {
        eprintln!("{} {warning}", style("warning:").yellow().bold());
    }

    match args.command {
        Command::List => {
            print_list(&catalog, &loaded.store);
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { output, format } => {
            let report = build_report(&catalog, &loaded.store);
            export(&report, &output, format.into())?;
            println!("Report written to {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run_args) => run_lab(&run_args, &config, &catalog, progress_file, loaded.store),
    }
}

fn run_lab(
    args: &RunArgs,
    config: &Config,
    catalog: &Catalog,
    progress_file: ProgressFile,
    store: ProgressStore,
) -> anyhow::Result<ExitCode> {
    let interactive = stdin().is_terminal() && stdout().is_terminal();

    if args.show_stats {
        print!("{}", MarkdownGenerator::new(&build_report(catalog, &store)).generate());
        return Ok(ExitCode::SUCCESS);
    }

    if args.reset_progress {
        reset_progress(&progress_file, args.yes, interactive)?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(id) = &args.exercise {
        catalog.get(id)?;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let tool = ExternalTool::new(&config.tool_path)
        .with_timeout(config.command_timeout())
        .with_cancel_flag(Arc::clone(&cancel));
    let version = tool.probe().map_err(LabError::from)?;
    println!("{}", style(format!("Using {version}")).dim());

    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %e, "Could not install Ctrl+C handler");
    }

    let mut prompter = TerminalPrompter::new(interactive);
    let mut session = SessionContext::new(
        catalog,
        store,
        progress_file,
        tool,
        config.workspace_path(),
    );
    session.ensure_user_name(&mut prompter)?;

    if let Some(id) = &args.exercise {
        session.run_exercise(id, &mut prompter)?;
    } else if args.resume {
        session.resume(&mut prompter)?;
    } else {
        session.run_menu(&mut prompter)?;
    }

    let report = build_report(catalog, session.progress());
    println!(
        "\n{} {}/{} exercises, score {}, badge {}",
        style("Progress:").bold(),
        report.completed,
        report.total,
        report.score,
        report.tier
    );
    Ok(ExitCode::SUCCESS)
}

/// Loads configuration, then applies environment overrides.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };

    // Re-validate after overrides
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &Config) -> anyhow::Result<Catalog> {
    let catalog = match &config.catalog {
        Some(path) => Catalog::load(Path::new(path))?,
        None => Catalog::builtin()?,
    };
    Ok(catalog)
}

fn reset_progress(progress_file: &ProgressFile, yes: bool, interactive: bool) -> anyhow::Result<()> {
    if !yes {
        if !interactive {
            anyhow::bail!(
                "Refusing to reset progress without confirmation\n\nSuggestion: Pass --yes to reset from a script"
            );
        }
        let confirmed = Confirm::new()
            .with_prompt("Erase all progress? This cannot be undone")
            .default(false)
            .interact()
            .map_err(LabError::interaction)?;
        if !confirmed {
            println!("Progress left unchanged.");
            return Ok(());
        }
    }

    match progress_file.save(&ProgressStore::default())? {
        Persisted::Written => {
            tracing::info!(path = %progress_file.path().display(), "Progress reset");
            println!("Progress reset.");
        }
        Persisted::MemoryOnly => {
            anyhow::bail!(
                "Progress file '{}' could not be read, so it was not reset\n\nSuggestion: Check its permissions or remove it by hand",
                progress_file.path().display()
            );
        }
    }
    Ok(())
}

fn print_list(catalog: &Catalog, store: &ProgressStore) {
    for (category, exercises) in catalog.by_category() {
        println!("{}", style(category).bold());
        for exercise in exercises {
            let locked = !catalog.is_unlocked(exercise, store);
            println!(
                "  {} {:<22} {} ({})",
                status_marker(store.status(&exercise.id), locked),
                exercise.id,
                exercise.name,
                exercise.difficulty
            );
        }
    }
}

fn build_report(catalog: &Catalog, store: &ProgressStore) -> Report {
    Report::new(&create_progress_input(catalog, store))
}

fn create_progress_input(catalog: &Catalog, store: &ProgressStore) -> ProgressInput {
    ProgressInput {
        user_name: store.user_name.clone(),
        exercises: catalog
            .list()
            .iter()
            .map(|exercise| {
                let record = store.record(&exercise.id);
                ExerciseInput {
                    id: exercise.id.clone(),
                    name: exercise.name.clone(),
                    category: exercise.category.clone(),
                    status: convert_status(record.status),
                    completed_at: record.completed_at,
                }
            })
            .collect(),
    }
}

const fn convert_status(status: ProgressStatus) -> ExerciseStatus {
    match status {
        ProgressStatus::NotStarted => ExerciseStatus::NotStarted,
        ProgressStatus::InProgress => ExerciseStatus::InProgress,
        ProgressStatus::Completed => ExerciseStatus::Completed,
    }
}
