//! Kintsugi - self-healing AI test generation
//!
//! Generates tests with a chat-completion model and repairs them until they
//! pass.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kintsugi::config::ProjectConfig;
use kintsugi::error::{IntoKintsugiError, KintsugiError, Result};
use kintsugi::failure::parse_failing_tests;
use kintsugi::heal::{BatchReport, Collaborators, HealOutcome, HealingEngine};
use kintsugi::llm::{create_client, ProviderFatalClassifier};
use kintsugi::project::{collect_targets, FileStore, ProjectFileStore};
use kintsugi::runner::{ProcessTestRunner, RunOptions, TestRunner};
use kintsugi::HealingPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kintsugi")]
#[command(version)]
#[command(about = "Generate tests with an AI model and heal them until they pass", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Write generated tests without running them
    #[arg(long, global = true)]
    no_heal: bool,

    /// Override healing.maxRetries
    #[arg(long, global = true, value_name = "N")]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (and heal) tests for source files
    Generate {
        /// Source files, relative to the project directory
        #[arg(required_unless_present = "all")]
        files: Vec<PathBuf>,

        /// Every source matching the configured include/exclude globs
        #[arg(long, conflicts_with = "files")]
        all: bool,
    },

    /// Run a test file once and show its failing tests
    Verify {
        /// Test file, relative to the project directory
        test_file: PathBuf,
    },

    /// Inspect the project configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Check the configuration for errors
    Validate,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "kintsugi=debug,info"
    } else {
        "kintsugi=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let code = match run(cli, &project_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, project: &Path) -> Result<i32> {
    let mut config = ProjectConfig::load(project)?;
    if cli.no_heal {
        config.healing = HealingPolicy::disabled();
    }
    if let Some(max_retries) = cli.max_retries {
        config.healing = config.healing.with_max_retries(max_retries);
    }

    match cli.command {
        Commands::Generate { files, all } => generate(config, project, files, all).await,
        Commands::Verify { test_file } => verify(&config, project, &test_file).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(0)
            }
            ConfigAction::Validate => {
                config.validate()?;
                println!(
                    "{} {}",
                    "✓".green().bold(),
                    ProjectConfig::settings_path(project).display()
                );
                Ok(0)
            }
        },
    }
}

/// Paths on the command line may be absolute or relative to the project.
fn project_relative(project: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(project).unwrap_or(path).to_path_buf()
}

async fn generate(
    config: ProjectConfig,
    project: &Path,
    files: Vec<PathBuf>,
    all: bool,
) -> Result<i32> {
    config.validate()?;

    let sources = if all {
        collect_targets(project, &config.include, &config.exclude).into_kintsugi_config()?
    } else {
        files.iter().map(|f| project_relative(project, f)).collect()
    };
    if sources.is_empty() {
        return Err(KintsugiError::config("No source files matched"));
    }

    let framework = config.testing.framework.clone();
    let collaborators = Collaborators {
        client: Arc::from(create_client(&config.llm)?),
        files: Arc::new(ProjectFileStore::new(project)),
        runner: Arc::new(ProcessTestRunner::new(ProjectConfig::reports_dir(project))),
        classifier: Arc::new(ProviderFatalClassifier::new()),
    };
    let engine = HealingEngine::new(config, collaborators).with_project_dir(project);

    let progress = ProgressBar::new(sources.len() as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(style.progress_chars("=>-"));
    }

    let report = engine
        .write_test_files_with_progress(&sources, framework.as_ref(), |source, result| {
            let line = match result {
                Ok(HealOutcome::Verified { attempts }) => format!(
                    "{} {} (passed after {} attempt(s))",
                    "✓".green().bold(),
                    source.display(),
                    attempts
                ),
                Ok(HealOutcome::Unverified) => {
                    format!("{} {} (written, not run)", "✓".green(), source.display())
                }
                Ok(HealOutcome::Skipped) => {
                    format!("{} {} (skipped by model)", "-".dimmed(), source.display())
                }
                Ok(HealOutcome::AlreadyPassing) => format!(
                    "{} {} (existing test passes)",
                    "✓".green(),
                    source.display()
                ),
                Err(e) => format!("{} {}: {}", "✗".red().bold(), source.display(), e),
            };
            progress.println(line);
            progress.inc(1);
        })
        .await;
    progress.finish_and_clear();

    let report = report?;
    print_summary(&report);
    Ok(if report.is_success() { 0 } else { 1 })
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("{}", "Summary".bold());
    println!("  Generated:        {}", report.generated.len());
    println!("  Skipped:          {}", report.skipped.len());
    println!("  Already passing:  {}", report.passed_existing.len());
    if report.failures.is_empty() {
        println!("  Failed:           0");
    } else {
        println!(
            "  Failed:           {}",
            report.failures.len().to_string().red().bold()
        );
    }
}

async fn verify(config: &ProjectConfig, project: &Path, test_file: &Path) -> Result<i32> {
    let test_path = project_relative(project, test_file);
    let store = ProjectFileStore::new(project);
    let source = store.read_file(&test_path).await?;

    let runner = ProcessTestRunner::new(ProjectConfig::reports_dir(project));
    let options = RunOptions {
        cwd: project.to_path_buf(),
        test_file_path: test_path.clone(),
        timeout_ms: config.testing.timeout_ms,
        framework: config.testing.framework.clone(),
    };
    let result = runner.run_test(&config.testing.command, &options).await?;

    if result.passed_for(&test_path) {
        println!(
            "{} {} passed ({}ms)",
            "✓".green().bold(),
            test_path.display(),
            result.duration_ms
        );
        return Ok(0);
    }

    let details = parse_failing_tests(&result, &test_path, &source);
    println!(
        "{} {} failed: {} failing test(s)",
        "✗".red().bold(),
        test_path.display(),
        details.len()
    );
    for detail in &details {
        println!();
        println!("{}", detail.full_name.bold());
        println!("{}", detail.error_message);
        if let Some(stack) = &detail.stack_excerpt {
            println!("{}", stack.dimmed());
        }
    }
    Ok(3)
}
