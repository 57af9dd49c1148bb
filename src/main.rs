use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pageship::assistant::{render_analysis, Assistant};
use pageship::autofix::orchestrator::Operator;
use pageship::autofix::{
    AnalysisResult, BuildOrchestrator, BuildOutcome, Classifier, ErrorReport, FixApplicator,
    FixOutcome, SuggestedFix,
};
use pageship::config::Config;
use pageship::context::ProjectContext;
use pageship::logs::ErrorLogStore;
use pageship::runner::{PackageManagerInstaller, ShellRunner};
use pageship::util::{kill_active_command, truncate};
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pageship",
    about = "Build and publish frontend projects to GitHub Pages",
    version
)]
struct Args {
    /// Show debug logs (PAGESHIP_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build the project, fixing known failures automatically
    Build {
        /// Path to the project (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Apply fixes without asking
        #[arg(short, long)]
        yes: bool,

        /// Report problems but never change anything
        #[arg(long)]
        no_fix: bool,

        /// Build command to run instead of the detected one
        #[arg(long)]
        command: Option<String>,
    },
    /// Classify a build error log
    Analyze {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Log file to read, or `-` for stdin (defaults to the last saved build error)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the assistant a question about the project
    Ask {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Show or change settings
    Config {
        /// Turn automatic fixes on or off
        #[arg(long)]
        auto_fix: Option<bool>,

        /// Apply fixes without asking by default
        #[arg(long)]
        assume_yes: Option<bool>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pageship=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("PAGESHIP_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = ctrlc::set_handler(|| {
        kill_active_command();
        std::process::exit(130);
    }) {
        tracing::warn!(error = %err, "could not install Ctrl-C handler");
    }

    match run(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("  Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Cmd) -> Result<bool> {
    let mut config = Config::load();
    match command {
        Cmd::Build {
            path,
            yes,
            no_fix,
            command,
        } => {
            let ctx = ProjectContext::load(&path, &config)?.with_build_command(command);
            build(&ctx, &config, yes || config.assume_yes, !no_fix && config.auto_fix)
        }
        Cmd::Analyze { path, log, json } => {
            let ctx = ProjectContext::load(&path, &config)?;
            analyze(&ctx, log, json)
        }
        Cmd::Ask { path, question } => {
            let ctx = ProjectContext::load(&path, &config)?;
            let latest = ErrorLogStore::for_project(&ctx.root).latest()?;
            let answer = Assistant::new(&ctx, latest).answer(&question.join(" "));
            println!();
            println!("{}", answer.text);
            println!();
            Ok(true)
        }
        Cmd::Config {
            auto_fix,
            assume_yes,
        } => {
            if auto_fix.is_some() || assume_yes.is_some() {
                if let Some(value) = auto_fix {
                    config.auto_fix = value;
                }
                if let Some(value) = assume_yes {
                    config.assume_yes = value;
                }
                config.save().map_err(anyhow::Error::msg)?;
                println!("  + Saved {}", Config::config_location());
            }
            println!("  Config: {}", Config::config_location());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(true)
        }
    }
}

fn build(ctx: &ProjectContext, config: &Config, assume_yes: bool, auto_fix: bool) -> Result<bool> {
    println!();
    println!(
        "  {} project ({}) at {}",
        ctx.framework.name(),
        ctx.package_manager.name(),
        ctx.root.display()
    );

    let runner = ShellRunner::new(
        Duration::from_secs(config.build_timeout_secs),
        config.max_output_bytes,
    );
    let installer = PackageManagerInstaller::new(runner.clone(), ctx.package_manager, &ctx.root);
    let mut fixer = FixApplicator::new(installer, ctx.manifest_file());
    let mut build_runner = runner;
    let mut log = ErrorLogStore::for_project(&ctx.root);
    let mut operator = ConsoleOperator::new(ctx, assume_yes);

    let outcome = BuildOrchestrator::new(&mut build_runner, &mut fixer, &mut log, &mut operator)
        .auto_fix(auto_fix)
        .run(ctx);

    match &outcome {
        BuildOutcome::Skipped => {
            println!("  · No build step; publishing files as they are");
        }
        BuildOutcome::Succeeded {
            attempts,
            fixes_applied,
            ..
        } => {
            if *fixes_applied > 0 {
                println!(
                    "  + Build succeeded on attempt {} after {} fix(es)",
                    attempts, fixes_applied
                );
            } else {
                println!("  + Build succeeded");
            }
            println!("  Output: {}", ctx.output_path().display());
        }
        BuildOutcome::Failed {
            reason, error_text, ..
        } => {
            println!();
            println!("  ● {}", capitalize(&reason.to_string()));
            println!();
            println!("  Last error output:");
            for line in error_text.lines().rev().take(20).collect::<Vec<_>>().into_iter().rev() {
                println!("    {}", truncate(line, 200));
            }
            println!();
            println!("  Full log: {}", log.dir().join("latest.log").display());
        }
    }
    println!();

    Ok(outcome.is_success())
}

fn analyze(ctx: &ProjectContext, log: Option<PathBuf>, json: bool) -> Result<bool> {
    let text = match log {
        Some(path) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => match ErrorLogStore::for_project(&ctx.root).latest()? {
            Some(text) => text,
            None => bail!("No saved build error; pass --log FILE or run `pageship build` first"),
        },
    };

    let analysis = Classifier::new(ctx.manifest.as_ref())
        .with_memory_limit(ctx.memory_limit_or_default())
        .analyze(&ErrorReport::new(text));

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else if analysis.is_empty() {
        println!("  · No known problems found in the log");
    } else {
        println!();
        print!("{}", render_analysis(&analysis, ctx));
        println!();
    }
    Ok(true)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Talks to the user on the terminal.
struct ConsoleOperator<'a> {
    ctx: &'a ProjectContext,
    assume_yes: bool,
}

impl<'a> ConsoleOperator<'a> {
    fn new(ctx: &'a ProjectContext, assume_yes: bool) -> Self {
        Self { ctx, assume_yes }
    }
}

impl Operator for ConsoleOperator<'_> {
    fn show_analysis(&mut self, analysis: &AnalysisResult) {
        if analysis.is_empty() {
            return;
        }
        println!();
        println!("  Build failed. Detected issues:");
        print!("{}", render_analysis(analysis, self.ctx));
        println!();
    }

    fn confirm(&mut self, question: &str) -> bool {
        if self.assume_yes {
            println!("  {} yes (--yes)", question);
            return true;
        }
        print!("  {} [y/N] ", question);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        }
    }

    fn attempt_started(&mut self, attempt: u8, command: &str) {
        if attempt > 1 {
            println!("  Retrying: {}", command);
        } else {
            println!("  Building: {}", command);
        }
    }

    fn fix_finished(&mut self, fix: &SuggestedFix, outcome: &FixOutcome) {
        match outcome {
            FixOutcome::Applied => println!("  + {}", fix.description),
            FixOutcome::Failed(err) => println!("  ● {} failed: {}", fix.description, truncate(err, 300)),
            FixOutcome::NotApplicable => {}
        }
    }
}
