//! watch-e2e - browser tests for the Sensor Watch simulator

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use watch_e2e::config::BrowserKind;
use watch_e2e::{HarnessConfig, PlaywrightConfig, PlaywrightLauncher, ScenarioFilter, ScenarioLoader, TestRunner};

/// Exit status for configuration, discovery, server, and browser launch errors
const SETUP_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "watch-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(short, long, default_value = "harness.toml", env = "WATCH_E2E_CONFIG", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against the configured site
    Run(RunArgs),

    /// List discovered scenario files and their scenarios
    List {
        /// Override the spec file pattern
        #[arg(long)]
        spec: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Override the base URL
    #[arg(long, env = "WATCH_E2E_BASE_URL")]
    base_url: Option<String>,

    /// Override the spec file pattern
    #[arg(long)]
    spec: Option<String>,

    /// Only run scenarios carrying this tag
    #[arg(long)]
    tag: Option<String>,

    /// Only run the scenario (or file) with this name
    #[arg(long)]
    name: Option<String>,

    /// Browser engine: chromium, firefox, or webkit
    #[arg(long)]
    browser: Option<BrowserKind>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Number of parallel workers
    #[arg(long)]
    workers: Option<usize>,

    /// Output directory for results and artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not capture screenshots of failed scenarios
    #[arg(long)]
    no_screenshots: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(SETUP_ERROR)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<u8> {
    let mut config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => {
            let filter = ScenarioFilter {
                tag: args.tag.clone(),
                name: args.name.clone(),
            };
            apply_overrides(&mut config, args);
            config.validate()?;

            let launcher = PlaywrightLauncher::new(PlaywrightConfig::from_harness(&config));
            let mut runner = TestRunner::new(config, Arc::new(launcher)).with_filter(filter);
            let reporter = runner.run().await?;

            reporter.print_summary();
            Ok(reporter.exit_code() as u8)
        }
        Commands::List { spec } => {
            if let Some(spec) = spec {
                config.spec_pattern = spec;
            }
            list(&config)?;
            Ok(0)
        }
    }
}

fn apply_overrides(config: &mut HarnessConfig, args: RunArgs) {
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(spec) = args.spec {
        config.spec_pattern = spec;
    }
    if let Some(browser) = args.browser {
        config.browser.kind = browser;
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if args.no_screenshots {
        config.screenshot_on_failure = false;
    }
}

fn list(config: &HarnessConfig) -> anyhow::Result<()> {
    let loader = ScenarioLoader::new(config)?;
    let mut total = 0;

    for (path, group) in loader.load()? {
        match group {
            Ok(group) => {
                println!("{} {}", group.name.bold(), format!("({})", path.display()).dimmed());
                for scenario in &group.scenarios {
                    total += 1;
                    let marker = if scenario.skip { "-".yellow() } else { "•".green() };
                    let tags = if scenario.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", scenario.tags.join(", "))
                    };
                    println!("  {} {}{} ({} commands)", marker, scenario.name, tags.cyan(), scenario.commands.len());
                }
            }
            Err(e) => println!("{} {}: {}", "✗".red(), path.display(), e),
        }
    }

    println!("\n{} scenario(s)", total);
    Ok(())
}
