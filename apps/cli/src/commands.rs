//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use prerender_browser::ChromiumLauncher;
use prerender_core::{ProgressReporter, resolve_routes, run_prerender, write_report};
use prerender_server::{ServerHandle, StaticServerOptions};
use prerender_shared::{
    AppConfig, CONFIG_FILE_NAME, PrerenderConfig, PrerenderReport, Route, RouteOutcome,
    RouteReport, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// prerender — write static HTML snapshots of a single-page app.
#[derive(Parser)]
#[command(
    name = "prerender",
    version,
    about = "Render every route of a built single-page app to static HTML.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./prerender.toml).
    #[arg(long, global = true, env = "PRERENDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Prerender every registered route into the build directory.
    ///
    /// The untouched template is kept at `<dist>/.prerender-template.html` so
    /// later runs can start from it; that file is deployed with the build
    /// unless `--template-stash` (or `build.template_stash`) moves it elsewhere.
    Run(RunArgs),

    /// Print the route registry.
    Routes {
        /// Router source to derive routes from.
        #[arg(long)]
        router_source: Option<PathBuf>,

        /// Fail when the router declares routes the configured list lacks.
        #[arg(long)]
        check: bool,
    },

    /// Serve the build directory until Ctrl-C.
    Serve {
        /// Build directory to serve.
        #[arg(long)]
        dist: Option<PathBuf>,

        /// Preferred port; the next free one is used when it is taken.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `prerender run`.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Build directory (input and output).
    #[arg(long)]
    pub dist: Option<PathBuf>,

    /// Extra route to prerender (repeatable).
    #[arg(long = "route")]
    pub routes: Vec<String>,

    /// Router source to derive routes from.
    #[arg(long)]
    pub router_source: Option<PathBuf>,

    /// Where to keep the pristine template between runs.
    #[arg(long)]
    pub template_stash: Option<PathBuf>,

    /// Preferred port for the local server.
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of pages rendering in parallel.
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Write a JSON report of the batch to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Exit non-zero when any route failed.
    #[arg(long)]
    pub fail_on_error: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "prerender=info",
        1 => "prerender=debug",
        _ => "prerender=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run(args) => cmd_run(config_path, args).await,
        Command::Routes {
            router_source,
            check,
        } => cmd_routes(config_path, router_source, check),
        Command::Serve { dist, port } => cmd_serve(config_path, dist, port).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config file and apply `run` flags on top.
fn runtime_config(config_path: Option<&Path>, args: &RunArgs) -> Result<PrerenderConfig> {
    let app = load_config(config_path)?;
    let mut config = PrerenderConfig::from(&app);

    if let Some(dist) = &args.dist {
        config.dist_dir = dist.clone();
    }
    config.routes.extend(args.routes.iter().cloned());
    if let Some(source) = &args.router_source {
        config.router_source = Some(source.clone());
    }
    if let Some(stash) = &args.template_stash {
        config.template_stash = Some(stash.clone());
    }
    if let Some(port) = args.port {
        config.preferred_port = port;
    }
    if let Some(concurrency) = args.concurrency {
        config.browser.concurrency = concurrency;
    }

    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = runtime_config(config_path, &args)?;

    info!(
        dist = %config.dist_dir.display(),
        routes = config.routes.len(),
        "prerendering build"
    );

    let reporter = CliProgress::new();
    let report = run_prerender(&config, &ChromiumLauncher, &reporter).await?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    print_summary(&report);

    let failed = report.failed().count();
    if args.fail_on_error && failed > 0 {
        return Err(eyre!("{failed} route(s) failed to prerender"));
    }
    Ok(())
}

fn print_summary(report: &PrerenderReport) {
    println!();
    println!("  Prerender finished");
    println!("  Rendered: {}", report.succeeded().count());
    println!("  Failed:   {}", report.failed().count());
    println!("  Port:     {}", report.port);
    println!("  Time:     {:.1}s", report.elapsed_ms as f64 / 1000.0);

    for route in report.failed() {
        if let RouteOutcome::Failed { error, .. } = &route.outcome {
            println!("    ✗ {}  {error}", route.route);
        }
    }
    println!();
}

fn cmd_routes(
    config_path: Option<&Path>,
    router_source: Option<PathBuf>,
    check: bool,
) -> Result<()> {
    let args = RunArgs {
        router_source,
        ..RunArgs::default()
    };
    let config = runtime_config(config_path, &args)?;
    let resolved = resolve_routes(&config)?;

    for route in &resolved.merged() {
        let origin = if resolved.configured.routes().contains(route) {
            "config"
        } else {
            "router"
        };
        println!("{route}\t{origin}");
    }

    if let Some(router) = &resolved.router {
        for skipped in &router.skipped {
            println!("# skipped {} (line {}): {}", skipped.raw, skipped.line, skipped.reason);
        }
    }

    if check {
        if resolved.router.is_none() {
            return Err(eyre!(
                "--check needs a router source (--router-source or build.router_source)"
            ));
        }
        let missing = resolved.missing();
        if !missing.is_empty() {
            let list = missing
                .iter()
                .map(Route::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(eyre!(
                "{} router route(s) missing from the registry: {list}",
                missing.len()
            ));
        }
        println!("registry covers every router route");
    }
    Ok(())
}

async fn cmd_serve(
    config_path: Option<&Path>,
    dist: Option<PathBuf>,
    port: Option<u16>,
) -> Result<()> {
    let args = RunArgs {
        dist,
        port,
        ..RunArgs::default()
    };
    let config = runtime_config(config_path, &args)?;

    let mut options = StaticServerOptions::new(&config.dist_dir);
    options.index_file = config.index_file.clone();
    options.preferred_port = config.preferred_port;
    options.max_port_attempts = config.max_port_attempts;
    let server = ServerHandle::start(options).await?;

    println!(
        "Serving {} at {} (Ctrl-C to stop)",
        config.dist_dir.display(),
        server.base_url()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl-C: {e}"))?;
    server.shutdown().await;
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = init_config(config_path.unwrap_or(Path::new(CONFIG_FILE_NAME)))?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn route_started(&self, route: &Route, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Rendering [{current}/{total}] {route}"));
    }

    fn route_finished(&self, report: &RouteReport) {
        let mark = if report.is_success() { "✓" } else { "✗" };
        self.spinner
            .println(format!("  {mark} {} ({}ms)", report.route, report.elapsed_ms));
    }

    fn done(&self, _report: &PrerenderReport) {
        self.spinner.finish_and_clear();
    }
}
