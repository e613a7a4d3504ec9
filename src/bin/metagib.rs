use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use metagib::app::{App, RunOptions, RunSummary};
use metagib::config::{ConfigLoader, RunOverrides};
use metagib::error::GibError;
use metagib::http::RetryingFetcher;
use metagib::image::HttpImageClient;
use metagib::offchain::HttpOffChainClient;
use metagib::onchain::RpcChainClient;
use metagib::output::{ConsoleOutput, JsonOutput, OutputMode};
use metagib::queue::PendingSet;
use metagib::store::{RunLayout, Zone};

#[derive(Parser)]
#[command(name = "metagib")]
#[command(about = "Grab token metadata (and images) for every mint in a list")]
#[command(version, author)]
struct Cli {
    /// Print the run summary as JSON instead of progress lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch metadata for every mint in a list")]
    Gibme(GibmeArgs),
}

#[derive(Args, Clone)]
struct GibmeArgs {
    /// File with one mint address per line.
    #[arg(long)]
    list: Option<Utf8PathBuf>,

    /// JSON-RPC endpoint used to read metadata accounts.
    #[arg(long)]
    rpc: Option<String>,

    /// Also download each token's image.
    #[arg(long)]
    images: bool,

    /// Give up on a mint after this many failed attempts.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Directory that receives the run folder and datasets.
    #[arg(long, default_value = ".")]
    output_dir: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("Action failed, err: {report}");
        tracing::debug!("{report:?}");
        if let Some(gib) = report.downcast_ref::<GibError>() {
            return ExitCode::from(map_exit_code(gib));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GibError) -> u8 {
    match error {
        GibError::ConfigRead(_)
        | GibError::ConfigParse(_)
        | GibError::InvalidConfig(_)
        | GibError::ListRead { .. } => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let Some(Commands::Gibme(args)) = cli.command else {
        return Ok(());
    };
    let (Some(list), Some(rpc)) = (&args.list, &args.rpc) else {
        tracing::debug!("gibme needs both --list and --rpc; nothing to do");
        return Ok(());
    };

    run_gibme(&args, list, rpc, output_mode)?;
    if matches!(output_mode, OutputMode::Console) {
        println!("Complete");
    }
    Ok(())
}

fn run_gibme(
    args: &GibmeArgs,
    list: &Utf8Path,
    rpc: &str,
    output_mode: OutputMode,
) -> miette::Result<RunSummary> {
    let settings = ConfigLoader::resolve(args.config.as_deref())?.apply(&RunOverrides {
        max_attempts: args.max_attempts,
        pause_after_success_ms: None,
    });
    settings.validate()?;

    let mut pending = PendingSet::load(list)?;
    let layout = RunLayout::new(list, args.output_dir.clone(), &settings);
    let zone = Zone::resolve(&settings.timezone);

    let fetcher = RetryingFetcher::new(settings.retry.clone())?;
    let chain = RpcChainClient::new(rpc, settings.rpc_timeout())?;
    let app = App::new(
        layout,
        zone,
        chain,
        HttpOffChainClient::new(fetcher.clone()),
        HttpImageClient::new(fetcher),
        RunOptions::from_settings(&settings, args.images),
    );

    match output_mode {
        OutputMode::Json => {
            let summary = app.run(&mut pending, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            Ok(summary)
        }
        OutputMode::Console => {
            let summary = app.run(&mut pending, &ConsoleOutput)?;
            ConsoleOutput::print_summary(&summary).into_diagnostic()?;
            Ok(summary)
        }
    }
}
