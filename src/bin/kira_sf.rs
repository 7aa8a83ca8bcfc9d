use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_sample_fetch::app::{App, DownloadResult};
use kira_sample_fetch::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use kira_sample_fetch::datastore::DataStoreHttpClient;
use kira_sample_fetch::domain::{SampleCode, collect_sample_codes};
use kira_sample_fetch::error::{ErrorKind, KiraError};
use kira_sample_fetch::filter::FileFilter;
use kira_sample_fetch::layout::OutputLayout;
use kira_sample_fetch::metadata::{METADATA_SERVICE_PATH, MetadataHttpClient};
use kira_sample_fetch::output::{JsonOutput, OutputFormat, OutputMode};
use kira_sample_fetch::progress::{
    ConsoleProgress, LogSink, ProgressSink, SilentProgress, TransferProgress,
};
use kira_sample_fetch::rpc::{self, RpcClient, Service};
use kira_sample_fetch::session::{
    Credentials, DEFAULT_PASSWORD_VAR, PasswordSession, SessionProvider,
};
use kira_sample_fetch::transfer::{MismatchLog, TransferEngine, TransferSettings};

#[derive(Parser)]
#[command(name = "kira-sf")]
#[command(about = "Discover sample hierarchies in a data-management server and download their files")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (default: ./kira-sf.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Metadata server base URL.
    #[arg(long, global = true)]
    server: Option<String>,

    /// File store base URL; repeat for several stores.
    #[arg(long = "datastore", global = true)]
    datastores: Vec<String>,

    #[arg(long, short = 'u', global = true, env = "KIRA_SF_USER")]
    user: Option<String>,

    /// Environment variable holding the password.
    #[arg(long, global = true, default_value = DEFAULT_PASSWORD_VAR)]
    password_env: String,

    /// Per-call timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[arg(long, global = true)]
    logs_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the files of samples and all their descendants")]
    Download(DownloadArgs),
    #[command(about = "List the files that download would fetch")]
    List(ListArgs),
}

#[derive(Args, Clone)]
struct SelectArgs {
    /// Sample codes.
    #[arg(conflicts_with = "id_file")]
    ids: Vec<String>,

    /// File with one sample code per line.
    #[arg(long)]
    id_file: Option<String>,

    /// Keep files whose name ends with one of these suffixes.
    #[arg(long = "suffix", short = 's')]
    suffixes: Vec<String>,

    /// Keep files whose full remote path matches this expression.
    #[arg(long)]
    regex: Option<String>,
}

#[derive(Args, Clone)]
struct DownloadArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(long, short = 'o', default_value = ".")]
    output_dir: Utf8PathBuf,

    /// Keep the remote directory layout below the sample directory.
    #[arg(long)]
    conserve_structure: bool,

    #[arg(long)]
    buffer_size: Option<usize>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// Download even when a valid local copy exists.
    #[arg(long)]
    force: bool,

    /// Resolve everything and print the planned paths without writing.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Clone)]
struct ListArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::Connection => 3,
        ErrorKind::Authentication => 4,
        ErrorKind::Contract => 5,
        ErrorKind::Transfer => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    // Everything that can be checked locally fails before the first request.
    let select = match &cli.command {
        Commands::Download(args) => &args.select,
        Commands::List(args) => &args.select,
    };
    let roots = collect_sample_codes(
        &select.ids,
        select.id_file.as_deref().map(std::path::Path::new),
    )?;
    let file_filter = FileFilter::new(&select.suffixes, select.regex.as_deref())?;

    let mut overrides = ConfigOverrides {
        server_url: cli.server.clone(),
        datastores: cli.datastores.clone(),
        timeout_secs: cli.timeout,
        logs_dir: cli.logs_dir.clone(),
        ..ConfigOverrides::default()
    };
    if let Commands::Download(args) = &cli.command {
        overrides.buffer_size = args.buffer_size;
        overrides.max_attempts = args.max_attempts;
    }
    let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;

    let password = std::env::var(&cli.password_env).ok();
    let credentials = Credentials::resolve(cli.user.clone(), password, &cli.password_env)?;

    let endpoint = rpc::service_url(&config.server_url, METADATA_SERVICE_PATH)?;
    let rpc_client = RpcClient::new(endpoint, config.timeout, Service::Metadata)?;
    let session = Arc::new(PasswordSession::login(
        rpc_client.clone(),
        &credentials.user,
        &credentials.password,
    )?);
    let provider: Arc<dyn SessionProvider> = session.clone();

    let outcome = build_app(&config, rpc_client, provider).and_then(|app| match cli.command {
        Commands::Download(args) => run_download(&app, &config, &roots, &file_filter, args, output_mode),
        Commands::List(args) => run_list(&app, &roots, &file_filter, args.format, output_mode),
    });
    session.logout();
    outcome
}

type HttpApp = App<MetadataHttpClient, DataStoreHttpClient>;

fn build_app(
    config: &ResolvedConfig,
    rpc_client: RpcClient,
    session: Arc<dyn SessionProvider>,
) -> miette::Result<HttpApp> {
    let stores = config
        .datastores
        .iter()
        .map(|store| {
            DataStoreHttpClient::new(&store.name, store.url.clone(), config.timeout, session.clone())
        })
        .collect::<Result<Vec<_>, KiraError>>()?;
    let metadata = MetadataHttpClient::new(rpc_client, session);
    Ok(App::new(metadata, stores))
}

fn run_list(
    app: &HttpApp,
    roots: &[SampleCode],
    filter: &FileFilter,
    format: OutputFormat,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.list(roots, filter, &JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
            ensure_roots_ok(result.failed_roots.len())
        }
        OutputMode::Interactive => {
            let result = app.list(roots, filter, &LogSink)?;
            let text = format.render(&result).into_diagnostic()?;
            print!("{text}");
            ensure_roots_ok(result.failed_roots.len())
        }
    }
}

fn run_download(
    app: &HttpApp,
    config: &ResolvedConfig,
    roots: &[SampleCode],
    filter: &FileFilter,
    args: DownloadArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let layout = OutputLayout::new(args.output_dir, args.conserve_structure);
    let settings = TransferSettings {
        buffer_size: config.buffer_size,
        max_attempts: config.max_attempts,
        trust_sidecar: config.trust_sidecar,
        force: args.force,
    };
    let engine = TransferEngine::new(layout, settings, MismatchLog::in_dir(&config.logs_dir));

    let (mut progress, sink): (Box<dyn TransferProgress>, &dyn ProgressSink) = match output_mode {
        OutputMode::Interactive => (
            Box::new(ConsoleProgress::new(config.progress_interval)),
            &LogSink,
        ),
        OutputMode::NonInteractive => (Box::new(SilentProgress), &JsonOutput),
    };
    let result = app.download(roots, filter, &engine, args.dry_run, progress.as_mut(), sink)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_download(&result).into_diagnostic()?,
        OutputMode::Interactive => print_download_summary(&result),
    }

    if result.has_failures() {
        return Err(miette::miette!(
            "{} ({} identifiers failed)",
            result.summary(),
            result.failed_roots.len()
        ));
    }
    Ok(())
}

fn ensure_roots_ok(failed_roots: usize) -> miette::Result<()> {
    if failed_roots > 0 {
        return Err(miette::miette!("{failed_roots} identifiers could not be resolved"));
    }
    Ok(())
}

fn print_download_summary(result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}kira-sf summary{reset}");
    if result.dry_run {
        for planned in &result.planned {
            println!("{yellow}  would write {} ({}){reset}", planned.path, planned.file);
        }
        println!("{cyan}{}{reset}", result.summary());
        return;
    }

    for report in &result.reports {
        if report.reused {
            println!("{green}  up to date  {}{reset}", report.path);
        } else if report.is_success() {
            println!("{green}  downloaded  {}{reset}", report.path);
        } else {
            println!(
                "{red}  failed      {} ({}){reset}",
                report.path,
                report.error.as_deref().unwrap_or("checksum mismatch")
            );
        }
    }
    for error in &result.errors {
        println!("{red}  failed      {} ({}){reset}", error.file, error.message);
    }
    for failure in &result.failed_roots {
        println!("{yellow}  skipped sample {} ({}){reset}", failure.root, failure.message);
    }

    let color = if result.has_failures() { red } else { green };
    println!("{color}{}{reset}", result.summary());
}
