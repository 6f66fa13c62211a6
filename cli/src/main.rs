use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{Level, info, subscriber::set_global_default};
use tracing_subscriber::EnvFilter;

use sheetsync::config::default_config_path;
use sheetsync::history::{DEFAULT_HISTORY_CAPACITY, NotificationHistory};
use sheetsync::source::shape;
use sheetsync::ui::PresentationState;
use sheetsync::{
	ChangeDetector, CycleOutcome, EngineCommand, EngineEvent, EventBus, HttpTransport, Notice,
	SourceLocation, SyncConfig, SyncEngine, TableBody, diff,
};

fn init_tracing(verbosity: u8) {
	// Map -q/-v to tracing levels; default WARN
	let level = match verbosity {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};

	let env_filter = EnvFilter::from_default_env().add_directive(level.into());

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr) // logs to stderr
		.with_target(false)
		.with_level(true)
		.compact()
		.finish();

	// Ignore error if already set in tests or env
	let _ = set_global_default(subscriber);
}

fn main() {
	let opts = Opts::parse();
	init_tracing(opts.verbose.saturating_sub(opts.quiet));
	smol::block_on(async move {
		if let Err(e) = run(opts).await {
			eprintln!("error: {e}");
			std::process::exit(1);
		}
	});
}

async fn run(opts: Opts) -> anyhow::Result<()> {
	let config = load_config(opts.config.as_deref())?;
	match opts.command {
		Command::Watch { source, cycles } => {
			let location = resolve_location(&config, &source)?;
			watch(&config, location, cycles).await?;
		}
		Command::Check { source } => {
			let location = resolve_location(&config, &source)?;
			check(&config, location).await?;
		}
		Command::Diff { old, new } => {
			let previous = config.fields.project(&shape(&std::fs::read_to_string(&old)?, &config.layout)?);
			let current = config.fields.project(&shape(&std::fs::read_to_string(&new)?, &config.layout)?);
			let report = diff(Some(previous.as_slice()), &current, &config.fields, config.alignment);
			match Notice::from_report(&report) {
				Some(notice) => print_notice(&notice),
				None => println!("No changes."),
			}
		}
		Command::Sources => {
			for name in config.sources.names() {
				let loc = config.sources.select(name)?;
				println!("{name}: {}", loc.url);
			}
		}
	}
	Ok(())
}

/// Explicit `--config`, else the default path when it exists, else defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
	if let Some(path) = path {
		return Ok(SyncConfig::load(path)?);
	}
	match default_config_path() {
		Some(path) if path.exists() => Ok(SyncConfig::load(&path)?),
		_ => Ok(SyncConfig::default()),
	}
}

fn resolve_location(config: &SyncConfig, args: &SourceArgs) -> anyhow::Result<SourceLocation> {
	if let Some(ref url) = args.url {
		let mut location = SourceLocation::new(url.clone());
		if let Some(ref fallback) = args.fallback {
			location = location.with_fallback(fallback.clone());
		}
		return Ok(location);
	}
	if let Some(ref name) = args.source {
		return Ok(config.sources.select(name)?.clone());
	}
	match config.sources.latest() {
		Some((name, location)) => {
			info!("Using source '{name}'");
			Ok(location.clone())
		}
		None => anyhow::bail!("no source given; pass --url or --source, or add sources to the config"),
	}
}

fn detector(config: &SyncConfig, location: SourceLocation, bus: Arc<EventBus>) -> ChangeDetector {
	let transport = Arc::new(HttpTransport::new(config.request_timeout()));
	ChangeDetector::from_config(config, location, transport, bus)
}

async fn watch(config: &SyncConfig, location: SourceLocation, cycles: Option<u64>) -> anyhow::Result<()> {
	let history = NotificationHistory::shared(DEFAULT_HISTORY_CAPACITY);
	let bus = EventBus::new();
	let updates = bus.subscribe();
	let det = detector(config, location, bus).with_history(history.clone());
	let (engine, events, _cmd) = SyncEngine::start(det, config.poll_interval());
	engine.send(EngineCommand::Start);

	let mut completed = 0u64;
	while let Ok(event) = events.recv().await {
		match event {
			EngineEvent::Baseline { rows } => println!("Loaded {rows} rows."),
			EngineEvent::Changed { notice: Some(notice), .. } => print_notice(&notice),
			EngineEvent::SnapshotReady(snap) => {
				info!("{}", snap.summary());
				completed += 1;
				if cycles.is_some_and(|n| completed >= n) {
					break;
				}
			}
			EngineEvent::Stopped => break,
			_ => {}
		}
	}
	engine.shutdown();
	if let Ok(mut history) = history.lock() {
		while let Ok(event) = updates.try_recv() {
			history.observe(&event);
		}
		info!(
			"{} updates applied this session, {} notices kept",
			history.applied_count(),
			history.len()
		);
	}
	Ok(())
}

async fn check(config: &SyncConfig, location: SourceLocation) -> anyhow::Result<()> {
	let table = Arc::new(Mutex::new(TableBody::with_header(config.fields.names())));
	let mut det = detector(config, location, EventBus::new()).with_table(table.clone());
	if let CycleOutcome::Failed(e) = det.run_cycle().await {
		return Err(e.into());
	}
	if let Ok(table) = table.lock() {
		println!("{}", table.render());
	}
	println!("{}", PresentationState::from_detector(&det).summary());
	Ok(())
}

fn print_notice(notice: &Notice) {
	println!("== {} ==", notice.title);
	println!("{}", notice.body());
}

#[derive(Parser)]
#[command(version, about = "Watch a published spreadsheet and report what changed")]
pub struct Opts {
	/// Increase verbosity (-v, -vv). Default WARN.
	#[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
	/// Decrease verbosity (-q). Each -q reduces level by one step.
	#[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
	pub quiet: u8,
	/// Config file (JSON). Defaults to the platform config dir.
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(clap::Args)]
pub struct SourceArgs {
	/// Named source from the config catalog (e.g. a year)
	#[arg(long, conflicts_with = "url")]
	pub source: Option<String>,
	/// CSV export URL
	#[arg(long)]
	pub url: Option<String>,
	/// Secondary URL tried once when the primary fails
	#[arg(long, requires = "url")]
	pub fallback: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
	/// Poll a source and print a notice whenever it changes
	Watch {
		#[command(flatten)]
		source: SourceArgs,
		/// Exit after this many completed cycles
		#[arg(long)]
		cycles: Option<u64>,
	},
	/// Fetch once and print the projected table
	Check {
		#[command(flatten)]
		source: SourceArgs,
	},
	/// Compare two local CSV files with the configured layout
	Diff {
		old: PathBuf,
		new: PathBuf,
	},
	/// List the configured sources
	Sources,
}
