use std::{fs, path::PathBuf};

use clap::{
	Parser,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use color_eyre::eyre;
use tracing_subscriber::EnvFilter;

use reverie_engine::PlanEngine;

pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

#[derive(Debug, Parser)]
#[command(
	version = VERSION,
	rename_all = "kebab",
	styles = styles(),
)]
pub struct Args {
	/// Engine configuration TOML file.
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Query plan JSON document to execute.
	#[arg(long, short = 'p', value_name = "FILE")]
	pub plan: PathBuf,
	/// Journal owner the plan runs for.
	#[arg(long, short = 's', value_name = "UUID")]
	pub subject: String,
	/// Total entry count for percentage context in summaries.
	#[arg(long, value_name = "N", default_value_t = 0)]
	pub total_entries: i64,
	/// Pretty-print the summary JSON.
	#[arg(long)]
	pub pretty: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = reverie_config::load(&args.config)?;

	init_tracing(&config);

	let raw_plan = fs::read_to_string(&args.plan)
		.map_err(|err| eyre::eyre!("Failed to read plan file {}: {err}.", args.plan.display()))?;
	let plan = reverie_plan::parse_plan(&raw_plan)?;

	tracing::info!(
		sub_questions = plan.sub_questions.len(),
		subject = %args.subject,
		"Loaded query plan."
	);

	let engine = PlanEngine::new(config);
	let summaries = engine.execute_plan(plan, &args.subject, args.total_entries).await?;
	let output = if args.pretty {
		serde_json::to_string_pretty(&summaries)?
	} else {
		serde_json::to_string(&summaries)?
	};

	println!("{output}");

	Ok(())
}

// Summaries go to stdout, so diagnostics stay on stderr.
fn init_tracing(config: &reverie_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Red.on_default() | Effects::BOLD)
		.usage(AnsiColor::Red.on_default() | Effects::BOLD)
		.literal(AnsiColor::Blue.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}
