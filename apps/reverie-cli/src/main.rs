use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = reverie_cli::Args::parse();

	reverie_cli::run(args).await
}
