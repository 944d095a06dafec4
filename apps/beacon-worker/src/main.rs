use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = beacon_worker::Args::parse();

	beacon_worker::run(args).await
}
