use audioconv_api::{init_tracing, serve, ServerConfig};
use clap::Parser;

#[derive(Parser)]
#[command(name = "audioconv-api")]
#[command(about = "Upload, convert and download audio over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    server: ServerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    serve(Cli::parse().server).await
}
