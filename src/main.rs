mod batch;
mod catalog;
mod cli;
mod collection;
mod metadata;
mod musicbrainz;
mod trim;

#[tokio::main]
async fn main() {
    {
        use tracing_subscriber::prelude::*;

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init()
    }

    if let Err(e) = cli::main().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
