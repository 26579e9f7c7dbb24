//! won-replay binary
//!
//! Evaluates a recorded connection offline and prints the derived view as
//! JSON.
//!
//! ```text
//! won-replay <connection-uri> <messages.json> [agreement-protocol.json]
//! ```

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use won_client::replay_files;
use won_protocol::Uri;

const USAGE: &str = "usage: won-replay <connection-uri> <messages.json> [agreement-protocol.json]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "won_replay=info,won=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(connection), Some(messages)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let protocol = args.next().map(PathBuf::from);

    tracing::info!(connection = %connection, messages = %messages, "replaying connection");
    let report = replay_files(Uri::new(connection), &PathBuf::from(messages), protocol.as_deref()).await?;

    if !report.unresolved.is_empty() {
        tracing::warn!(count = report.unresolved.len(), "some agreement events could not be resolved");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
