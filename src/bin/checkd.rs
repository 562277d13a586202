use std::sync::Arc;

use checkd::{Engine, TokioClock, config::read_config_file, monitors};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    // RUST_LOG uses the `target=level,...` syntax
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|directives| directives.parse::<filter::Targets>().ok())
        .unwrap_or_else(|| {
            filter::Targets::new().with_targets(vec![
                ("checkd", LevelFilter::DEBUG),
            ])
        });
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let engine = Engine::new(Arc::new(TokioClock::current()?));
    monitors::register_builtin(&engine)?;

    let scheduled = config.apply(&engine);
    info!("{scheduled} of {} checks scheduled", config.checks.len());

    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    engine.deschedule_all();
    let stats = engine.stats();
    info!(
        completed = stats.completed,
        timeouts = stats.timeouts,
        skipped = stats.skipped,
        "engine stopped"
    );

    Ok(())
}
