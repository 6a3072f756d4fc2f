//! EthMem CLI: drive the memory pipeline from a terminal.
//!
//! Each invocation boots an in-process coordination kernel over the
//! configured store and sends its command through the coordination bus, the
//! same path the page-side interceptor uses.

mod cli;
mod cmd;
mod table;
mod ui;

use crate::cli::{Cli, Commands};
use crate::cmd::{config, memory, Session};
use clap::Parser;
use ethmem_kernel::EthMemKernel;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let kernel = EthMemKernel::boot(cli.config.as_deref()).await?;
    let session = Session {
        router: kernel.router(),
        json: cli.json,
    };

    match cli.command {
        Commands::Extract { text, platform } => memory::extract(&session, text, platform).await,
        Commands::Add {
            category,
            entity,
            description,
            platform,
        } => memory::add(&session, category, entity, description, platform).await,
        Commands::List { category } => memory::list(&session, category).await,
        Commands::Stats => memory::stats(&session).await,
        Commands::Delete { id } => memory::delete(&session, id).await,
        Commands::Clear { yes } => memory::clear(&session, yes).await,
        Commands::Promote { id, status } => memory::promote(&session, id, status).await,
        Commands::Rank { message, max } => memory::rank(&session, message, max).await,
        Commands::Smart { message, platform } => memory::smart(&session, message, platform).await,
        Commands::Inject { message, url, body } => {
            memory::inject(&session, message, url, body).await
        }
        Commands::Status => config::status(&session).await,
        Commands::SetKey { key } => config::set_key(&session, key).await,
        Commands::ApiStatus => config::api_status(&session).await,
        Commands::TestKey { key } => config::test_key(&session, key).await,
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run(cli)) {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
