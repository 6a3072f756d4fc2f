//! Clap CLI definitions for EthMem.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ethmem extract \"I live in Denver\"      Extract and store a memory
  ethmem add allergy peanuts            Store a memory by hand
  ethmem list                           Show stored memories
  ethmem rank \"what food do I like\"     Rank memories against a message
  ethmem smart \"dinner ideas?\"          Run the pre-send pipeline
  ethmem set-key sk-...                 Save the remote API key
  ethmem status                         API key and local model status";

/// EthMem: personal memory for chat assistants.
#[derive(Parser)]
#[command(
    name = "ethmem",
    version,
    about = "EthMem: extract, rank and inject personal context for chat assistants",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print raw JSON payloads instead of formatted output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract a memory from a message and store it.
    Extract {
        /// The message text.
        text: String,
        /// Platform the message came from (chatgpt, claude, gemini, generic).
        #[arg(long)]
        platform: Option<String>,
    },
    /// Store a memory entered by hand.
    Add {
        /// Category, e.g. location, food, allergy.
        category: String,
        /// The fact itself, e.g. denver.
        entity: String,
        /// Free-form description. Defaults to the category template.
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// List stored memories.
    List {
        /// Only show this category.
        #[arg(long)]
        category: Option<String>,
    },
    /// Memory statistics.
    Stats,
    /// Delete one memory by id.
    Delete {
        /// Memory id (mem-...).
        id: String,
    },
    /// Delete every stored memory.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Advance a memory's status (local -> synced -> on-chain).
    Promote {
        /// Memory id (mem-...).
        id: String,
        /// Target status.
        status: String,
    },
    /// Rank stored memories against a message.
    Rank {
        /// The message to rank against.
        message: String,
        /// Maximum number of memories returned.
        #[arg(long, short = 'n', default_value_t = 5)]
        max: usize,
    },
    /// Rank, extract and format the injection text for a message.
    Smart {
        message: String,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Show API key and local model status.
    Status,
    /// Save the remote API key into the config file.
    SetKey {
        /// The API key.
        key: String,
    },
    /// Whether a remote API key is configured.
    ApiStatus,
    /// Check an API key (or the configured one) against the remote endpoint.
    TestKey {
        key: Option<String>,
    },
    /// Run a request body through the interceptor as if the message were sent.
    Inject {
        /// The message the user is sending.
        message: String,
        /// Endpoint URL of the outgoing call.
        #[arg(long)]
        url: String,
        /// Request body. Read from the message shape when omitted.
        #[arg(long)]
        body: Option<String>,
    },
}
