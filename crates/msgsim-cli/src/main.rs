use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msgsim_cli::cli::{CliCommand, CliConfig, Response, Session};

#[derive(Parser)]
#[command(name = "msgsim")]
#[command(about = "Drive the message simulator's thread store from the command line")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (contains dataDir, storageQuotaBytes, saveDebounceMs)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory holding the persisted threads (overrides the config file)
    #[arg(long, short = 'd')]
    data_dir: Option<PathBuf>,

    /// Thread reference carried by the address, as in `?thread=<id>`
    #[arg(long, short = 't')]
    thread: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List threads, newest first
    List,

    /// Show the current thread
    Show,

    /// Create a thread holding the demo conversation
    New,

    /// Copy a thread under a new id
    Duplicate { thread_id: String },

    /// Delete a thread
    Delete { thread_id: String },

    /// Rename a thread; omit the name to derive it from the recipient again
    Rename {
        thread_id: String,
        name: Option<String>,
    },

    /// Navigate to a thread
    Open { thread_id: String },

    /// Add a message to the current thread
    AddMessage {
        /// Insert after this message instead of at the end
        #[arg(long, short = 'a')]
        after: Option<String>,
        /// Message text
        #[arg(long, short = 'm')]
        text: Option<String>,
        /// "self" or "other"
        #[arg(long, short = 's')]
        sender: Option<String>,
    },

    /// Change a message of the current thread
    EditMessage {
        message_id: String,
        #[arg(long, short = 'm')]
        text: Option<String>,
        #[arg(long, short = 's')]
        sender: Option<String>,
    },

    /// Delete a message of the current thread
    DeleteMessage { message_id: String },

    /// Attach an image (e.g. a data URI) to a message
    AddImage { message_id: String, src: String },

    /// Update the recipient of the current thread
    Recipient {
        #[arg(long, short = 'n')]
        name: Option<String>,
        #[arg(long, short = 'l')]
        location: Option<String>,
    },

    /// Restore the demo conversation and recipient
    Clear,

    /// Print the current thread as importable JSON
    Export,

    /// Import a JSON file as a new thread
    Import { file: PathBuf },
}

fn main() {
    msgsim_core::tracing_setup::init_tracing();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        eprintln!("No command specified. Use --help for usage.");
        std::process::exit(1);
    };

    match run(command, cli.config, cli.data_dir, cli.thread.as_deref()) {
        Ok(response) => {
            print_response(&response, cli.pretty);
            if response.is_error() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(
    command: Commands,
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    thread: Option<&str>,
) -> Result<Response> {
    let config = match config_path {
        Some(path) => CliConfig::load(&path)?,
        None => CliConfig::default(),
    };
    let command = to_cli_command(command)?;

    let session = Session::open(&config.core_config(data_dir), thread)?;
    let response = session.execute(command);
    session.close();
    Ok(response)
}

fn to_cli_command(command: Commands) -> Result<CliCommand> {
    let command = match command {
        Commands::List => CliCommand::ListThreads,
        Commands::Show => CliCommand::Show,
        Commands::New => CliCommand::NewThread,
        Commands::Duplicate { thread_id } => CliCommand::DuplicateThread { thread_id },
        Commands::Delete { thread_id } => CliCommand::DeleteThread { thread_id },
        Commands::Rename { thread_id, name } => CliCommand::RenameThread { thread_id, name },
        Commands::Open { thread_id } => CliCommand::OpenThread { thread_id },
        Commands::AddMessage {
            after,
            text,
            sender,
        } => CliCommand::AddMessage {
            after,
            text,
            sender,
        },
        Commands::EditMessage {
            message_id,
            text,
            sender,
        } => CliCommand::EditMessage {
            message_id,
            text,
            sender,
        },
        Commands::DeleteMessage { message_id } => CliCommand::DeleteMessage { message_id },
        Commands::AddImage { message_id, src } => CliCommand::AddImage { message_id, src },
        Commands::Recipient { name, location } => CliCommand::SetRecipient { name, location },
        Commands::Clear => CliCommand::Clear,
        Commands::Export => CliCommand::Export,
        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read import file: {}", file.display()))?;
            CliCommand::Import { json }
        }
    };
    Ok(command)
}

fn print_response(response: &Response, pretty: bool) {
    let output = if pretty {
        serde_json::to_string_pretty(response)
    } else {
        serde_json::to_string(response)
    };
    match output {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: Failed to serialize response: {}", e),
    }
}
