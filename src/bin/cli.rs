//! StrataKV CLI Client
//!
//! Command-line interface for interacting with a StrataKV server.

use std::io::Write;

use clap::{Parser, Subcommand};
use stratakv::Client;

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "CLI for the StrataKV key-value server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List records with start <= key < end
    Scan {
        /// First key (inclusive)
        start: String,

        /// Last key (exclusive); omit to scan to the end
        end: Option<String>,
    },

    /// Check whether the server accepts writes
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let client = Client::new(&args.server);

    if let Err(e) = run(&client, args.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(client: &Client, command: Commands) -> stratakv::Result<()> {
    let mut stdout = std::io::stdout().lock();

    match command {
        Commands::Get { key } => match client.get(key.as_bytes()).await? {
            Some(value) => {
                stdout.write_all(&value)?;
                writeln!(stdout)?;
            }
            None => {
                eprintln!("(not found)");
                std::process::exit(2);
            }
        },
        Commands::Put { key, value } => {
            client.put(key.as_bytes(), value.as_bytes()).await?;
            writeln!(stdout, "OK")?;
        }
        Commands::Delete { key } => {
            client.delete(key.as_bytes()).await?;
            writeln!(stdout, "OK")?;
        }
        Commands::Scan { start, end } => {
            let records = client
                .scan(start.as_bytes(), end.as_deref().map(str::as_bytes))
                .await?;
            for (key, value) in records {
                stdout.write_all(&key)?;
                stdout.write_all(b"\t")?;
                stdout.write_all(&value)?;
                writeln!(stdout)?;
            }
        }
        Commands::Status => {
            if client.status().await? {
                writeln!(stdout, "accepting writes")?;
            } else {
                writeln!(stdout, "halted")?;
                std::process::exit(3);
            }
        }
    }

    Ok(())
}
