/// hostbatch CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hostbatch_cli::{RunOptions, demo, exec};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostbatch")]
#[command(about = "Run batched host calls against the reference host")]
#[command(version)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Reject batches with more records than this
    #[arg(long, global = true, value_name = "N")]
    max_records: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a wire-format batch file and print the response map
    Exec {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Run a scripted client session over the channel bridge
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = RunOptions::new().max_records(args.max_records);

    match args.command {
        Command::Exec { input } => {
            let output = exec(&input, &options)?;
            for line in &output.printed {
                println!("{}", line);
            }
            println!("{}", output.response_json()?);
        }
        Command::Demo => {
            let output = demo(&options).await?;
            for line in &output.transcript {
                println!("{}", line);
            }
            if !output.printed.is_empty() {
                println!("\n=== Host output ===");
                for line in &output.printed {
                    println!("{}", line);
                }
            }
            println!("\n{} round trips", output.batches);
        }
    }

    Ok(())
}
