//! Open a target and print what the program core knows about it.
//!
//! ```text
//! cargo run -p vantage-core --example inspect -- core /var/crash/vmcore --symbol jiffies
//! sudo cargo run -p vantage-core --example inspect -- kernel --read 0xffffffff81000000
//! cargo run -p vantage-core --example inspect -- pid 1234 --type "struct stat"
//! ```

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use vantage_core::blocking::{from_core_dump_with_timeout, from_kernel_with_timeout, from_pid_with_timeout};
use vantage_core::escape::c_string;
use vantage_core::prelude::*;
use vantage_utils::{info, init_logging};

/// Inspect a debugging target.
#[derive(Parser, Debug)]
#[command(name = "inspect")]
struct Cli
{
    #[command(subcommand)]
    target: Target,

    /// Give up on initialization after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Read 16 bytes at this address (hex with 0x prefix, or decimal)
    #[arg(long)]
    read: Option<String>,

    /// Look up a symbol by name
    #[arg(long)]
    symbol: Option<String>,

    /// Look up a type by name
    #[arg(long = "type")]
    type_name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Target
{
    /// An ELF core dump or kernel vmcore
    Core
    {
        path: String,
        /// Warn about missing debug info
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// The running kernel
    Kernel
    {
        /// Warn about missing debug info
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// A running process
    Pid
    {
        pid: u32
    },
}

fn parse_address(text: &str) -> Option<u64>
{
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn print_summary(program: &Program) -> VantageResult<()>
{
    println!("platform: {}", program.platform());
    println!("flags:    {:?}", program.flags());
    match program.metadata()? {
        TargetMetadata::Kernel(info) => {
            println!("release:  {}", c_string(info.os_release().as_bytes()));
            println!("kaslr:    0x{:x}", info.kaslr_offset());
        }
        TargetMetadata::Userspace(mappings) => {
            println!("mappings: {}", mappings.len());
            for mapping in mappings {
                println!(
                    "  {:#018x}-{:#018x} {:#x} {}",
                    mapping.start,
                    mapping.end,
                    mapping.file_offset,
                    mapping.path.display()
                );
            }
        }
    }
    println!("types:    {}", program.type_index()?.len());
    println!("symbols:  {}", program.symbol_index()?.len());
    Ok(())
}

fn run_queries(program: &Program, cli: &Cli) -> VantageResult<()>
{
    if let Some(name) = &cli.symbol {
        let symbol = program.find_symbol(name)?;
        println!("{symbol}");
    }
    if let Some(name) = &cli.type_name {
        let entry = program.find_type(name)?;
        println!("{} {}: {:?} bytes", entry.kind, entry.name, entry.size);
    }
    if let Some(text) = &cli.read {
        let address =
            parse_address(text).ok_or_else(|| VantageError::MalformedInput(format!("bad address {text:?}")))?;
        let bytes = program.read_bytes(address, 16)?;
        let hex: Vec<String> = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        let at = program.symbolize(address).map(ToString::to_string).unwrap_or_default();
        println!("{address:#018x}: {} {at}", hex.join(" "));
    }
    Ok(())
}

#[tokio::main]
async fn main()
{
    let _guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let result = match &cli.target {
        Target::Core { path, verbose } => from_core_dump_with_timeout(path.clone(), *verbose, timeout).await,
        Target::Kernel { verbose } => from_kernel_with_timeout(*verbose, timeout).await,
        Target::Pid { pid } => from_pid_with_timeout(*pid, timeout).await,
    };
    let mut program = match result {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Failed to open target: {e}");
            process::exit(1);
        }
    };
    info!(kind = ?cli.target, "target opened");

    let outcome = print_summary(&program).and_then(|()| run_queries(&program, &cli));
    if let Err(e) = program.deinitialize() {
        eprintln!("Failed to release target: {e}");
    }
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
