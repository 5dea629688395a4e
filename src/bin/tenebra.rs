//! Binary entry point for the tenebra inspection CLI.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tenebra::freelist::Freelist;
use tenebra::page::Page;
use tenebra::store::PageStore;
use tenebra::types::Pgid;
use tenebra::Result;

#[derive(Parser, Debug)]
#[command(
    name = "tenebra",
    version,
    about = "Inspection tool for tenebra database files",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version and build target information
    Version,
    /// Low-level repairs on a database file
    #[command(subcommand)]
    Surgery(SurgeryCommand),
}

#[derive(Subcommand, Debug)]
enum SurgeryCommand {
    /// Decode a freelist page and print its spans
    DumpFreelist {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(long, value_name = "PGID", help = "Page id of the freelist page")]
        page: u64,
    },
    /// Overwrite a freelist page with an empty record
    AbandonFreelist {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(long, value_name = "PGID", help = "Page id of the freelist page")]
        page: u64,
    },
}

fn cmd_version() {
    println!("tenebra Version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "OS/Arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

fn cmd_dump_freelist(db_path: &Path, pgid: u64) -> Result<()> {
    let mut store = PageStore::open(db_path)?;
    let page = store.read_page(Pgid(pgid))?;

    let mut list = Freelist::new();
    list.read(&page)?;

    println!("freelist page {pgid} of {}", db_path.display());
    println!("  type: {}", page.type_name());
    println!("  free pages: {}", list.free_count());
    println!("  spans:");
    for span in list.spans() {
        println!("    {:>12} .. {:>12}  ({} pages)", span.start, span.end(), span.size);
    }
    Ok(())
}

fn cmd_abandon_freelist(db_path: &Path, pgid: u64) -> Result<()> {
    let mut store = PageStore::open(db_path)?;

    // Refuse to clobber anything that does not decode as a freelist.
    let existing = store.read_page(Pgid(pgid))?;
    let mut check = Freelist::new();
    check.read(&existing)?;

    let empty = Freelist::new();
    let mut page = Page::sized_for(Pgid(pgid), empty.size(), store.page_size());
    empty.write(&mut page)?;
    store.write_page(&page)?;
    store.sync()?;

    println!(
        "abandoned freelist page {pgid} ({} pages dropped)",
        check.free_count()
    );
    Ok(())
}

fn main() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Surgery(SurgeryCommand::DumpFreelist { db_path, page }) => {
            cmd_dump_freelist(&db_path, page)
        }
        Command::Surgery(SurgeryCommand::AbandonFreelist { db_path, page }) => {
            cmd_abandon_freelist(&db_path, page)
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
