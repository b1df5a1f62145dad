use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a title from a source and add it to the library
    Add {
        source: String,
        slug: String,
    },
    /// Update the given titles
    Update {
        #[arg(required = true)]
        title_ids: Vec<i64>,
    },
    /// Update every title in the library
    UpdateLibrary,
    /// Download chapters by id
    Download {
        #[arg(required = true)]
        chapter_ids: Vec<i64>,
    },
    /// List the chapters of a title
    Chapters {
        title_id: i64,
    },
    /// Search a source
    Search {
        source: String,
        term: String,
        /// Restrict to a genre (repeatable)
        #[arg(long)]
        genre: Vec<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// List registered sources
    Sources,
    /// Remove stale titles that are not in the library
    Gc,
}
