use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use rust_manga_reader::cli::{Cli, Command};
use rust_manga_reader::models::SearchFilters;
use rust_manga_reader::queue::RunSummary;
use rust_manga_reader::{AppState, Config, CoreError};
use std::io;
use std::path::Path;
use std::process::ExitCode;
use tokio::task::JoinHandle;

fn init_logging() {
    if Path::new("log4rs.yml").exists() {
        match log4rs::init_file("log4rs.yml", Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Ignoring log4rs.yml: {}", e),
        }
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Logging disabled: {}", e);
            }
        }
        Err(e) => eprintln!("Logging disabled: {}", e),
    }
}

async fn wait(handle: Option<JoinHandle<RunSummary>>) {
    let Some(handle) = handle else {
        println!("Queue already running, jobs were added to it");
        return;
    };
    match handle.await {
        Ok(s) => println!(
            "{} succeeded, {} failed, {} skipped, {} new chapters",
            s.successes, s.failures, s.skipped, s.new_chapters
        ),
        Err(e) => log::error!("Worker crashed: {}", e),
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .map_err(|e| CoreError::Io(io::Error::new(io::ErrorKind::InvalidInput, e.to_string())))?,
        None => Config::load(),
    };
    let app = AppState::new(config)?;

    match cli.command {
        Command::Add { source, slug } => {
            let (id, outcome) = app.add_title(&source, &slug).await?;
            println!("Added title {} with {} chapters", id, outcome.recent_ids.len());
        }
        Command::Update { title_ids } => {
            wait(app.updater.update(&title_ids)).await;
        }
        Command::UpdateLibrary => {
            wait(app.updater.update_library()?).await;
        }
        Command::Download { chapter_ids } => {
            wait(app.downloader.download(&chapter_ids)?).await;
        }
        Command::Chapters { title_id } => {
            let title = app.store.title(title_id)?;
            println!("{} [{}]", title.name, title.source_id);
            for c in app.store.chapters(title_id)? {
                let marker = if c.downloaded { "*" } else { " " };
                println!("{:>5} {} #{:<6} {}", c.rank, marker, c.id, c.title);
            }
        }
        Command::Search {
            source,
            term,
            genre,
            status,
        } => {
            let filters = SearchFilters { genres: genre, status };
            for r in app.search(&source, &term, &filters).await? {
                println!("{:<40} {}", r.slug, r.name);
            }
        }
        Command::Sources => {
            for id in app.registry.ids() {
                if let Some(source) = app.registry.get(&id) {
                    let guard = if source.challenge().is_some() { " (challenge)" } else { "" };
                    println!("{:<20} {}{}", id, source.name(), guard);
                }
            }
        }
        Command::Gc => {
            println!("Removed {} titles", app.gc()?);
        }
    }

    log::debug!("Metrics: {}", app.metrics.export_json());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("error: {} ({})", e, e.user_message());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
