mod auth;
mod crawler;
mod extract;
mod fetch;
mod sheets;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::crawler::Crawl;
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::sheets::{NullSink, RecordSink, SheetsSink};

#[derive(Parser)]
#[command(
    name = "linkedin_jobs",
    about = "LinkedIn guest-jobs crawler with a Google Sheets sink"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the paginated search results, sink each record to the sheet,
    /// and stream them to a JSONL file
    Crawl {
        /// Max pages to fetch (default: until an empty page)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Title for the spreadsheet created on first write
        #[arg(long, default_value = "scraped_data")]
        sheet_title: String,
        /// Skip the Sheets sink entirely
        #[arg(long)]
        no_sheet: bool,
        /// Output path for the JSONL record stream
        #[arg(long, default_value = "data/jobs.jsonl")]
        out: PathBuf,
    },
    /// Authorize spreadsheet access and cache the token
    Login,
    /// Fetch a single page and print its records (no sink)
    Page {
        /// Start offset, in steps of 25
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            limit,
            sheet_title,
            no_sheet,
            out,
        } => {
            let sink: Box<dyn RecordSink> = if no_sheet {
                Box::new(NullSink)
            } else {
                let auth = auth::Authenticator::load_or_login()?;
                Box::new(SheetsSink::new(auth, sheet_title)?)
            };
            let fetcher = HttpFetcher::new()?;
            run_crawl(Box::new(fetcher), sink, limit, &out)?;
        }
        Commands::Login => {
            auth::Authenticator::load_or_login()?;
            println!("Authorized. Token cached in token.json.");
        }
        Commands::Page { offset } => {
            let fetcher = HttpFetcher::new()?;
            let html = fetcher.fetch_page(offset)?;
            let records = extract::parse_page(&html);
            println!("{} listings at offset {}:", records.len(), offset);
            for r in &records {
                println!(
                    "  {} | {} | {}",
                    r.job_title, r.company_name, r.company_location
                );
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("Done in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

fn run_crawl(
    fetcher: Box<dyn PageFetcher>,
    sink: Box<dyn RecordSink>,
    limit: Option<usize>,
    out: &Path,
) -> Result<()> {
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file =
        fs::File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let mut writer = BufWriter::new(file);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);

    let mut crawl = Crawl::new(fetcher, sink, limit);
    let mut written = 0usize;

    while let Some(item) = crawl.next() {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                pb.finish_and_clear();
                return Err(e);
            }
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        written += 1;
        pb.set_message(format!(
            "{} records over {} pages",
            written,
            crawl.pages_fetched()
        ));
        pb.tick();
    }

    pb.finish_and_clear();
    writer.flush()?;
    println!(
        "Done: {} records over {} pages -> {}",
        written,
        crawl.pages_fetched(),
        out.display()
    );
    Ok(())
}
