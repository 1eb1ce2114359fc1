use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use crate::catalog::{self, CatalogConfig};
use crate::{batch, collection, musicbrainz, trim};

#[derive(Parser)]
#[command(name = "trimdex", version)]
enum Cli {
    /// Reconcile a collection against MusicBrainz and trim wrong tails
    Trim(TrimArgs),
    /// Import a collection into a recording catalog
    Import(ImportArgs),
    /// Remove catalog entries, one by one or from a list file
    Remove(RemoveArgs),
}

#[derive(clap::Args)]
struct TrimArgs {
    /// Collection root to process
    directory: PathBuf,
    /// Folder names to skip, separated by `;`
    #[arg(long)]
    ignore: Option<String>,
    /// Contact address for the MusicBrainz user agent
    #[arg(long, default_value = "trimdex@example.invalid")]
    contact: String,
    /// Worker count (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(clap::Args)]
struct ImportArgs {
    /// Path to the catalog database (created if absent; defaults to the
    /// platform data directory)
    #[arg(long, short = 'd')]
    database: Option<PathBuf>,
    /// Collection root to import
    directory: PathBuf,
    /// Folder names to skip, separated by `;`
    #[arg(long)]
    ignore: Option<String>,
    /// Force this source on every imported record
    #[arg(long)]
    source: Option<String>,
}

#[derive(clap::Args)]
struct RemoveArgs {
    /// Path to an existing catalog database (defaults to the platform
    /// data directory)
    #[arg(long, short = 'd')]
    database: Option<PathBuf>,
    /// File with one `title[, artist]` entry per line
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,
    /// Title to remove
    #[arg(long, short = 't')]
    title: Option<String>,
    /// Artist to narrow the title match
    #[arg(long, short = 'a')]
    artist: Option<String>,
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse() {
        Cli::Trim(args) => trim_collection(args).await,
        Cli::Import(args) => import(args),
        Cli::Remove(args) => remove(args),
    }
}

fn split_ignore(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(';')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

async fn trim_collection(args: TrimArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ignore = split_ignore(args.ignore);
    let files = collection::collect(&args.directory, &ignore)?;
    if files.is_empty() {
        eprintln!("No candidate files under {}", args.directory.display());
        return Ok(());
    }

    let client = musicbrainz::client(&musicbrainz::user_agent(&args.contact))?;
    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let total = files.len();
    eprintln!("Processing {total} files with {workers} workers");

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping after in-flight files complete...");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let labels: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    let outcome = batch::run_pooled(files, workers, cancel, move |path: PathBuf| {
        let client = client.clone();
        async move {
            trim::process_file(&client, &path)
                .await
                .map_err(|e| e.to_string())
        }
    })
    .await;

    let mut cut = 0;
    let mut correct = 0;
    let mut marked = 0;
    let mut previously_marked = 0;
    let mut no_metadata = 0;
    for action in outcome.results.iter().flatten() {
        match action {
            trim::TrimAction::Cut { .. } => cut += 1,
            trim::TrimAction::AlreadyCorrect => correct += 1,
            trim::TrimAction::MarkUnchecked => marked += 1,
            trim::TrimAction::SkipMarked => previously_marked += 1,
            trim::TrimAction::SkipNoMetadata => no_metadata += 1,
        }
    }
    for (idx, error) in &outcome.failures {
        eprintln!("FAIL {}: {error}", labels[*idx]);
    }

    eprintln!(
        "Done: {cut} trimmed, {correct} already correct, {marked} marked unchecked, \
         {previously_marked} previously marked, {no_metadata} without metadata, {} failed",
        outcome.failures.len()
    );
    if outcome.skipped > 0 {
        eprintln!("{} files not attempted (cancelled)", outcome.skipped);
    }
    Ok(())
}

fn import(args: ImportArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.directory.is_dir() {
        return Err(format!("not a directory: {}", args.directory.display()).into());
    }

    let database = args.database.unwrap_or_else(catalog::default_path);
    let config = CatalogConfig::default();
    let conn = catalog::open(&database, &config)?;
    let summary = batch::import_all(
        &conn,
        &config,
        &args.directory,
        &split_ignore(args.ignore),
        args.source.as_deref(),
    )?;

    eprintln!(
        "Imported {} of {} files ({} duplicates skipped, {} unreadable), catalog now holds {} songs",
        summary.inserted,
        summary.scanned,
        summary.duplicates,
        summary.unreadable,
        catalog::song_count(&conn)?
    );
    Ok(())
}

fn remove(args: RemoveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let database = args.database.unwrap_or_else(catalog::default_path);
    if !database.is_file() {
        return Err(format!("catalog not found: {}", database.display()).into());
    }

    let config = CatalogConfig::default();
    let conn = catalog::open(&database, &config)?;

    match (args.file, args.title) {
        (Some(file), _) => {
            if !file.is_file() {
                return Err(format!("removal list not found: {}", file.display()).into());
            }
            let content = std::fs::read_to_string(&file)?;
            let entries = batch::parse_removal_list(&content);
            let results = batch::remove_batch(&conn, &entries)?;
            for ((title, artist), removed) in entries.iter().zip(&results) {
                println!(
                    "{} | {title} -- {}",
                    if *removed { "removed" } else { "not found" },
                    artist.as_deref().unwrap_or("any artist")
                );
            }
        }
        (None, Some(title)) => {
            let removed = catalog::remove(&conn, &title, args.artist.as_deref())?;
            println!(
                "{} | {title} -- {}",
                if removed { "removed" } else { "not found" },
                args.artist.as_deref().unwrap_or("any artist")
            );
        }
        (None, None) => {
            return Err("nothing to remove: pass --file or --title".into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_list_splitting() {
        assert_eq!(
            split_ignore(Some("Live Sets; bootlegs ;;".to_string())),
            vec!["Live Sets".to_string(), "bootlegs".to_string()]
        );
        assert!(split_ignore(None).is_empty());
    }
}
