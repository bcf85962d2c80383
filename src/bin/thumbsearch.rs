use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use thumbsearch::{
    plan_ingestion, search, Catalog, ClipHttpEmbedder, Cli, HttpThumbnailFetcher,
    IngestCoordinator, IngestSelection, LocalVectorIndex, SearchHit, SearchRequest,
    SqliteCatalog,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let catalog = SqliteCatalog::open(&cli.catalog)
        .with_context(|| format!("failed to open catalog {:?}", cli.catalog))?;
    let index = LocalVectorIndex::open(&cli.index_dir, &cli.collection)
        .with_context(|| format!("failed to open vector index in {:?}", cli.index_dir))?;
    let embedder = ClipHttpEmbedder::new(
        &cli.embed_url,
        cli.embed_dimensions,
        cli.embed_timeout(),
        cli.embed_max_retries,
    )
    .context("failed to build embedding client")?;

    if let Some(path) = &cli.import {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let (inserted, present) = catalog
            .import_jsonl(BufReader::new(file))
            .with_context(|| format!("failed to import catalog entries from {:?}", path))?;
        info!(inserted, already_present = present, "catalog import complete");
    }

    let selection = if cli.refetch {
        Some(IngestSelection::All)
    } else if cli.reconcile {
        Some(IngestSelection::Missing)
    } else {
        None
    };
    if let Some(selection) = selection {
        let records = catalog
            .list_by_channel(&cli.channel)
            .with_context(|| format!("failed to read catalog for channel {}", cli.channel))?;
        if records.is_empty() {
            warn!(channel = %cli.channel, "no videos found for channel");
        }
        let batch = plan_ingestion(records, &index, selection)
            .context("failed to compare catalog against vector index")?;
        let fetcher = HttpThumbnailFetcher::new(cli.fetch_timeout())
            .context("failed to build thumbnail HTTP client")?;
        let coordinator =
            IngestCoordinator::new(&fetcher, &embedder, &index, cli.build_controls());
        let report = coordinator.run(batch);
        if !report.failures.is_empty() {
            warn!(
                failed = report.failures.len(),
                "some thumbnails were not embedded; rerun with --reconcile to retry them"
            );
        }
        index.compact().context("failed to compact vector index")?;
    }

    let Some(query) = &cli.search_query else {
        return Ok(());
    };
    let request = SearchRequest {
        query: query.clone(),
        channel_name: cli.channel.clone(),
        k: cli.n_results,
    };
    let hits = search(&embedder, &index, &request).context("search failed")?;
    if hits.is_empty() {
        println!("No thumbnails indexed for channel '{}'.", cli.channel);
    }
    print_hits(&hits);
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!("-------- Video {i}");
        println!("Video Title: {}", hit.metadata.video_title);
        println!("Video Url: {}", hit.watch_url());
        println!("Similarity: {:.4}", hit.score);
        println!("--------\n");
    }
}
