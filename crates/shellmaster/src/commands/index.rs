//! sm index - build or inspect the knowledge corpus

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use shellmaster_common::knowledge::{build_corpus, embedder_from_config, read_pairs, CorpusFile};
use shellmaster_common::ShellmasterConfig;

use super::Report;
use crate::display::Ui;

pub struct BuildArgs<'a> {
    pub nl: &'a Path,
    pub cm: &'a Path,
    pub out: Option<&'a Path>,
    pub batch_size: usize,
    pub embedding: Option<&'a str>,
}

pub async fn build(args: BuildArgs<'_>, config: &ShellmasterConfig, ui: &Ui) -> Result<Report> {
    let mut config = config.clone();
    if let Some(kind) = args.embedding {
        config
            .set("embedding.kind", kind)
            .context("Unknown embedding backend (expected http or hash)")?;
    }
    let out = args.out.unwrap_or(config.retrieval.corpus_path.as_path()).to_path_buf();

    let pairs = read_pairs(args.nl, args.cm).context("Failed to read description/command pairs")?;
    let embedder = embedder_from_config(&config).context("Failed to set up the embedder")?;
    eprintln!(
        "Embedding {} pairs with {} ({})",
        pairs.len(),
        embedder.model_id(),
        config.embedding.kind.as_str()
    );

    let bar = progress_bar(ui, pairs.len() as u64);
    let corpus = build_corpus(pairs, embedder.as_ref(), args.batch_size, |done, _| {
        bar.set_position(done as u64)
    })
    .await;
    bar.finish_and_clear();
    let corpus = corpus.context("Failed to build corpus")?;

    corpus
        .write(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Wrote {} entries (dimension {}, build {}) to {}",
        corpus.entries.len(),
        corpus.dimension,
        corpus.build_id,
        out.display()
    );
    Ok(Report::success("built"))
}

pub fn info(file: Option<&Path>, config: &ShellmasterConfig) -> Result<Report> {
    let path = file.unwrap_or(config.retrieval.corpus_path.as_path());
    let corpus = CorpusFile::read(path).with_context(|| format!("Failed to load {}", path.display()))?;

    println!("Corpus:    {}", path.display());
    println!("Format:    {} v{}", corpus.format, corpus.version);
    println!("Build:     {}", corpus.build_id);
    println!("Created:   {}", corpus.created_at.to_rfc3339());
    println!("Model:     {}", corpus.embedding_model);
    println!("Dimension: {}", corpus.dimension);
    println!("Entries:   {}", corpus.entries.len());
    println!("Checksum:  {} (verified)", corpus.checksum);
    Ok(Report::success("info"))
}

fn progress_bar(ui: &Ui, total: u64) -> ProgressBar {
    if !ui.is_interactive() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    bar
}
