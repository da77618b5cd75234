use anyhow::Result;
use clap::Parser as ClapParser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use codegraph::cli::Args;
use codegraph::config::IndexerConfig;
use codegraph::orchestrator::{run_index, CancelFlag, IndexOptions};
use codegraph::version;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let repo_root = args.repo_root.canonicalize().unwrap_or(args.repo_root);
    let config = IndexerConfig::discover(args.config.as_deref(), &repo_root)?;

    // Roots from the config file only apply where the CLI did not name any.
    let migration_roots = if args.migration_roots.is_empty() {
        resolve_all(&repo_root, &config.ef_migration_roots)
    } else {
        resolve_roots(&repo_root, args.migration_roots)
    };
    let inline_sql_roots = if args.inline_sql_roots.is_empty() {
        resolve_all(&repo_root, &config.inline_sql_roots)
    } else {
        resolve_roots(&repo_root, args.inline_sql_roots)
    };

    let options = IndexOptions {
        sql_root: args.sql_root.map(|p| resolve(&repo_root, p)),
        code_roots: resolve_roots(&repo_root, args.code_roots),
        migration_roots,
        inline_sql_roots,
        output_dir: args.output,
        config,
        repo_root,
    };

    let summary = run_index(&options, &CancelFlag::default())?;
    println!(
        "{}: {} nodes, {} edges, {} docs -> {}",
        version::get_version_info(),
        summary.nodes,
        summary.edges,
        summary.docs,
        options.output_dir.display()
    );
    Ok(())
}

fn resolve(repo_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        repo_root.join(path)
    }
}

fn resolve_roots(repo_root: &Path, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.into_iter().map(|p| resolve(repo_root, p)).collect()
}

fn resolve_all(repo_root: &Path, paths: &[String]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| resolve(repo_root, PathBuf::from(p)))
        .collect()
}
