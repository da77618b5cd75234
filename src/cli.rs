use clap::Parser as ClapParser;
use std::path::PathBuf;

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Fully local, cross-domain knowledge graph indexer for C#/EF and T-SQL codebases", long_about = None)]
pub struct Args {
    /// Repository root to index
    #[arg(value_name = "REPO_ROOT", default_value = ".")]
    pub repo_root: PathBuf,

    /// Folder containing *.sql sources (relative to the repo root or absolute)
    #[arg(long = "sql-root")]
    pub sql_root: Option<PathBuf>,

    /// Folder containing C# sources; repeat for multiple roots
    #[arg(long = "code-root")]
    pub code_roots: Vec<PathBuf>,

    /// Folder to scan for migration classes (defaults to the code roots)
    #[arg(long = "migration-root")]
    pub migration_roots: Vec<PathBuf>,

    /// Folder to scan for inline SQL literals (defaults to the code roots)
    #[arg(long = "inline-sql-root")]
    pub inline_sql_roots: Vec<PathBuf>,

    /// Directory receiving graph/, docs/ and manifest.json
    #[arg(short = 'o', long = "output", default_value = "codegraph-out")]
    pub output: PathBuf,

    /// JSON configuration file (defaults to codegraph.json in the repo root)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}
