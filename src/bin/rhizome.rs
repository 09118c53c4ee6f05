//! Rhizome CLI — knowledge bases, link-graph queries, and cell execution.
//!
//! Usage:
//!   rhizome base <create|list|delete> ...
//!   rhizome graph <base> <backlinks|orphans|hubs|broken|tags|tagged> ...
//!   rhizome run <base> <file|cell|list|strip> ...

use clap::{Parser, Subcommand};
use rhizome::{
    CellId, FsStore, GraphEngine, ProcessLauncher, RhizomeApi, RunOptions, SessionManager,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "rhizome",
    version,
    about = "Knowledge base engine with an incremental link graph and executable notebook cells"
)]
struct Cli {
    /// Root directory holding knowledge bases (defaults to the user data dir)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Emit query results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage knowledge bases
    Base {
        #[command(subcommand)]
        action: BaseAction,
    },
    /// Index a knowledge base and query its link graph
    Graph {
        /// Knowledge base name
        base: String,
        #[command(subcommand)]
        query: GraphQuery,
    },
    /// Execute code cells and persist their output
    Run {
        /// Knowledge base name
        base: String,
        #[command(subcommand)]
        action: RunAction,
    },
}

#[derive(Subcommand)]
enum BaseAction {
    /// Create a new knowledge base with a seed index document
    Create { name: String },
    /// List knowledge bases
    List,
    /// Delete a knowledge base and all its documents
    Delete { name: String },
}

#[derive(Subcommand)]
enum GraphQuery {
    /// Documents linking to the given title
    Backlinks { title: String },
    /// Documents with no incoming links
    Orphans,
    /// Most connected documents by combined degree
    Hubs {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Links whose target matches no document
    Broken,
    /// All tags with document counts
    Tags,
    /// Documents carrying the given tag
    Tagged { tag: String },
}

#[derive(Subcommand)]
enum RunAction {
    /// Execute every cell in a document
    File {
        /// Document path, relative to the base directory
        doc: PathBuf,
        #[arg(long, default_value = "default")]
        session: String,
        /// Per-cell timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Execute a single cell by identity (e.g. python_0)
    Cell {
        doc: PathBuf,
        cell_id: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// List the cells of a document
    List { doc: PathBuf },
    /// Remove all persisted output regions from a document
    Strip { doc: PathBuf },
}

/// Root directory for knowledge bases (~/.local/share/rhizome on Linux).
fn default_root() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("rhizome")
}

fn build_api() -> RhizomeApi {
    let launcher = Arc::new(ProcessLauncher::new());
    RhizomeApi::new(
        Arc::new(GraphEngine::new()),
        Arc::new(SessionManager::new(launcher)),
        Arc::new(FsStore::new()),
    )
}

/// Relative paths of all markdown files under a base directory, sorted.
fn discover(root: &Path) -> Vec<String> {
    let mut paths: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().to_string())
        })
        .collect();
    paths.sort();
    paths
}

const SEED_INDEX: &str = "# {name}\n\nWelcome to the **{name}** knowledge base.\n\n\
## Getting started\n\n\
- Link notes with double brackets: [[My First Note]]\n\
- Tag anything for retrieval: #idea #todo\n\
- Add executable cells and run them with `rhizome run`:\n\n\
```python\nprint(\"hello\")\n```\n";

fn cmd_base_create(root: &Path, name: &str) -> i32 {
    let base_dir = root.join(name);
    if base_dir.exists() {
        eprintln!("Error: knowledge base '{}' already exists", name);
        return 1;
    }
    if let Err(e) = std::fs::create_dir_all(&base_dir) {
        eprintln!("Error: cannot create '{}': {}", base_dir.display(), e);
        return 1;
    }
    let index = SEED_INDEX.replace("{name}", name);
    if let Err(e) = std::fs::write(base_dir.join("index.md"), index) {
        eprintln!("Error: cannot seed index.md: {}", e);
        return 1;
    }
    println!("Created knowledge base '{}' at {}", name, base_dir.display());
    0
}

fn cmd_base_list(root: &Path) -> i32 {
    let mut names: Vec<String> = match std::fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| !n.starts_with('.'))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    if names.is_empty() {
        println!("No knowledge bases under {}.", root.display());
        return 0;
    }
    println!("{:<24}  {:>9}", "NAME", "DOCUMENTS");
    println!("{}", "-".repeat(35));
    for name in names {
        let docs = discover(&root.join(&name)).len();
        println!("{:<24}  {:>9}", name, docs);
    }
    0
}

fn cmd_base_delete(root: &Path, name: &str) -> i32 {
    let base_dir = root.join(name);
    if !base_dir.exists() {
        eprintln!("Error: knowledge base '{}' not found", name);
        return 1;
    }
    match std::fs::remove_dir_all(&base_dir) {
        Ok(()) => {
            println!("Deleted knowledge base '{}'", name);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Discover and index a base's documents, failing loudly if the base
/// directory does not exist.
async fn index_base(api: &RhizomeApi, root: &Path, base: &str) -> Result<(), String> {
    let base_dir = root.join(base);
    if !base_dir.is_dir() {
        return Err(format!("knowledge base '{}' not found", base));
    }
    api.base_create(base).map_err(|e| e.to_string())?;
    let paths = discover(&base_dir);
    api.index_documents(base, &base_dir, paths)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{}", s);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_titles(titles: &[String], empty_note: &str) -> i32 {
    if titles.is_empty() {
        println!("{}", empty_note);
    }
    for title in titles {
        println!("{}", title);
    }
    0
}

async fn cmd_graph(api: &RhizomeApi, root: &Path, base: &str, query: GraphQuery, json: bool) -> i32 {
    if let Err(e) = index_base(api, root, base).await {
        eprintln!("Error: {}", e);
        return 1;
    }
    match query {
        GraphQuery::Backlinks { title } => match api.backlinks(base, &title) {
            Ok(titles) if json => print_json(&titles),
            Ok(titles) => print_titles(&titles, "No backlinks."),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        GraphQuery::Orphans => match api.orphans(base) {
            Ok(titles) if json => print_json(&titles),
            Ok(titles) => print_titles(&titles, "No orphaned documents."),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        GraphQuery::Hubs { top } => match api.hubs(base, top) {
            Ok(hubs) if json => print_json(&hubs),
            Ok(hubs) => {
                println!("{:<40}  {:>6}", "TITLE", "DEGREE");
                println!("{}", "-".repeat(48));
                for hub in hubs {
                    println!("{:<40}  {:>6}", hub.title, hub.degree);
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        GraphQuery::Broken => match api.broken_links(base) {
            Ok(broken) if json => print_json(&broken),
            Ok(broken) => {
                if broken.is_empty() {
                    println!("No broken links.");
                }
                for link in broken {
                    println!("{} -> {}", link.source, link.target);
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        GraphQuery::Tags => match api.tags(base) {
            Ok(tags) if json => print_json(&tags),
            Ok(tags) => {
                println!("{:<24}  {:>5}", "TAG", "DOCS");
                println!("{}", "-".repeat(31));
                for (tag, count) in tags {
                    println!("{:<24}  {:>5}", tag, count);
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        GraphQuery::Tagged { tag } => match api.tagged(base, &tag) {
            Ok(titles) if json => print_json(&titles),
            Ok(titles) => print_titles(&titles, "No documents with that tag."),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    }
}

fn print_result(result: &rhizome::CellResult) {
    println!("--- {} [{:?}] ---", result.cell, result.status);
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
}

async fn cmd_run(api: &RhizomeApi, root: &Path, base: &str, action: RunAction, json: bool) -> i32 {
    let base_dir = root.join(base);
    let code = match action {
        RunAction::File {
            doc,
            session,
            timeout,
        } => {
            let opts = RunOptions::default()
                .with_session(session)
                .with_timeout(Duration::from_secs(timeout));
            match api.run_document(base, &base_dir.join(&doc), &opts).await {
                Ok(results) if json => print_json(&results),
                Ok(results) => {
                    for result in &results {
                        print_result(result);
                    }
                    println!("Executed {} cell(s) in {}", results.len(), doc.display());
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        RunAction::Cell {
            doc,
            cell_id,
            session,
            timeout,
        } => {
            let opts = RunOptions::default()
                .with_session(session)
                .with_timeout(Duration::from_secs(timeout));
            let cell = CellId::from(cell_id.as_str());
            match api.run_cell(base, &base_dir.join(&doc), &cell, &opts).await {
                Ok(result) if json => print_json(&result),
                Ok(result) => {
                    print_result(&result);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        RunAction::List { doc } => match api.list_cells(&base_dir.join(&doc)).await {
            Ok(cells) if json => print_json(&cells),
            Ok(cells) => {
                println!("{:<16}  {:<12}  {:<6}", "CELL", "LANGUAGE", "OUTPUT");
                println!("{}", "-".repeat(38));
                for cell in cells {
                    println!(
                        "{:<16}  {:<12}  {:<6}",
                        cell.id.to_string(),
                        cell.language,
                        if cell.has_output { "yes" } else { "no" }
                    );
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        RunAction::Strip { doc } => match api.strip_document(&base_dir.join(&doc)).await {
            Ok(()) => {
                println!("Stripped outputs from {}", doc.display());
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    };
    api.close_all_sessions();
    code
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(default_root);

    let code = match cli.command {
        Commands::Base { action } => match action {
            BaseAction::Create { name } => cmd_base_create(&root, &name),
            BaseAction::List => cmd_base_list(&root),
            BaseAction::Delete { name } => cmd_base_delete(&root, &name),
        },
        Commands::Graph { base, query } => {
            let api = build_api();
            cmd_graph(&api, &root, &base, query, cli.json).await
        }
        Commands::Run { base, action } => {
            let api = build_api();
            cmd_run(&api, &root, &base, action, cli.json).await
        }
    };
    std::process::exit(code);
}
