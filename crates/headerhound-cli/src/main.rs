//! HeaderHound CLI
//!
//! Command-line interface for dependency discovery and magic build-flag
//! extraction.

use anyhow::Result;
use clap::{Parser, Subcommand};
use headerhound_core::{files, Config, StrategyKind};
use headerhound_deps::{HeaderDeps, Hunter, MagicExtractor};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "headerhound")]
#[command(author, version, about = "C/C++ dependency and build-flag discovery", long_about = None)]
struct Cli {
    /// Compiler used for macro queries (and preprocessing, unless
    /// --preprocessor overrides it)
    #[arg(long, default_value = "g++", global = true)]
    compiler: String,

    /// Preprocessor command, e.g. "g++ -E"
    #[arg(long, global = true)]
    preprocessor: Option<String>,

    /// Preprocessor flags (-I, -D, -isystem ...)
    #[arg(long, default_value = "", global = true)]
    cppflags: String,

    /// C compile flags
    #[arg(long, default_value = "", global = true)]
    cflags: String,

    /// C++ compile flags
    #[arg(long, default_value = "", global = true)]
    cxxflags: String,

    /// Dependency strategy (direct, cpp)
    #[arg(long, default_value = "direct", global = true)]
    strategy: StrategyKind,

    /// Per-file read bound in bytes; 0 reads entire files
    #[arg(long, default_value_t = 0, global = true)]
    max_read_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the headers a file transitively depends on
    Deps {
        /// Source or header file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the resolved include hierarchy as a tree
    Tree {
        /// Source or header file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Extract //#KEY=value magic flags
    Magic {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output style (pretty, plain, json)
        #[arg(short, long, default_value = "pretty")]
        style: String,
    },

    /// List every source file a translation unit pulls into the build
    Sources {
        /// Root source file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Hunt all translation units below a directory
    Scan {
        /// Directory to walk
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config {
        compiler: cli.compiler.clone(),
        preprocessor: cli.preprocessor.clone(),
        cppflags: cli.cppflags.clone(),
        cflags: cli.cflags.clone(),
        cxxflags: cli.cxxflags.clone(),
        max_read_size: cli.max_read_size,
        header_deps: cli.strategy,
        magic: cli.strategy,
    };

    match cli.command {
        Commands::Deps { file, format } => cmd_deps(&config, &file, &format),
        Commands::Tree { file, format } => cmd_tree(&config, &file, &format),
        Commands::Magic { file, style } => cmd_magic(&config, &file, &style),
        Commands::Sources { file } => cmd_sources(&config, &file),
        Commands::Scan { dir } => cmd_scan(&config, &dir),
    }
}

fn cmd_deps(config: &Config, file: &Path, format: &str) -> Result<()> {
    let deps = HeaderDeps::new(config).process(file)?;

    if format == "json" {
        let result = serde_json::json!({
            "file": file.to_string_lossy(),
            "strategy": config.header_deps.to_string(),
            "dependencies": deps,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for dep in deps {
            println!("{}", dep.display());
        }
    }

    Ok(())
}

fn cmd_tree(config: &Config, file: &Path, format: &str) -> Result<()> {
    let tree = HeaderDeps::new(config).include_tree(file)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print!("{}", tree.render());
    }

    Ok(())
}

fn cmd_magic(config: &Config, file: &Path, style: &str) -> Result<()> {
    let resolver = HeaderDeps::new(config);
    let flags = MagicExtractor::new(config).parse(file, &resolver)?;

    match style {
        "json" => println!("{}", serde_json::to_string_pretty(&flags)?),
        "plain" => {
            // One value per line, shell-consumable: KEY=value
            for key in flags.keys() {
                for value in flags.get(key) {
                    println!("{}={}", key, value);
                }
            }
        }
        _ => {
            if flags.is_empty() {
                println!("No magic flags in {}", file.display());
                return Ok(());
            }
            println!("Magic flags for {}:", file.display());
            for key in flags.keys() {
                println!("  {}:", key);
                for value in flags.get(key) {
                    println!("    {}", value);
                }
            }
        }
    }

    Ok(())
}

fn cmd_sources(config: &Config, file: &Path) -> Result<()> {
    let hunter = Hunter::new(config);
    for source in hunter.required_source_files(file)? {
        println!("{}", source.display());
    }
    Ok(())
}

fn cmd_scan(config: &Config, dir: &Path) -> Result<()> {
    let hunter = Hunter::new(config);
    let mut units = 0usize;

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !files::is_source(path) {
            continue;
        }

        units += 1;
        println!("{}:", path.display());
        match hunter.required_source_files(path) {
            Ok(sources) => {
                for source in sources {
                    println!("  {}", source.display());
                }
            }
            Err(e) => {
                tracing::warn!("skipping {}: {}", path.display(), e);
                println!("  (error: {})", e);
            }
        }
    }

    println!("\nScanned {} translation units", units);
    Ok(())
}
