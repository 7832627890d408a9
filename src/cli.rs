//! CLI argument parsing for cartograph
//!
//! Defines the Command enum and parse_args() for every subcommand. Parsing
//! only checks shape; config files are read later so a bad file is a
//! configuration failure rather than a usage error.

use cartograph::config::{ConfigError, IndexConfig};
use std::path::PathBuf;

pub fn print_usage() {
    eprintln!("cartograph - code graph extraction and incremental indexing");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  cartograph <command> [arguments]");
    eprintln!("  cartograph --help | --version");
    eprintln!();
    eprintln!("  cartograph index --root <DIR> [--db <FILE>] [--config <FILE>] [options]");
    eprintln!("  cartograph status --root <DIR> [--db <FILE>] [--config <FILE>] [--json]");
    eprintln!("  cartograph extract --root <DIR> [--config <FILE>] [options] [FILE]...");
    eprintln!("  cartograph ingest --db <FILE> --input <DOC.json> [--config <FILE>] [--batch-size <N>]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  index     Extract changed files and merge them into the graph store");
    eprintln!("  status    Show the last run, graph counts and summary progress");
    eprintln!("  extract   Print the extraction document as JSON without storing it");
    eprintln!("  ingest    Merge an extraction document into the graph store");
    eprintln!();
    eprintln!("Index and extract arguments:");
    eprintln!("  --root <DIR>             Project root");
    eprintln!("  --db <FILE>              Database path (default: <root>/.cartograph/graph.db)");
    eprintln!("  --config <FILE>          JSON config file; flags override its values");
    eprintln!("  --batch-size <N>         Nodes and relationships per write transaction (default: 1000)");
    eprintln!("  --jobs <N>               Extraction threads (default: 5)");
    eprintln!("  --include-variables      Emit Variable nodes");
    eprintln!("  --no-variables           Do not emit Variable nodes (default)");
    eprintln!("  --no-imports             Do not emit Import nodes");
    eprintln!("  --no-exports             Do not emit Export nodes");
    eprintln!("  --no-classes             Do not emit Class and Interface nodes");
    eprintln!("  --no-methods             Do not emit Method nodes");
    eprintln!("  --no-functions           Do not emit Function nodes");
    eprintln!("  --no-parameters          Do not emit Parameter nodes");
    eprintln!("  --no-external            Do not track external libraries");
    eprintln!("  --no-content             Do not store source text");
    eprintln!("  --ignore <DIR>           Directory name to skip (repeatable)");
    eprintln!("  --exclude <GLOB>         Root-relative glob to skip (repeatable)");
    eprintln!("  --force                  Re-extract files whose checksum is unchanged");
    eprintln!("  --parse-timeout-ms <N>   Per-file parse timeout (default: 10000)");
    eprintln!("  --store-timeout-ms <N>   Database busy timeout (default: 5000)");
    eprintln!("  --json                   Print the run report as JSON");
    eprintln!();
    eprintln!("Status and ingest also take --config and --store-timeout-ms; the store is");
    eprintln!("opened with the configured busy timeout and embedding dimensions.");
    eprintln!();
    eprintln!("Global arguments:");
    eprintln!("  --verbose                Debug logging");
    eprintln!("  --quiet                  Warnings and errors only");
    eprintln!();
    eprintln!("RUST_LOG overrides the log filter when neither flag is given.");
}

/// Usage error: exit code 2.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

fn usage(msg: impl Into<String>) -> UsageError {
    UsageError(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// No flag given; `RUST_LOG` or info
    Default,
    Verbose,
    Quiet,
}

/// Flags applied on top of the config file. `index` and `extract` take all of
/// them; `status` and `ingest` take the store-related subset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexArgs {
    pub root: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub jobs: Option<usize>,
    /// Extractor toggles in command-line order
    pub toggles: Vec<Toggle>,
    pub ignore: Vec<String>,
    pub exclude: Vec<String>,
    pub force: bool,
    pub parse_timeout_ms: Option<u64>,
    pub store_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Variables(bool),
    Imports,
    Exports,
    Classes,
    Methods,
    Functions,
    Parameters,
    External,
    Content,
}

impl Toggle {
    fn from_flag(flag: &str) -> Option<Self> {
        Some(match flag {
            "--include-variables" => Toggle::Variables(true),
            "--no-variables" => Toggle::Variables(false),
            "--no-imports" => Toggle::Imports,
            "--no-exports" => Toggle::Exports,
            "--no-classes" => Toggle::Classes,
            "--no-methods" => Toggle::Methods,
            "--no-functions" => Toggle::Functions,
            "--no-parameters" => Toggle::Parameters,
            "--no-external" => Toggle::External,
            "--no-content" => Toggle::Content,
            _ => return None,
        })
    }
}

impl IndexArgs {
    /// Build the run configuration: config file first, then flags.
    pub fn into_config(self) -> Result<IndexConfig, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => IndexConfig::from_file(path)?,
            None => IndexConfig::default(),
        };
        if let Some(root) = self.root {
            config.root = root;
        }
        if self.db.is_some() {
            config.db_path = self.db;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.jobs {
            config.jobs = n;
        }
        let ex = &mut config.extractor;
        for toggle in self.toggles {
            match toggle {
                Toggle::Variables(on) => ex.include_variables = on,
                Toggle::Imports => ex.include_imports = false,
                Toggle::Exports => ex.include_exports = false,
                Toggle::Classes => ex.include_classes = false,
                Toggle::Methods => ex.include_methods = false,
                Toggle::Functions => ex.include_functions = false,
                Toggle::Parameters => ex.include_parameters = false,
                Toggle::External => ex.track_external_libraries = false,
                Toggle::Content => ex.capture_content = false,
            }
        }
        for dir in self.ignore {
            if !config.ignore_dirs.contains(&dir) {
                config.ignore_dirs.push(dir);
            }
        }
        config.exclude.extend(self.exclude);
        config.force |= self.force;
        if let Some(ms) = self.parse_timeout_ms {
            config.parse_timeout_ms = ms;
        }
        if let Some(ms) = self.store_timeout_ms {
            config.store_timeout_ms = ms;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Index {
        args: IndexArgs,
        json: bool,
    },
    Status {
        args: IndexArgs,
        json: bool,
    },
    Extract {
        args: IndexArgs,
        files: Vec<String>,
    },
    Ingest {
        args: IndexArgs,
        input: PathBuf,
    },
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub command: Command,
    pub verbosity: Verbosity,
}

/// Cursor over the arguments after the command name.
struct Args {
    items: Vec<String>,
    pos: usize,
}

impl Args {
    fn next(&mut self) -> Option<String> {
        let item = self.items.get(self.pos).cloned();
        self.pos += 1;
        item
    }

    fn value(&mut self, flag: &str) -> Result<String, UsageError> {
        self.next()
            .ok_or_else(|| usage(format!("{} requires an argument", flag)))
    }

    fn number<T: std::str::FromStr>(&mut self, flag: &str) -> Result<T, UsageError> {
        let raw = self.value(flag)?;
        raw.parse()
            .map_err(|_| usage(format!("{} expects a number, got '{}'", flag, raw)))
    }
}

pub fn parse_args() -> Result<Invocation, UsageError> {
    parse_from(std::env::args().skip(1).collect())
}

/// Parse arguments without the program name.
pub fn parse_from(mut items: Vec<String>) -> Result<Invocation, UsageError> {
    let mut verbosity = Verbosity::Default;
    items.retain(|arg| match arg.as_str() {
        "--verbose" | "-v" => {
            verbosity = Verbosity::Verbose;
            false
        }
        "--quiet" | "-q" => {
            verbosity = Verbosity::Quiet;
            false
        }
        _ => true,
    });

    let Some(command) = items.first().cloned() else {
        return Err(usage("missing command"));
    };
    let mut args = Args { items, pos: 1 };

    let command = match command.as_str() {
        "--help" | "-h" | "help" => Command::Help,
        "--version" | "-V" => Command::Version,
        "index" => {
            let (args, json, files) = parse_index_args(&mut args)?;
            if let Some(extra) = files.first() {
                return Err(usage(format!("unexpected argument '{}'", extra)));
            }
            require_root(&args)?;
            Command::Index { args, json }
        }
        "extract" => {
            let (args, json, files) = parse_index_args(&mut args)?;
            if json {
                return Err(usage("extract always prints JSON; --json is not accepted"));
            }
            require_root(&args)?;
            Command::Extract { args, files }
        }
        "status" => parse_status(&mut args)?,
        "ingest" => parse_ingest(&mut args)?,
        other => return Err(usage(format!("unknown command '{}'", other))),
    };
    Ok(Invocation { command, verbosity })
}

fn require_root(args: &IndexArgs) -> Result<(), UsageError> {
    if args.root.is_none() && args.config_file.is_none() {
        return Err(usage("--root is required"));
    }
    Ok(())
}

fn parse_index_args(args: &mut Args) -> Result<(IndexArgs, bool, Vec<String>), UsageError> {
    let mut out = IndexArgs::default();
    let mut json = false;
    let mut files = Vec::new();

    while let Some(arg) = args.next() {
        if let Some(toggle) = Toggle::from_flag(&arg) {
            out.toggles.push(toggle);
            continue;
        }
        match arg.as_str() {
            "--root" => out.root = Some(PathBuf::from(args.value("--root")?)),
            "--db" => out.db = Some(PathBuf::from(args.value("--db")?)),
            "--config" => out.config_file = Some(PathBuf::from(args.value("--config")?)),
            "--batch-size" => out.batch_size = Some(args.number("--batch-size")?),
            "--jobs" => out.jobs = Some(args.number("--jobs")?),
            "--ignore" => out.ignore.push(args.value("--ignore")?),
            "--exclude" => out.exclude.push(args.value("--exclude")?),
            "--force" => out.force = true,
            "--parse-timeout-ms" => out.parse_timeout_ms = Some(args.number("--parse-timeout-ms")?),
            "--store-timeout-ms" => out.store_timeout_ms = Some(args.number("--store-timeout-ms")?),
            "--json" => json = true,
            flag if flag.starts_with('-') => {
                return Err(usage(format!("unknown argument '{}'", flag)))
            }
            _ => files.push(arg),
        }
    }
    Ok((out, json, files))
}

fn parse_status(args: &mut Args) -> Result<Command, UsageError> {
    let mut out = IndexArgs::default();
    let mut json = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--root" => out.root = Some(PathBuf::from(args.value("--root")?)),
            "--db" => out.db = Some(PathBuf::from(args.value("--db")?)),
            "--config" => out.config_file = Some(PathBuf::from(args.value("--config")?)),
            "--store-timeout-ms" => out.store_timeout_ms = Some(args.number("--store-timeout-ms")?),
            "--json" => json = true,
            other => return Err(usage(format!("unknown argument '{}'", other))),
        }
    }
    require_root(&out)?;
    Ok(Command::Status { args: out, json })
}

fn parse_ingest(args: &mut Args) -> Result<Command, UsageError> {
    let mut out = IndexArgs::default();
    let mut input = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => out.db = Some(PathBuf::from(args.value("--db")?)),
            "--input" => input = Some(PathBuf::from(args.value("--input")?)),
            "--config" => out.config_file = Some(PathBuf::from(args.value("--config")?)),
            "--batch-size" => out.batch_size = Some(args.number("--batch-size")?),
            "--store-timeout-ms" => out.store_timeout_ms = Some(args.number("--store-timeout-ms")?),
            other => return Err(usage(format!("unknown argument '{}'", other))),
        }
    }
    if out.batch_size == Some(0) {
        return Err(usage("--batch-size must be greater than zero"));
    }
    if out.db.is_none() {
        return Err(usage("--db is required"));
    }
    Ok(Command::Ingest {
        args: out,
        input: input.ok_or_else(|| usage("--input is required"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, UsageError> {
        parse_from(args.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_index_flags_override_defaults() {
        let inv = parse(&[
            "index",
            "--root",
            "/project",
            "--batch-size",
            "50",
            "--include-variables",
            "--no-imports",
            "--no-content",
            "--ignore",
            "vendor",
            "--exclude",
            "tests/**",
            "--force",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(inv.verbosity, Verbosity::Verbose);

        let Command::Index { args, json } = inv.command else {
            panic!("expected index command");
        };
        assert!(!json);
        let config = args.into_config().unwrap();
        assert_eq!(config.root, PathBuf::from("/project"));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.jobs, 5);
        assert!(config.extractor.include_variables);
        assert!(!config.extractor.include_imports);
        assert!(!config.extractor.capture_content);
        assert!(config.extractor.include_classes);
        assert!(config.ignore_dirs.iter().any(|d| d == "vendor"));
        assert!(config.ignore_dirs.iter().any(|d| d == "node_modules"));
        assert_eq!(config.exclude, vec!["tests/**".to_string()]);
        assert!(config.force);
    }

    #[test]
    fn test_later_variable_toggle_wins() {
        let inv = parse(&["index", "--root", ".", "--include-variables", "--no-variables"]).unwrap();
        let Command::Index { args, .. } = inv.command else {
            panic!("expected index command");
        };
        assert!(!args.into_config().unwrap().extractor.include_variables);
    }

    #[test]
    fn test_usage_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["index"]).is_err());
        assert!(parse(&["index", "--root"]).is_err());
        assert!(parse(&["index", "--root", ".", "--jobs", "many"]).is_err());
        assert!(parse(&["index", "--root", ".", "--bogus"]).is_err());
        assert!(parse(&["status"]).is_err());
        assert!(parse(&["ingest", "--db", "g.db"]).is_err());
    }

    #[test]
    fn test_extract_collects_files() {
        let inv = parse(&["extract", "--root", ".", "a.py", "--quiet", "src/b.ts"]).unwrap();
        assert_eq!(inv.verbosity, Verbosity::Quiet);
        match inv.command {
            Command::Extract { files, .. } => assert_eq!(files, vec!["a.py", "src/b.ts"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ingest_and_status() {
        let inv = parse(&["ingest", "--db", "g.db", "--input", "doc.json", "--batch-size", "10"]).unwrap();
        let Command::Ingest { args, input } = inv.command else {
            panic!("expected ingest command");
        };
        assert_eq!(input, PathBuf::from("doc.json"));
        let config = args.into_config().unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("g.db")));
        assert_eq!(config.batch_size, 10);

        let inv = parse(&["status", "--root", ".", "--json"]).unwrap();
        let Command::Status { args, json } = inv.command else {
            panic!("expected status command");
        };
        assert!(json);
        assert_eq!(args.root, Some(PathBuf::from(".")));
        assert_eq!(args.db, None);
        assert!(parse(&["ingest", "--db", "g.db", "--input", "d.json", "--batch-size", "0"]).is_err());
    }

    #[test]
    fn test_store_settings_reach_status_and_ingest() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("cartograph.json");
        std::fs::write(&config_path, r#"{"embedding_dimensions": 3, "store_timeout_ms": 900}"#).unwrap();
        let config_arg = config_path.to_str().unwrap();

        let inv = parse(&["status", "--root", ".", "--config", config_arg, "--store-timeout-ms", "40"]).unwrap();
        let Command::Status { args, .. } = inv.command else {
            panic!("expected status command");
        };
        let options = args.into_config().unwrap().store_options();
        assert_eq!(options.embedding_dimensions, 3);
        assert_eq!(options.busy_timeout, std::time::Duration::from_millis(40));

        let inv = parse(&["ingest", "--db", "g.db", "--input", "d.json", "--config", config_arg]).unwrap();
        let Command::Ingest { args, .. } = inv.command else {
            panic!("expected ingest command");
        };
        let options = args.into_config().unwrap().store_options();
        assert_eq!(options.embedding_dimensions, 3);
        assert_eq!(options.busy_timeout, std::time::Duration::from_millis(900));
    }

    #[test]
    fn test_missing_config_file_is_not_a_usage_error() {
        let inv = parse(&["index", "--config", "/nonexistent/cartograph.json"]).unwrap();
        let Command::Index { args, .. } = inv.command else {
            panic!("expected index command");
        };
        assert!(matches!(args.into_config(), Err(ConfigError::Read { .. })));
    }
}
