use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use fstore_db::{ls, pack, unpack, validate, Store, StoreError, UnpackMode, UnpackOptions};

/// Work with single-file stores of digital forensic artifacts.
#[derive(Debug, Parser)]
#[clap(name = "forensicstore", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Create an empty store.
    Create { file: PathBuf },

    /// Read and write elements.
    #[clap(subcommand)]
    Element(ElementCommand),

    /// Check schema conformance and evidence integrity.
    Validate {
        /// Print flaws but exit successfully anyway.
        #[clap(long)]
        no_fail: bool,
        file: PathBuf,
    },

    /// Import host files or directories as evidence.
    Pack {
        file: PathBuf,
        #[clap(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Export evidence files into the current directory.
    Unpack {
        #[clap(long, value_enum, default_value = "folder")]
        mode: ModeArg,
        /// Place files under a directory named after their artifact.
        #[clap(long)]
        prefix_artifact: bool,
        /// Shell-glob filter over archive paths.
        #[clap(long = "match")]
        pattern: Option<String>,
        file: PathBuf,
    },

    /// List evidence files.
    Ls {
        /// Shell-glob filter over archive paths.
        #[clap(long = "match")]
        pattern: Option<String>,
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum ElementCommand {
    /// Insert a JSON element and print its id.
    Insert { json: String, file: PathBuf },

    /// Print one element by id.
    Get { id: String, file: PathBuf },

    /// Print elements matching `field=value` conditions followed by the
    /// store file. Arguments are ORed; comma-separated pairs within one
    /// argument are ANDed.
    Select {
        #[clap(required = true)]
        args: Vec<String>,
    },

    /// Print every element.
    All { file: PathBuf },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Folder,
    Compact,
    Basename,
}

impl From<ModeArg> for UnpackMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Folder => UnpackMode::Folder,
            ModeArg::Compact => UnpackMode::Compact,
            ModeArg::Basename => UnpackMode::Basename,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode, StoreError> {
    match command {
        Command::Create { file } => {
            Store::create(&file)?.close()?;
        }
        Command::Element(command) => return run_element(command),
        Command::Validate { no_fail, file } => {
            let store = Store::open(&file)?;
            let flaws = validate(&store)?;
            for flaw in &flaws {
                println!("{flaw}");
            }
            if !flaws.is_empty() && !no_fail {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Pack { file, paths } => {
            let store = Store::open(&file)?;
            let mut files = 0;
            let mut bytes = 0;
            for path in &paths {
                let report = pack(&store, path)?;
                files += report.files;
                bytes += report.bytes;
            }
            store.close()?;
            println!("packed {files} files ({bytes} bytes)");
        }
        Command::Unpack {
            mode,
            prefix_artifact,
            pattern,
            file,
        } => {
            let store = Store::open(&file)?;
            let options = UnpackOptions {
                mode: mode.into(),
                prefix_artifact,
                pattern,
            };
            let dest = std::env::current_dir()?;
            let count = unpack(&store, &dest, &options)?;
            println!("unpacked {count} files");
        }
        Command::Ls { pattern, file } => {
            let store = Store::open(&file)?;
            for name in ls(&store, pattern.as_deref())? {
                println!("{name}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_element(command: ElementCommand) -> Result<ExitCode, StoreError> {
    match command {
        ElementCommand::Insert { json, file } => {
            let element: Value = serde_json::from_str(&json)?;
            let store = Store::open(&file)?;
            let id = store.insert(element)?;
            store.close()?;
            println!("{id}");
        }
        ElementCommand::Get { id, file } => {
            let store = Store::open(&file)?;
            let element = store.get(&id)?;
            println!("{}", serde_json::to_string(&element)?);
        }
        ElementCommand::Select { args } => {
            // The store file is the trailing argument, as with the other
            // element subcommands.
            let (file, conditions) = args.split_last().expect("clap enforces at least one arg");
            let store = Store::open(PathBuf::from(file))?;
            for element in store.select(&parse_conditions(conditions))? {
                println!("{}", serde_json::to_string(&element)?);
            }
        }
        ElementCommand::All { file } => {
            let store = Store::open(&file)?;
            for element in store.all()? {
                println!("{}", serde_json::to_string(&element)?);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// `type=process,name=sshd` → one AND group; separate arguments are ORed.
fn parse_conditions(args: &[String]) -> Vec<HashMap<String, String>> {
    args.iter()
        .map(|arg| {
            arg.split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_parsing() {
        let groups = parse_conditions(&[
            "type=process,name=sshd".to_string(),
            "type=file".to_string(),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["type"], "process");
        assert_eq!(groups[0]["name"], "sshd");
        assert_eq!(groups[1]["type"], "file");
    }

    #[test]
    fn cli_parses_all_subcommands() {
        for args in [
            vec!["forensicstore", "create", "t.forensicstore"],
            vec!["forensicstore", "element", "insert", "{}", "t.forensicstore"],
            vec!["forensicstore", "element", "get", "file--1", "t.forensicstore"],
            vec![
                "forensicstore",
                "element",
                "select",
                "type=file",
                "t.forensicstore",
            ],
            vec!["forensicstore", "element", "all", "t.forensicstore"],
            vec!["forensicstore", "validate", "--no-fail", "t.forensicstore"],
            vec!["forensicstore", "pack", "t.forensicstore", "evidence/"],
            vec![
                "forensicstore",
                "unpack",
                "--mode",
                "compact",
                "--prefix-artifact",
                "--match",
                "*.log",
                "t.forensicstore",
            ],
            vec!["forensicstore", "ls", "--match", "*.txt", "t.forensicstore"],
        ] {
            Cli::try_parse_from(args.iter().copied()).unwrap_or_else(|e| panic!("{args:?}: {e}"));
        }
    }
}
