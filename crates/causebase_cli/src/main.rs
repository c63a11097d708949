//! Command-line front end for a failure-cause catalog.
//!
//! Reads a settings file to select the backend, starts a registry over it
//! and runs one editing or migration command. Records are printed as JSON.

use anyhow::{bail, Context, Result};
use causebase_core::{
    init_logging, load_settings, save_settings, CatalogRegistry, CatalogSettings, CauseId,
    CauseRecord, CauseService, Indication, LogLevel, ReconfigureOutcome,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "causebase")]
#[command(about = "Inspect, edit and migrate a catalog of known build-failure causes")]
#[command(version)]
struct Cli {
    /// Settings file selecting the catalog backend; defaults to an
    /// in-memory catalog when omitted.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the compiled-in backend types.
    Backends,
    /// List cause ids and names.
    List,
    /// Print one cause as JSON.
    Show { id: String },
    /// Add a new cause.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// May be repeated.
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Single-line build log pattern; may be repeated.
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Whole-log pattern; may be repeated.
        #[arg(long = "multiline-pattern")]
        multiline_patterns: Vec<String>,
    },
    /// Remove one cause.
    Remove { id: String },
    /// List all categories in use.
    Categories,
    /// Copy the catalog into the backend described by another settings file.
    Migrate {
        /// Settings file describing the destination backend.
        #[arg(long)]
        to: PathBuf,
        /// Write the destination backend into `--settings` afterwards.
        #[arg(long)]
        write_settings: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("causebase: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => CatalogSettings::default(),
    };
    start_logging(&settings)?;

    let registry = CatalogRegistry::new(
        causebase_core::BackendFactory::with_builtin(),
        settings.knowledge_base.clone(),
    );
    if !matches!(cli.command, Command::Backends) {
        registry.start().context("starting catalog backend")?;
    }
    let service = CauseService::new(&registry);

    match cli.command {
        Command::Backends => {
            for descriptor in registry.factory().descriptors() {
                println!("{}\t{}", descriptor.type_id, descriptor.display_name);
            }
        }
        Command::List => {
            for name in service.list_names()? {
                println!("{}\t{}", name.id, name.name);
            }
        }
        Command::Show { id } => {
            let record = service.get(&parse_id(&id)?)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Add {
            name,
            description,
            categories,
            patterns,
            multiline_patterns,
        } => {
            let mut record = CauseRecord::new(name).with_description(description);
            record.categories = categories;
            record.indications = patterns
                .into_iter()
                .map(Indication::build_log)
                .chain(multiline_patterns.into_iter().map(Indication::multiline))
                .collect();
            let stored = service.add(&record)?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Command::Remove { id } => {
            let removed = service.remove(&parse_id(&id)?)?;
            println!("removed {}", removed.name);
        }
        Command::Categories => {
            for category in service.categories()? {
                println!("{category}");
            }
        }
        Command::Migrate { to, write_settings } => {
            let target = load_settings(&to)?;
            let outcome = registry
                .reconfigure(&target.knowledge_base)
                .context("switching catalog backend")?;
            match outcome {
                ReconfigureOutcome::Replaced => {
                    println!("same storage; configuration replaced without migration")
                }
                ReconfigureOutcome::Migrated(report) => {
                    println!("migrated {} cause(s)", report.copied.len())
                }
            }

            if write_settings {
                let Some(path) = &cli.settings else {
                    bail!("--write-settings requires --settings");
                };
                let updated = CatalogSettings {
                    knowledge_base: registry.config()?,
                    ..settings
                };
                save_settings(path, &updated)?;
            }
        }
    }
    Ok(())
}

fn start_logging(settings: &CatalogSettings) -> Result<()> {
    let Some(log_dir) = &settings.log_dir else {
        return Ok(());
    };
    let level = match &settings.log_level {
        Some(level) => level.parse::<LogLevel>()?,
        None => LogLevel::default_for_build(),
    };
    init_logging(level, log_dir)?;
    log::info!("event=cli_start module=cli status=ok version={}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn parse_id(value: &str) -> Result<CauseId> {
    CauseId::new(value).with_context(|| format!("invalid cause id `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn add_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "causebase",
            "add",
            "--name",
            "OOM",
            "--category",
            "infra",
            "--category",
            "jvm",
            "--pattern",
            "OutOfMemoryError",
        ])
        .unwrap();

        match cli.command {
            Command::Add {
                name,
                description,
                categories,
                patterns,
                multiline_patterns,
            } => {
                assert_eq!(name, "OOM");
                assert!(description.is_empty());
                assert_eq!(categories, vec!["infra", "jvm"]);
                assert_eq!(patterns, vec!["OutOfMemoryError"]);
                assert!(multiline_patterns.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn settings_flag_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["causebase", "list", "--settings", "kb.json"]).unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("kb.json")));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn migrate_requires_a_destination() {
        assert!(Cli::try_parse_from(["causebase", "migrate"]).is_err());
    }
}
