use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::*;
use retrace::loader;
use retrace::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Reversible schema migrations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./retrace.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overriding the config file
    #[arg(long, global = true, env = "RETRACE_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Undo migrations that ran
    Backwards {
        /// App name, or "all"
        app_name: String,

        /// "1" for the latest migration, "all" for every migration, or an id
        /// to undo it and everything after it
        #[arg(default_value = "1")]
        migration_id: MigrationTarget,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Delete migration files once undone
        #[arg(long)]
        clean: bool,
    },

    /// Apply pending migrations
    Forwards {
        /// App name, or "all"
        app_name: String,

        /// Record migrations as ran without executing them
        #[arg(long)]
        fake: bool,
    },

    /// Show ran and pending migrations
    Check {
        /// App name (defaults to every app)
        app_name: Option<String>,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the SQL a migration would run
    Show {
        app_name: String,
        migration_id: String,

        /// Show the backward run instead of the forward one
        #[arg(long)]
        backward: bool,
    },

    /// Create an empty migration file
    New {
        app_name: String,
        name: String,
    },
}

/// Prompts on stdin.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        println!("{}", prompt.yellow());
        print!("[y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        input.trim().eq_ignore_ascii_case("y")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RETRACE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_refusal() => {
            eprintln!("{} {}", "✗".yellow(), e.to_string().yellow());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{} {}", "✗ Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> retrace::Result<()> {
    let (config, _) = Config::load(cli.config.as_deref())?;
    let url_override = cli.database_url.as_deref();

    match cli.command {
        Commands::New { app_name, name } => {
            let app = config.app(&app_name)?;
            let path = loader::new_migration_file(app, &name)?;
            println!("  {} {}", "✓ Created:".green(), path.display());
            Ok(())
        }
        Commands::Show {
            app_name,
            migration_id,
            backward,
        } => show(
            &config,
            &config.database_url(url_override)?,
            &app_name,
            &migration_id,
            backward,
        ),
        command => {
            let db = Database::connect(&config.database_url(url_override)?).await?;
            let migrator = Migrator::from_config(db, &config).with_confirm(StdinConfirm);
            let result = dispatch(&migrator, command).await;
            migrator.database().close().await;
            result
        }
    }
}

async fn dispatch(migrator: &Migrator, command: Commands) -> retrace::Result<()> {
    match command {
        Commands::Backwards {
            app_name,
            migration_id,
            yes,
            clean,
        } => {
            println!("{} {}", "Migrating BACKWARDS:".cyan().bold(), app_name.yellow());
            let outcomes = backwards(migrator, &app_name, migration_id, yes, clean).await?;
            for (app, outcome) in outcomes {
                match outcome {
                    BackwardsOutcome::NothingToReverse => {
                        println!("  {} {}", app.cyan(), "No migrations to reverse.".green());
                    }
                    BackwardsOutcome::Reversed(ids) => {
                        for id in &ids {
                            println!("  {} {} {}", "↩".cyan(), app.cyan(), id);
                        }
                        println!(
                            "{}",
                            format!("✓ {} migration(s) reversed for {}", ids.len(), app)
                                .green()
                                .bold()
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Forwards { app_name, fake } => {
            println!("{} {}", "Migrating FORWARDS:".cyan().bold(), app_name.yellow());
            for (app, outcome) in forwards(migrator, &app_name, fake).await? {
                match outcome {
                    ForwardsOutcome::NothingToApply => {
                        println!("  {} {}", app.cyan(), "No migrations to apply.".green());
                    }
                    ForwardsOutcome::Applied(ids) => {
                        for id in &ids {
                            println!("  {} {} {}", "→".cyan(), app.cyan(), id);
                        }
                        println!(
                            "{}",
                            format!("✓ {} migration(s) applied for {}", ids.len(), app)
                                .green()
                                .bold()
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Check { app_name, json } => {
            let statuses = check(migrator, app_name.as_deref()).await?;
            if json {
                let out = serde_json::to_string_pretty(&statuses)
                    .map_err(|e| MigrateError::Config(format!("Failed to encode status: {}", e)))?;
                println!("{}", out);
                return Ok(());
            }

            println!("{}", "📋 Migration Status".cyan().bold());
            println!();
            if statuses.is_empty() {
                println!("  {} No migrations found", "○".dimmed());
            }
            for status in statuses {
                let mark = match (status.has_run(), status.defined) {
                    (true, true) => "✓".green(),
                    (true, false) => "?".red(),
                    (false, _) => "○".dimmed(),
                };
                println!(
                    "  {} {} {} {}",
                    mark,
                    status.app_name.cyan(),
                    status.migration_id,
                    status.description.dimmed()
                );
            }
            Ok(())
        }
        Commands::Show { .. } | Commands::New { .. } => Ok(()),
    }
}

fn show(
    config: &Config,
    url: &str,
    app_name: &str,
    migration_id: &str,
    backward: bool,
) -> retrace::Result<()> {
    let dialect = Dialect::from_url(url)?;
    let app = config.app(app_name)?;
    let modules = FileSource.modules(app)?;
    let module = modules
        .get(migration_id)
        .ok_or_else(|| MigrateError::UnknownMigration {
            requested: migration_id.to_string(),
            defined: modules.keys().cloned().collect(),
        })?;

    let ExecutionOutcome::ProducesManager(mut manager) = module.forwards()? else {
        println!("  {} Migration has no operations to show", "○".dimmed());
        return Ok(());
    };
    manager.app_name = app.name.clone();
    manager.migration_id = module.migration_id.clone();

    let (direction, label) = if backward {
        (Direction::Backward, "BACKWARD")
    } else {
        (Direction::Forward, "FORWARD")
    };
    let lookup = ModuleLookup::new(&app.name, &modules);
    let steps = manager.plan(dialect, direction, &lookup)?;

    println!(
        "{} {} {} ({})",
        format!("📋 {} plan:", label).cyan().bold(),
        app.name.yellow(),
        manager.migration_id,
        dialect.name()
    );
    for (i, step) in steps.iter().enumerate() {
        println!(
            "  {} {}",
            format!("[{}/{}]", i + 1, steps.len()).cyan(),
            step.kind.yellow()
        );
        if step.callback {
            println!("      {}", "-- raw callback".dimmed());
        }
        for sql in &step.statements {
            println!("      {}", sql);
        }
    }
    Ok(())
}
