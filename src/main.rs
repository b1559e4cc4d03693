use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use docmigrate::{
    ChainRun, DocumentStore, InMemoryStore, MigrateConfig, MigrationRunner, RoundingPolicy,
    VersionIndex, players,
};
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docmigrate")]
#[command(about = "Schema-versioned migrations for player documents")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed an in-memory store, then migrate every player to the latest version
    Demo {
        #[arg(long, default_value_t = 4)]
        v1: usize,
        #[arg(long, default_value_t = 5)]
        v2: usize,
        #[arg(long, default_value_t = 6)]
        v3: usize,
        #[arg(long, default_value = "docmigrate://localhost:5984/migration")]
        url: String,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print the chain report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the level a migration step assigns for an xp value
    Level {
        #[arg(long)]
        xp: i64,
        /// Source version of the step (1 or 2)
        #[arg(long, default_value_t = 1)]
        from: u32,
        #[arg(long, value_enum, default_value_t = Rounding::Floor)]
        rounding: Rounding,
    },
    /// List the player migration steps
    Plan,
}

#[derive(Clone, Copy, ValueEnum)]
enum Rounding {
    Floor,
    Nearest,
    Ceil,
}

impl From<Rounding> for RoundingPolicy {
    fn from(value: Rounding) -> Self {
        match value {
            Rounding::Floor => RoundingPolicy::Floor,
            Rounding::Nearest => RoundingPolicy::Nearest,
            Rounding::Ceil => RoundingPolicy::Ceil,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Demo {
            v1,
            v2,
            v3,
            url,
            concurrency,
            json,
        } => demo([v1, v2, v3], &url, concurrency, json).await,
        Command::Level { xp, from, rounding } => level(xp, from, rounding.into()),
        Command::Plan => {
            let plan = players::plan()?;
            for step in plan.steps() {
                println!(
                    "v{} -> v{}: {}",
                    step.from_version(),
                    step.to_version(),
                    step.name()
                );
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn demo(counts: [usize; 3], url: &str, concurrency: Option<usize>, json: bool) -> Result<()> {
    let mut config = MigrateConfig::from_url(url)
        .with_context(|| format!("Invalid store URL '{}'", url))?;
    if let Some(concurrency) = concurrency {
        config.runner.concurrency = concurrency;
    }
    if config.kind != players::PLAYER_KIND {
        return Err(anyhow!(
            "The demo seeds '{}' documents, not '{}'",
            players::PLAYER_KIND,
            config.kind
        ));
    }

    let store = InMemoryStore::new();
    let index = config.version_index()?;
    index.define(&store).await.context("Failed to define version partitions")?;

    for (version, count) in (1u32..).zip(counts) {
        players::seed(&store, "Player", version, count)
            .await
            .with_context(|| format!("Failed to seed version {} players", version))?;
    }
    print_counts("seeded", &index, &store).await?;

    let runner = MigrationRunner::new(index.clone(), config.runner.clone())?;
    let chain = runner
        .migrate_plan(&store, &players::plan()?, 1)
        .await
        .context("Migration aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
    } else {
        print_chain(&chain);
    }
    print_counts("migrated", &index, &store).await?;

    let report = index.check_invariants(&store).await?;
    if !report.is_consistent() {
        return Err(anyhow!(
            "Partitions are inconsistent: {} overlapping, {} missing",
            report.overlapping.len(),
            report.missing.len()
        ));
    }
    if !chain.is_clean() {
        return Err(anyhow!(
            "{} document(s) failed to migrate",
            chain.failures().count()
        ));
    }
    Ok(())
}

async fn print_counts<S: DocumentStore>(label: &str, index: &VersionIndex, store: &S) -> Result<()> {
    let counts: BTreeMap<u32, usize> = index.counts(store).await?;
    let line = counts
        .iter()
        .map(|(version, count)| format!("v{}={}", version, count))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{:>9}: {}", label, line);
    Ok(())
}

fn print_chain(chain: &ChainRun) {
    for run in &chain.runs {
        println!("{}", run);
    }
    if let Some((from, to)) = chain.halted_at {
        println!("chain halted at v{} -> v{}", from, to);
    }
}

fn level(xp: i64, from: u32, rounding: RoundingPolicy) -> Result<()> {
    let formula = match from {
        1 => players::level_formula_v2(),
        2 => players::level_formula_v3(),
        other => return Err(anyhow!("No level step starts at version {}", other)),
    };
    let level = formula
        .with_rounding(rounding)
        .compute(xp)
        .map_err(|reason| anyhow!(reason))?;
    println!("xp {} -> level {} (v{} -> v{})", xp, level, from, from + 1);
    Ok(())
}
