use anyhow::Context;
use clap::{Parser, Subcommand};
use cv_core::{Family, JumpEdges, TableKey, TableName, TableSnapshot, ViewerConfig};
use cv_ipt::{DumpParser, DumpSource, FirewallActions, IptablesFetcher, fetch_all};
use cv_tui::layout::{NO_RULES, column_header, rule_line};
use cv_view::{LiveView, PollEvent, Poller, ViewTree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chainview")]
#[command(version, about = "Live viewer for iptables/ip6tables rulesets", long_about = None)]
struct Cli {
    /// Config file (default: /etc/chainview/config.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file (the TUI discards them otherwise)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live terminal view
    Tui,
    /// Fetch and print the ruleset once
    Dump {
        #[arg(long)]
        family: Option<Family>,
        #[arg(long)]
        table: Option<TableName>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Poll headless and log what changes each cycle
    Watch {
        /// Stop after this many cycles (default: until Ctrl-C)
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Reset packet and byte counters
    Zero,
    /// Restart the firewall service
    Restart,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(
        cli.verbose,
        cli.log_file.as_deref(),
        matches!(cli.command, Commands::Tui),
    )?;

    let config = ViewerConfig::load(cli.config.as_deref())?;
    debug!("Loaded config: {:?}", config);

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Tui => runtime.block_on(run_tui(config))?,
        Commands::Dump {
            family,
            table,
            json,
        } => runtime.block_on(dump(&config, family, table, json))?,
        Commands::Watch { cycles } => runtime.block_on(watch(config, cycles))?,
        Commands::Zero => runtime.block_on(zero_counters(&config))?,
        Commands::Restart => runtime.block_on(restart_firewall(&config))?,
    }

    Ok(())
}

fn init_logging(verbose: u8, log_file: Option<&Path>, tui: bool) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .context(format!("Failed to create log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        // Anything written to the terminal would tear the TUI
        None if tui => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::sink)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

async fn run_tui(config: ViewerConfig) -> anyhow::Result<()> {
    use cv_tui::TuiApp;

    let mut app = TuiApp::new(config);
    app.run().await?;

    Ok(())
}

fn selected_keys(
    fetcher: &IptablesFetcher,
    config: &ViewerConfig,
    family: Option<Family>,
    table: Option<TableName>,
) -> anyhow::Result<Vec<TableKey>> {
    let families = match family {
        Some(family) if fetcher.binary(family).is_none() => {
            anyhow::bail!("{} is not available on this system", family.tool());
        }
        Some(family) => vec![family],
        None => fetcher.families(),
    };
    let tables = match table {
        Some(table) => vec![table],
        None => config.tables.clone(),
    };

    Ok(TableKey::all(&families, &tables))
}

async fn dump(
    config: &ViewerConfig,
    family: Option<Family>,
    table: Option<TableName>,
    json: bool,
) -> anyhow::Result<()> {
    let fetcher = IptablesFetcher::new(config);
    let keys = selected_keys(&fetcher, config, family, table)?;

    let mut snapshots = vec![];
    for (key, result) in fetch_all(&fetcher, &keys).await {
        match result {
            Ok(text) => {
                let mut parser = DumpParser::new(key);
                for line in text.lines() {
                    parser.feed_line(line);
                }
                if parser.skipped_lines() > 0 {
                    debug!("{}: skipped {} unrecognized lines", key, parser.skipped_lines());
                }
                snapshots.push(parser.finish());
            }
            Err(e) => eprintln!("⚠️  {}: {}", key, e),
        }
    }

    if json {
        print_json(&snapshots)?;
    } else {
        print_text(&snapshots);
    }

    Ok(())
}

fn print_json(snapshots: &[TableSnapshot]) -> anyhow::Result<()> {
    let tables: Vec<serde_json::Value> = snapshots
        .iter()
        .map(|snapshot| {
            let edges = JumpEdges::resolve(snapshot);
            let references: BTreeMap<&str, _> = snapshot
                .chains
                .iter()
                .map(|c| (c.name.as_str(), edges.references_to(&c.name)))
                .filter(|(_, refs)| !refs.is_empty())
                .collect();

            serde_json::json!({
                "family": snapshot.key.family,
                "table": snapshot.key.table,
                "chains": snapshot.chains,
                "references": references,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&tables)?);
    Ok(())
}

fn print_text(snapshots: &[TableSnapshot]) {
    let mut tree = ViewTree::default();
    for snapshot in snapshots {
        tree.apply(snapshot, &JumpEdges::resolve(snapshot));
    }

    for table in tree.tables() {
        println!("🔥 {} Firewall / {}\n", table.key.family, table.title());

        for chain in &table.chains {
            println!("  {}", chain.title());
            if chain.is_empty() {
                println!("    {}", NO_RULES);
            } else {
                println!("    {}", column_header());
                for row in &chain.rows {
                    let marker = if row.jump { "→" } else { " " };
                    println!("  {} {}", marker, rule_line(&row.rule));
                }
            }

            for r in &chain.references {
                println!("    ↳ referenced by {} #{}", r.chain, r.rule);
            }
            println!();
        }
    }
}

async fn watch(config: ViewerConfig, cycles: Option<u64>) -> anyhow::Result<()> {
    let fetcher = Arc::new(IptablesFetcher::new(&config));
    let poller = Poller::new(fetcher, &config.tables, config.poll_interval());

    println!(
        "👀 Watching {} tables every {}s (Ctrl-C to stop)",
        poller.keys().len(),
        config.poll_interval_secs
    );

    let (tx, mut rx) = mpsc::channel(64);
    let _poller = poller.spawn(tx);
    let mut live = LiveView::new(ViewTree::new(config.hide_empty));

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            PollEvent::CycleFinished { generation } => {
                live.handle(PollEvent::CycleFinished { generation });
                debug!("generation {} finished", generation);
                if cycles.is_some_and(|limit| live.finished_generation() >= limit) {
                    break;
                }
            }
            PollEvent::FetchFailed {
                generation,
                key,
                error,
            } => {
                warn!("generation {}: unable to fetch {}: {}", generation, key, error);
                live.handle(PollEvent::FetchFailed {
                    generation,
                    key,
                    error,
                });
            }
            event => {
                if let Some(report) = live.handle(event) {
                    if report.is_unchanged() {
                        debug!("{}", report);
                    } else {
                        info!("{}", report);
                    }
                }
            }
        }
    }

    println!("✅ Stopped after {} cycles", live.finished_generation());
    Ok(())
}

async fn zero_counters(config: &ViewerConfig) -> anyhow::Result<()> {
    let fetcher = IptablesFetcher::new(config);
    let actions = FirewallActions::new(&fetcher, config);

    println!("🧹 Resetting counters...");
    let mut failed = 0;
    for (family, result) in actions.zero_counters().await {
        match result {
            Ok(()) => println!("  ✅ {}", family.tool()),
            Err(e) => {
                println!("  ❌ Unable to reset {} counters: {}", family.tool(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} counter reset(s) failed", failed);
    }
    Ok(())
}

async fn restart_firewall(config: &ViewerConfig) -> anyhow::Result<()> {
    let fetcher = IptablesFetcher::new(config);
    let actions = FirewallActions::new(&fetcher, config);

    println!("🔄 Restarting firewall...");
    actions
        .restart()
        .await
        .context("Unable to restart firewall")?;
    println!("✅ Firewall restarted");

    Ok(())
}
