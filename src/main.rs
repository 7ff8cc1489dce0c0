/*!
 * TableShift CLI - Command Line Interface
 *
 * Operator surface for moving tables between clusters and for editing their
 * routing entries.
 */

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tableshift::{
    cli_style::{self, migration_summary_table, print_error, print_info, switch_table, table_copy_table},
    cluster::{parse_addrs, ClusterClient, ClusterConnector, SandboxConnector},
    config::{LogLevel, ShiftConfig},
    error::{Result, ShiftError, EXIT_SUCCESS},
    logging,
    migrate::{MigrationMode, Migrator},
    registry::{resolve_coordinator, RoutingRegistry, SandboxCoordinatorConnector},
    window::MigrationWindow,
};

#[derive(Parser)]
#[command(name = "tableshift")]
#[command(version, about = "Migrate tables between key-value clusters and switch their routing", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory of sandbox clusters and coordination services
    #[arg(long, value_name = "DIR", global = true)]
    sandbox: Option<PathBuf>,

    /// Log level (default: info, or the config file's)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision tables created in a time window on a target cluster and copy their data
    CopyData {
        /// Source meta server addresses (comma-separated)
        #[arg(short = 'f', long = "from", value_name = "ADDRS")]
        from: String,

        /// Target meta server addresses (comma-separated)
        #[arg(short = 't', long = "target", value_name = "ADDRS")]
        target: String,

        /// Only tables created after this time (YYYY-MM-DD_HH:MM:SS, local time)
        #[arg(short = 's', long = "start", value_name = "TIME")]
        start: String,

        /// Only tables created before this time (YYYY-MM-DD_HH:MM:SS, local time)
        #[arg(short = 'e', long = "end", value_name = "TIME")]
        end: String,

        /// Tables are already provisioned; copy data only
        #[arg(long, conflicts_with = "provision_only")]
        copy: bool,

        /// Create tables on the target without copying data
        #[arg(long)]
        provision_only: bool,

        /// Show what would be created and copied without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Abort the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Copy data of tables matching RULE (glob, `regex:` or exact name);
        /// adds to `copy_include`, copying needs at least one rule
        #[arg(short = 'i', long = "include", value_name = "RULE")]
        include: Vec<String>,

        /// Never copy data of tables matching RULE
        #[arg(short = 'x', long = "exclude", value_name = "RULE")]
        exclude: Vec<String>,
    },

    /// Read and edit table routing entries
    #[command(subcommand)]
    Routing(RoutingCommands),

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RoutingCommands {
    /// Print the routing entry of a table
    Get {
        table: String,
        #[command(flatten)]
        session: RoutingArgs,
    },

    /// Record the cluster given by --cluster as the owner of a table
    Add {
        table: String,
        #[command(flatten)]
        session: RoutingArgs,
    },

    /// Move a table from the cluster given by --cluster to another cluster
    Switch {
        table: String,

        /// Meta server addresses of the new owner (comma-separated)
        #[arg(long, value_name = "ADDRS")]
        target: String,

        #[command(flatten)]
        session: RoutingArgs,
    },
}

#[derive(Args)]
struct RoutingArgs {
    /// Meta server addresses of the cluster the operator works on
    #[arg(short = 'c', long, value_name = "ADDRS")]
    cluster: String,

    /// Root path of routing entries in the coordination service
    #[arg(long, value_name = "PATH")]
    root: Option<String>,

    /// Coordination-service address (default: the cluster's own)
    #[arg(long, value_name = "ADDR")]
    coordinator: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let hint = hint_for(&e);
            print_error(&e.to_string(), hint);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        use clap::CommandFactory;
        use clap_complete::generate;
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "tableshift", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = match cli.config {
        Some(ref path) => ShiftConfig::from_file(path)?,
        None => ShiftConfig::default(),
    };

    // CLI flags override the config file
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;
    if cli.sandbox.is_some() {
        config.sandbox_dir = cli.sandbox.clone();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::CopyData {
            from,
            target,
            start,
            end,
            copy,
            provision_only,
            dry_run,
            timeout,
            include,
            exclude,
        } => {
            let mode = if copy {
                MigrationMode::CopyOnly
            } else if provision_only {
                MigrationMode::Provision
            } else {
                MigrationMode::Full
            };
            if timeout.is_some() {
                config.migration.timeout_secs = timeout;
            }
            config.migration.copy_include.extend(include);
            config.migration.copy_exclude.extend(exclude);
            handle_copy_data(&config, &from, &target, &start, &end, mode, dry_run)
        }
        Commands::Routing(command) => handle_routing(&mut config, command),
        Commands::Completions { .. } => Ok(()),
    }
}

fn handle_copy_data(
    config: &ShiftConfig,
    from: &str,
    target: &str,
    start: &str,
    end: &str,
    mode: MigrationMode,
    dry_run: bool,
) -> Result<()> {
    let window = MigrationWindow::parse(start, end)?;
    let migrator = Migrator::new(config.migration.clone())?;
    if mode.copies() {
        config.migration.validate_copy_rules()?;
    }

    let connector = cluster_connector(config)?;
    let source = connect(&connector, from)?;
    let target = connect(&connector, target)?;

    let report = migrator.migrate_tables(source.as_ref(), target.as_ref(), &window, mode, dry_run)?;

    println!("{}", migration_summary_table(&report));
    if !report.copies.is_empty() {
        println!("{}", table_copy_table(&report));
    }
    Ok(())
}

fn handle_routing(config: &mut ShiftConfig, command: RoutingCommands) -> Result<()> {
    let (table, session, action) = match command {
        RoutingCommands::Get { table, session } => (table, session, RoutingAction::Get),
        RoutingCommands::Add { table, session } => (table, session, RoutingAction::Add),
        RoutingCommands::Switch {
            table,
            target,
            session,
        } => (table, session, RoutingAction::Switch(target)),
    };

    if let Some(root) = session.root {
        config.routing.root = Some(root);
    }
    if let Some(addr) = session.coordinator {
        config.routing.coordinator = Some(addr);
    }
    let root = config.routing.root()?;

    let connector = cluster_connector(config)?;
    let cluster = connect(&connector, &session.cluster)?;

    let addr = resolve_coordinator(&config.routing, cluster.as_ref())?;
    let coordinators = SandboxCoordinatorConnector::new(sandbox_dir(config)?);
    let registry = RoutingRegistry::open(
        &coordinators,
        &addr,
        &root,
        config.routing.session_timeout(),
    )?;

    let outcome = match action {
        RoutingAction::Get => registry.get(&table).and_then(|entry| {
            let json = serde_json::to_string_pretty(&entry).map_err(|e| {
                ShiftError::Config(format!("Failed to render routing entry: {}", e))
            })?;
            println!("{}", json);
            Ok(())
        }),
        RoutingAction::Add => registry
            .register_current(&table, cluster.as_ref())
            .map(|outcome| print_info(&format!("{} = {}", outcome.path, outcome.raw))),
        RoutingAction::Switch(target_addrs) => {
            let target = connect(&connector, &target_addrs)?;
            let result =
                registry.switch_owner(&table, cluster.as_ref(), target.as_ref(), &target_addrs);
            flush(cluster.as_ref());
            result.map(|outcome| {
                println!("{}", switch_table(&outcome));
                cli_style::print_success(&format!(
                    "Table '{}' now routed to cluster '{}'",
                    table, outcome.current.cluster_name
                ));
            })
        }
    };

    // The session is closed even when the operation failed
    let closed = registry.close();
    outcome.and(closed)
}

enum RoutingAction {
    Get,
    Add,
    Switch(String),
}

fn sandbox_dir(config: &ShiftConfig) -> Result<PathBuf> {
    config.sandbox_dir.clone().ok_or_else(|| {
        ShiftError::Config(
            "no cluster driver configured: pass --sandbox <DIR> or set sandbox_dir".to_string(),
        )
    })
}

fn cluster_connector(config: &ShiftConfig) -> Result<SandboxConnector> {
    sandbox_dir(config).map(SandboxConnector::new)
}

fn connect(connector: &dyn ClusterConnector, addrs: &str) -> Result<Box<dyn ClusterClient>> {
    let addrs = parse_addrs(addrs);
    if addrs.is_empty() {
        return Err(ShiftError::Config("empty meta server address list".to_string()));
    }
    connector
        .connect(&addrs)
        .map_err(|e| ShiftError::cluster(format!("connect to {}", addrs.join(",")), e))
}

fn flush(cluster: &dyn ClusterClient) {
    if let Err(e) = cluster.flush() {
        cli_style::print_warning(&format!("Failed to persist cluster state: {}", e));
    }
}

fn hint_for(error: &ShiftError) -> Option<&'static str> {
    match error {
        ShiftError::OwnershipMismatch { .. } => {
            Some("Run the switch against the cluster the routing entry names")
        }
        ShiftError::VersionConflict { .. } => {
            Some("Another operator changed the entry; re-read it and retry")
        }
        ShiftError::SwitchIncomplete { rolled_back: false, .. } => Some(
            "Routing points at the new cluster but the origin still serves clients; fix one side by hand",
        ),
        ShiftError::Cancelled { .. } => Some("Rerun with --copy to resume copying provisioned tables"),
        _ => None,
    }
}
