//! `iptb` subcommands
//!
//! Each handler selects nodes, hands a unit of work to the fleet engine and
//! reports the results. Handlers never print diagnostics to stdout.

mod exec;
mod inspect;
mod lifecycle;

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use crate::config::{TestbedConfig, DEFAULT_LOG_LEVEL, DEFAULT_TESTBED, PLUGINS_VAR, ROOT_VAR};
use crate::core::{build_report, Encoding, ExecutionResult, NodeRef};
use crate::error::TestbedResult;
use crate::nodes::local;
use crate::plugins::PluginRegistry;
use crate::testbed::Testbed;

/// Manage testbeds of local, containerized and namespaced test nodes
#[derive(Debug, Parser)]
#[command(name = "iptb", version)]
#[command(about = "Create, drive and inspect fleets of test nodes")]
pub struct Cli {
    /// Directory holding testbeds and plugins (default: $HOME/testbed)
    #[arg(long, env = ROOT_VAR, global = true)]
    pub root: Option<PathBuf>,

    /// Testbed to operate on
    #[arg(long, default_value = DEFAULT_TESTBED, global = true)]
    pub testbed: String,

    /// Plugin manifest directory (default: <root>/plugins)
    #[arg(long, env = PLUGINS_VAR, global = true)]
    pub plugins: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Output options shared by every fan-out command
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct ReportArgs {
    /// Output encoding
    #[arg(long, value_enum, default_value_t = Encoding::Text)]
    pub encoding: Encoding,

    /// Print elapsed-time statistics after the results
    #[arg(long)]
    pub stats: bool,
}

/// Options describing a fleet to create
#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    /// Number of nodes
    #[arg(long, short = 'c')]
    pub count: usize,

    /// Node type (plugin name)
    #[arg(long = "type", default_value = local::TYPE_NAME)]
    pub type_name: String,

    /// Node attribute as `key,value` (repeatable; a bare key means `true`)
    #[arg(long = "attr")]
    pub attrs: Vec<String>,

    /// Replace an existing testbed
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a testbed, initialise every node and optionally start them
    Auto {
        #[command(flatten)]
        create: CreateArgs,

        /// Start the nodes after initialising them
        #[arg(long)]
        start: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Manage testbed specs
    Testbed {
        #[command(subcommand)]
        action: TestbedAction,
    },

    /// Initialise node repos
    Init {
        /// Node range, e.g. 3 or [0-2,5] (default: all)
        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,

        /// Extra arguments for the init command
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Start node daemons
    Start {
        range: Option<String>,

        /// Return without waiting for the nodes to come online
        #[arg(long)]
        no_wait: bool,

        #[command(flatten)]
        report: ReportArgs,

        /// Extra arguments for the daemon
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Stop node daemons
    Stop {
        range: Option<String>,

        /// Signal once instead of escalating until the daemon is gone
        #[arg(long)]
        no_wait: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Stop then start node daemons
    Restart {
        range: Option<String>,

        #[arg(long)]
        no_wait: bool,

        #[command(flatten)]
        report: ReportArgs,

        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run a command on nodes; without a command, read batch lines from stdin
    Run {
        range: Option<String>,

        /// Per-node deadline, e.g. 10s
        #[arg(long)]
        timeout: Option<String>,

        #[command(flatten)]
        report: ReportArgs,

        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Connect nodes to each other
    Connect {
        /// Zero ranges: everyone to everyone; one: within the range; two: from to
        #[arg(num_args = 0..=2)]
        ranges: Vec<String>,

        /// Topology file with `origin: dest,dest` rows
        #[arg(long, conflicts_with = "ranges")]
        topology: Option<PathBuf>,

        /// Per-connection deadline
        #[arg(long, default_value = "30s")]
        timeout: String,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Open an interactive shell in a node's environment
    Shell {
        /// Node index
        node: usize,
    },

    /// Node attributes
    Attr {
        #[command(subcommand)]
        action: AttrAction,
    },

    /// Read a metric from nodes
    Metric {
        metric: String,

        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Print daemon logs
    Logs {
        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Print node events
    Events {
        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// List registered node types
    Plugins,
}

#[derive(Debug, Subcommand)]
pub enum TestbedAction {
    /// Write node specs for a new testbed
    Create {
        #[command(flatten)]
        create: CreateArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum AttrAction {
    /// Read an attribute
    Get {
        attr: String,

        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Set an attribute
    Set {
        attr: String,

        value: String,

        range: Option<String>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// List attributes of a node or a node type
    List {
        /// Node index
        #[arg(default_value_t = 0, conflicts_with = "type_name")]
        node: usize,

        /// Describe a node type instead of a node
        #[arg(long = "type")]
        type_name: Option<String>,
    },

    /// Describe one attribute
    Describe {
        attr: String,

        #[arg(default_value_t = 0, conflicts_with = "type_name")]
        node: usize,

        #[arg(long = "type")]
        type_name: Option<String>,
    },
}

/// Everything a handler needs
pub struct CommandContext {
    pub config: TestbedConfig,
    pub registry: PluginRegistry,
    pub testbed: Testbed,
}

impl CommandContext {
    /// Resolve configuration and load built-in and external plugins
    pub async fn from_cli(cli: &Cli) -> TestbedResult<Self> {
        let config = TestbedConfig::resolve(
            cli.root.clone(),
            &cli.testbed,
            cli.plugins.clone(),
            &cli.log_level,
        )?;

        let mut registry = PluginRegistry::with_builtins()?;
        let loaded = registry.load(config.plugins_dir()).await?;
        tracing::debug!(
            loaded = loaded.loaded.len(),
            overridden = loaded.overridden.len(),
            failed = loaded.failures.len(),
            "plugins loaded"
        );

        Ok(Self {
            testbed: Testbed::new(config.testbed_dir()),
            config,
            registry,
        })
    }

    pub async fn nodes(&self) -> TestbedResult<Vec<NodeRef>> {
        self.testbed.nodes(&self.registry).await
    }
}

/// Run the parsed command
pub async fn execute(cli: Cli) -> TestbedResult<()> {
    let ctx = CommandContext::from_cli(&cli).await?;

    match cli.command {
        Command::Auto { create, start, report } => lifecycle::auto(&ctx, create, start, report).await,
        Command::Testbed {
            action: TestbedAction::Create { create },
        } => lifecycle::create(&ctx, create).await.map(|_| ()),
        Command::Init { range, report, args } => lifecycle::init(&ctx, range, args, report).await,
        Command::Start {
            range,
            no_wait,
            report,
            args,
        } => lifecycle::start(&ctx, range, !no_wait, args, report).await,
        Command::Stop { range, no_wait, report } => lifecycle::stop(&ctx, range, !no_wait, report).await,
        Command::Restart {
            range,
            no_wait,
            report,
            args,
        } => lifecycle::restart(&ctx, range, !no_wait, args, report).await,
        Command::Run {
            range,
            timeout,
            report,
            command,
        } => exec::run(&ctx, range, timeout, command, report).await,
        Command::Connect {
            ranges,
            topology,
            timeout,
            report,
        } => exec::connect(&ctx, ranges, topology, &timeout, report).await,
        Command::Shell { node } => exec::shell(&ctx, node).await,
        Command::Attr { action } => inspect::attr(&ctx, action).await,
        Command::Metric { metric, range, report } => inspect::metric(&ctx, metric, range, report).await,
        Command::Logs { range, report } => inspect::logs(&ctx, range, report).await,
        Command::Events { range, report } => inspect::events(&ctx, range, report).await,
        Command::Plugins => inspect::plugins(&ctx),
    }
}

/// Write results to stdout in the requested encoding
fn emit(results: Vec<ExecutionResult>, report: ReportArgs, label: &str) -> TestbedResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    build_report(&mut out, results, report.encoding, label, report.stats)
}

/// Plain lines to stdout, for listings that are not fan-outs
fn print_lines<I: IntoIterator<Item = String>>(lines: I) -> TestbedResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_splits_range_from_command() {
        let cli = Cli::try_parse_from(["iptb", "run", "[0-2]", "--", "ipfs", "id", "-f", "<addrs>"]).unwrap();
        match cli.command {
            Command::Run { range, command, .. } => {
                assert_eq!(range.as_deref(), Some("[0-2]"));
                assert_eq!(command, vec!["ipfs", "id", "-f", "<addrs>"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_report_flags() {
        let cli = Cli::try_parse_from(["iptb", "start", "1", "--encoding", "json", "--stats", "--no-wait"]).unwrap();
        match cli.command {
            Command::Start {
                range, no_wait, report, ..
            } => {
                assert_eq!(range.as_deref(), Some("1"));
                assert!(no_wait);
                assert_eq!(report.encoding, Encoding::Json);
                assert!(report.stats);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_connect_accepts_at_most_two_ranges() {
        let cli = Cli::try_parse_from(["iptb", "connect", "[0-1]", "[2-3]"]).unwrap();
        match cli.command {
            Command::Connect { ranges, timeout, .. } => {
                assert_eq!(ranges, vec!["[0-1]", "[2-3]"]);
                assert_eq!(timeout, "30s");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["iptb", "connect", "0", "1", "2"]).is_err());
        assert!(Cli::try_parse_from(["iptb", "connect", "0", "--topology", "topo.txt"]).is_err());
    }

    #[test]
    fn test_auto_create_options() {
        let cli = Cli::try_parse_from([
            "iptb", "--testbed", "bench", "auto", "-c", "4", "--type", "dockeripfs", "--attr", "mdns", "--start",
        ])
        .unwrap();
        assert_eq!(cli.testbed, "bench");
        match cli.command {
            Command::Auto { create, start, .. } => {
                assert_eq!(create.count, 4);
                assert_eq!(create.type_name, "dockeripfs");
                assert_eq!(create.attrs, vec!["mdns"]);
                assert!(start);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
