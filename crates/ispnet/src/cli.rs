//! Clap derive structures for the `ispnet` CLI.
//!
//! Also compiled by `build.rs` for man pages and completions, so this file
//! may only depend on clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ispnet -- keep ISP routers, OLTs and RADIUS in step
#[derive(Debug, Parser)]
#[command(
    name = "ispnet",
    version,
    about = "Sync, RADIUS failover, backups and health checks for ISP network devices",
    long_about = "Orchestrates MikroTik routers and GPON/EPON OLTs.\n\n\
        Each invocation does one job and exits, so it can be driven from\n\
        cron or a systemd timer.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "ISPNET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ISPNET_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Devices worked on at once (overrides config)
    #[arg(long, env = "ISPNET_CONCURRENCY", global = true)]
    pub concurrency: Option<usize>,

    /// Per-request timeout in seconds (overrides config)
    #[arg(long, env = "ISPNET_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Accept self-signed TLS certificates on every device
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Shared enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Router,
    Olt,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EntityArg {
    /// /ip/pool
    #[value(alias = "pools")]
    Pool,
    /// /ppp/profile
    #[value(alias = "profiles")]
    Profile,
    /// /ppp/secret
    #[value(alias = "secrets")]
    Secret,
    /// ONUs discovered on an OLT (import only)
    #[value(alias = "onus")]
    Onu,
}

/// Which devices a fleet command targets.
#[derive(Debug, Args)]
pub struct SelectorArgs {
    /// Device id (repeatable)
    #[arg(long = "device", short = 'd', value_name = "ID")]
    pub devices: Vec<String>,

    /// Only devices of this kind
    #[arg(long)]
    pub kind: Option<KindArg>,

    /// Every configured device
    #[arg(long, conflicts_with = "devices")]
    pub all: bool,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect the device inventory
    #[command(alias = "dev")]
    Devices(DevicesArgs),

    /// Move pools, profiles, PPP secrets and ONUs between devices and the store
    Sync(SyncArgs),

    /// Switch routers between RADIUS and local authentication
    #[command(alias = "fo")]
    Failover(FailoverArgs),

    /// Configuration snapshots: take, compare, restore
    #[command(alias = "bk")]
    Backup(BackupArgs),

    /// Probe device reachability and load
    Health(HealthArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List configured devices
    #[command(alias = "ls")]
    List {
        /// Only devices of this kind
        #[arg(long)]
        kind: Option<KindArg>,
    },

    /// Show one device
    Show {
        /// Device id
        device: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SYNC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommand,
}

#[derive(Debug, Args)]
pub struct SyncRunArgs {
    /// What to sync
    pub entity: EntityArg,

    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Plan only; write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Include disabled records
    #[arg(long)]
    pub include_disabled: bool,
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Device → store. Never deletes store records
    Import(SyncRunArgs),

    /// Store → device. Creates and updates, never deletes
    Mirror(SyncRunArgs),

    /// Remove device rows that have no store counterpart
    Prune(SyncRunArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  FAILOVER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct FailoverArgs {
    #[command(subcommand)]
    pub command: FailoverCommand,
}

#[derive(Debug, Subcommand)]
pub enum FailoverCommand {
    /// Install the RADIUS client and watchdog without switching modes
    Configure(SelectorArgs),

    /// Authenticate PPP against RADIUS only
    Radius(SelectorArgs),

    /// Authenticate PPP against local secrets only
    Router(SelectorArgs),

    /// RADIUS with local secrets kept as fallback
    Hybrid(SelectorArgs),

    /// Read the failover posture of routers
    #[command(alias = "st")]
    Status(SelectorArgs),

    /// Ping the RADIUS server from a router
    Test {
        /// Device id
        device: String,
    },

    /// Recent failover lines from a router's log
    Log {
        /// Device id
        device: String,

        /// Max entries
        #[arg(long, short = 'l', default_value = "20")]
        limit: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  BACKUP
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Snapshot router configuration
    Create {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Free-form note stored with the snapshot
        #[arg(long)]
        note: Option<String>,

        /// Mark as scheduled (subject to retention)
        #[arg(long)]
        scheduled: bool,
    },

    /// List snapshots of a device, newest first
    #[command(alias = "ls")]
    List {
        /// Device id
        device: String,
    },

    /// Print a snapshot's content
    Show {
        /// Snapshot id
        id: String,
    },

    /// Line diff between two snapshots
    Diff {
        /// Older snapshot id
        from: String,
        /// Newer snapshot id
        to: String,
    },

    /// Push a snapshot back onto its device
    Restore {
        /// Device id
        device: String,
        /// Snapshot id
        id: String,
    },

    /// Take a pre-change snapshot and print its change id
    Begin {
        /// Device id
        device: String,
        /// What is about to change
        reason: String,
    },

    /// Restore the snapshot taken by `backup begin`
    Revert {
        /// Change id
        change_id: String,
    },

    /// Apply retention to scheduled snapshots
    Prune {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Newest scheduled snapshots to keep (overrides config)
        #[arg(long)]
        keep_last: Option<usize>,

        /// Drop older scheduled snapshots, e.g. `30d` (overrides config)
        #[arg(long)]
        max_age: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  HEALTH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct HealthArgs {
    #[command(subcommand)]
    pub command: HealthCommand,
}

#[derive(Debug, Subcommand)]
pub enum HealthCommand {
    /// Probe one device
    Check {
        /// Device id
        device: String,
    },

    /// Probe many devices (all when no selector is given)
    Fleet(SelectorArgs),

    /// Recorded probe results for a device
    History {
        /// Device id
        device: String,

        /// Max entries
        #[arg(long, short = 'l', default_value = "20")]
        limit: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// Store a device password, SNMP community, SNMPv3 password, the RADIUS
    /// secret or the backup key in the system keyring
    SetPassword {
        /// Device id, `radius` for the RADIUS shared secret, or `backup` for
        /// the snapshot encryption key
        target: String,

        /// Which device secret to store
        #[arg(long, value_enum, default_value_t = SecretKind::Password)]
        secret: SecretKind,
    },
}

/// Device secrets that can live in the keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SecretKind {
    /// Login password (REST / API)
    Password,
    /// SNMP v1/v2c community
    Community,
    /// SNMPv3 authentication password
    Auth,
    /// SNMPv3 privacy password
    Priv,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
