//! The clap command surface.

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(
    name = "perfdeck",
    version,
    about = "Record perf profiles for the perfdeck profiling front-end"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a perf profile
    Record(RecordArgs),
    /// Report which optional perf features are available
    Probes,
    /// Manage named toolchain profiles
    Profile(ProfileArgs),
}

#[derive(Args)]
pub struct RecordArgs {
    /// Output file for the recorded data
    #[arg(short, long, default_value = "perf.data")]
    pub output: PathBuf,

    /// Attach to a running process instead of launching one (repeatable)
    #[arg(long = "pid", value_name = "PID")]
    pub pids: Vec<String>,

    /// Record all CPUs system-wide (always elevates privileges)
    #[arg(long, conflicts_with = "pids")]
    pub all_cpus: bool,

    /// Elevate privileges through the helper before recording
    #[arg(long)]
    pub elevate: bool,

    /// Also record scheduler switch events for off-CPU analysis
    #[arg(long)]
    pub off_cpu: bool,

    /// Extra option passed through to perf record (repeatable)
    #[arg(
        long = "perf-option",
        value_name = "OPT",
        allow_hyphen_values = true
    )]
    pub perf_options: Vec<String>,

    /// Working directory for the launched executable
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// perf binary to use
    #[arg(long, env = "PERFDECK_PERF", default_value = "perf")]
    pub perf: PathBuf,

    /// Executable to launch under perf, with its arguments
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        conflicts_with_all = ["pids", "all_cpus"]
    )]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct ProfileArgs {
    /// Profile config file (defaults to the user config directory)
    #[arg(long, env = "PERFDECK_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// List profile names
    List,
    /// Show one profile
    Show {
        name: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update a profile
    Save {
        name: String,
        #[arg(long, value_name = "DIR", default_value = "")]
        sysroot: String,
        #[arg(long, value_name = "DIR", default_value = "")]
        app_path: String,
        /// Colon-joined list of extra library search paths
        #[arg(long, value_name = "PATHS", default_value = "")]
        extra_lib_paths: String,
        /// Colon-joined list of debug info search paths
        #[arg(long, value_name = "PATHS", default_value = "")]
        debug_paths: String,
        #[arg(long, value_name = "FILE", default_value = "")]
        kallsyms: String,
        /// Target architecture (empty means auto-detect)
        #[arg(long, value_name = "ARCH", default_value = "")]
        arch: String,
        #[arg(long, value_name = "BIN", default_value = "")]
        objdump: String,
    },
    /// Remove a profile
    Remove { name: String },
    /// Rename a profile
    Rename { old: String, new: String },
    /// Show or set the last-used profile
    LastUsed {
        /// Set the last-used profile to this name
        name: Option<String>,
    },
}
