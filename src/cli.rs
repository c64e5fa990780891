use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubectl-kronoform",
    version,
    about = "A time-lapse camera for your Kubernetes cluster.",
    long_about = "Tracks every kubectl apply, delete and patch together with the resulting resource \
                  states. Use 'kubectl kronoform apply' instead of 'kubectl apply' to record changes."
)]
pub struct CliArgs {
    /// tracing filter (for example: info,debug,trace)
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// kubectl binary to wrap
    #[arg(long, global = true)]
    pub kubectl: Option<String>,

    /// Disable coloured diff output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply configuration to a resource and record the change
    Apply(ApplyArgs),
    /// Delete resources and record the change
    Delete(DeleteArgs),
    /// Update field(s) of a resource and record the change
    Patch(PatchArgs),
    /// Show the diff of one history record, or the timeline when no id is given
    Diff(DiffArgs),
    /// Show the timeline of recorded changes
    Timeline(TimelineArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ApplyArgs {
    /// Files that contain the configuration to apply
    #[arg(short = 'f', long = "filename", value_delimiter = ',')]
    pub filenames: Vec<String>,

    /// Only print the object that would be sent, without sending it
    #[arg(long)]
    pub dry_run: bool,

    /// Namespace scope for this request
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Extra arguments passed through to kubectl
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DeleteArgs {
    /// Resource type and names, e.g. `configmap demo` or `deployment/web`
    pub resources: Vec<String>,

    /// Files identifying the resources to delete
    #[arg(short = 'f', long = "filename", value_delimiter = ',')]
    pub filenames: Vec<String>,

    /// Label selector to filter on
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Namespace scope for this request
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Delete all resources of the given types in the namespace
    #[arg(long)]
    pub all: bool,

    /// Treat "resource not found" as a successful delete
    #[arg(long = "ignore-not-found", value_delimiter = ',')]
    pub ignore_not_found: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum PatchType {
    #[default]
    Strategic,
    Merge,
    Json,
}

impl PatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strategic => "strategic",
            Self::Merge => "merge",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PatchArgs {
    /// Resource to patch, e.g. `deployment/web`
    pub resource: String,

    /// Patch document
    pub patch: String,

    /// Type of patch being provided
    #[arg(short = 'p', long = "type", value_enum, default_value_t = PatchType::Strategic)]
    pub patch_type: PatchType,

    /// Namespace scope for this request
    #[arg(short, long)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct DiffArgs {
    /// History record to diff against its snapshot
    pub history_id: Option<String>,

    /// Namespace holding the records
    #[arg(short, long)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TimelineArgs {
    /// Namespace holding the records
    #[arg(short, long)]
    pub namespace: Option<String>,
}
