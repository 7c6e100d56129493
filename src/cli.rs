//! CLI argument parsing for the correction workflow.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "relabel",
    version,
    about = "Capture flagged model verdicts and package them into dataset versions",
    after_help = "Examples:\n  relabel init --workspace ./ws --model transformer='python3 serve.py transformer'\n  relabel classify --workspace ./ws --stream transformer 'what a lovely traffic jam'\n  relabel flag --workspace ./ws --stream transformer --verdict 'LABEL: SARCASTIC' 'what a lovely traffic jam'\n  relabel package --workspace ./ws\n  relabel status --workspace ./ws --json\n  relabel history --workspace ./ws\n\nRELABEL_MODEL_<STREAM> overrides the configured command for a stream.",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log debug events to stderr (RUST_LOG wins when set)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Classify(ClassifyArgs),
    Flag(FlagArgs),
    Package(PackageArgs),
    Status(StatusArgs),
    History(HistoryArgs),
}

/// Workspace selection shared by every command.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArg {
    /// Workspace root holding relabel.json, logs, and the version store
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workspace: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Create relabel.json and the log directory")]
pub struct InitArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Dataset project
    #[arg(long)]
    pub project: Option<String>,

    /// Dataset name within the project
    #[arg(long)]
    pub dataset: Option<String>,

    /// Inference command for a stream, as STREAM=COMMAND (repeatable)
    #[arg(long = "model", value_name = "STREAM=COMMAND")]
    pub models: Vec<String>,

    /// Overwrite an existing relabel.json
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run a stream's model on a sentence and print its verdict")]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Stream (one per model) the sentence belongs to
    #[arg(long)]
    pub stream: String,

    /// Record the verdict as a flagged correction right away
    #[arg(long)]
    pub flag: bool,

    /// Sentence to classify
    pub text: String,
}

#[derive(Parser, Debug)]
#[command(about = "Record a flagged verdict for a sentence")]
pub struct FlagArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Stream (one per model) the sentence belongs to
    #[arg(long)]
    pub stream: String,

    /// Verdict text as the model printed it (LABEL: ... / CERTAINTY: ...)
    #[arg(long)]
    pub verdict: String,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Sentence the verdict was given for
    pub text: String,
}

#[derive(Parser, Debug)]
#[command(about = "Package current batches into a new dataset version")]
pub struct PackageArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Streams to package (default: every stream with a batch)
    #[arg(long = "stream", value_name = "STREAM")]
    pub streams: Vec<String>,

    /// Package one batch id instead of current batches
    #[arg(long, value_name = "UUID", conflicts_with = "streams")]
    pub batch: Option<String>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Show current batches and the latest version")]
pub struct StatusArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "List published versions, newest first")]
pub struct HistoryArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArg,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}
