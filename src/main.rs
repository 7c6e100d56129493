use anyhow::{anyhow, Context, Result};
use clap::Parser;
use relabel::config::default_config;
use relabel::types::{BatchId, StreamName, VersionId};
use relabel::{PublishOutcome, Submission, Workspace};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{
    ClassifyArgs, Command, FlagArgs, HistoryArgs, InitArgs, PackageArgs, RootArgs, StatusArgs,
};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Init(args) => cmd_init(args),
        Command::Classify(args) => cmd_classify(args),
        Command::Flag(args) => cmd_flag(args),
        Command::Package(args) => cmd_package(args),
        Command::Status(args) => cmd_status(args),
        Command::History(args) => cmd_history(args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_init(args: InitArgs) -> Result<()> {
    let mut config = default_config();
    if let Some(project) = args.project {
        config.project = project;
    }
    if let Some(dataset) = args.dataset {
        config.dataset = dataset;
    }
    for entry in &args.models {
        let (stream, command) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("--model expects STREAM=COMMAND (got {entry:?})"))?;
        config
            .models
            .insert(stream.trim().to_string(), command.trim().to_string());
    }
    let root = &args.workspace.workspace;
    let paths = Workspace::init(root, &config, args.force)
        .with_context(|| format!("initialize workspace {}", root.display()))?;
    println!("initialized {}", paths.config_path().display());
    Ok(())
}

fn cmd_classify(args: ClassifyArgs) -> Result<()> {
    let stream = parse_stream(&args.stream)?;
    let root = &args.workspace.workspace;
    let workspace = if args.flag {
        Workspace::open_exclusive(root)
    } else {
        Workspace::open(root)
    }
    .with_context(|| format!("open workspace {}", root.display()))?;

    let classification = workspace
        .classify(&stream, &args.text)
        .with_context(|| format!("classify with stream {stream}"))?;
    println!("{}", classification.verdict);
    if args.flag {
        let submission = workspace
            .submit(&stream, &args.text, &classification.verdict)
            .context("record flagged verdict")?;
        print_submission(&submission);
    }
    Ok(())
}

fn cmd_flag(args: FlagArgs) -> Result<()> {
    let stream = parse_stream(&args.stream)?;
    let root = &args.workspace.workspace;
    let workspace = Workspace::open_exclusive(root)
        .with_context(|| format!("open workspace {}", root.display()))?;
    let submission = workspace
        .submit(&stream, &args.text, &args.verdict)
        .context("record flagged verdict")?;
    if args.json {
        return print_json(&submission);
    }
    print_submission(&submission);
    Ok(())
}

fn cmd_package(args: PackageArgs) -> Result<()> {
    let root = &args.workspace.workspace;
    let workspace = Workspace::open_exclusive(root)
        .with_context(|| format!("open workspace {}", root.display()))?;
    let outcome = match &args.batch {
        Some(batch) => {
            let batch: BatchId = batch
                .parse()
                .with_context(|| format!("parse batch id {batch:?}"))?;
            workspace.package_batch(&batch)
        }
        None => {
            let streams = args
                .streams
                .iter()
                .map(String::as_str)
                .map(parse_stream)
                .collect::<Result<Vec<_>>>()?;
            workspace.package(&streams)
        }
    }
    .context("package batch")?;

    if args.json {
        print_json(&outcome)?;
        return match &outcome {
            PublishOutcome::Published {
                version, unrotated, ..
            } if !unrotated.is_empty() => Err(unrotated_error(&version.id, unrotated.len())),
            _ => Ok(()),
        };
    }
    match outcome {
        PublishOutcome::NoOp => println!("nothing to package"),
        PublishOutcome::Published {
            version,
            rotations,
            unrotated,
        } => {
            let parent = version
                .parent_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none".to_string());
            println!(
                "published {} (parent {parent}, {} files)",
                version.id,
                version.files.len()
            );
            for rotation in rotations {
                println!(
                    "  {}: {} records, batch {} -> {}",
                    rotation.stream, rotation.records, rotation.retired, rotation.current
                );
            }
            for failure in &unrotated {
                eprintln!(
                    "  {}: still on packaged batch {} ({}); package again to retry",
                    failure.stream, failure.batch, failure.error
                );
            }
            if !unrotated.is_empty() {
                return Err(unrotated_error(&version.id, unrotated.len()));
            }
        }
    }
    Ok(())
}

fn unrotated_error(version: &VersionId, streams: usize) -> anyhow::Error {
    anyhow!("version {version} published but {streams} stream(s) did not rotate")
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let root = &args.workspace.workspace;
    let workspace =
        Workspace::open(root).with_context(|| format!("open workspace {}", root.display()))?;
    let status = workspace.status().context("read workspace status")?;
    if args.json {
        return print_json(&status);
    }
    println!("collection: {}", status.collection);
    match &status.latest_version {
        Some(id) => println!("latest version: {id}"),
        None => println!("latest version: none"),
    }
    if status.streams.is_empty() {
        println!("no corrections recorded yet");
    }
    for entry in &status.streams {
        println!(
            "{}: {} labeled samples in batch {}",
            entry.stream, entry.count, entry.batch
        );
    }
    Ok(())
}

fn cmd_history(args: HistoryArgs) -> Result<()> {
    let root = &args.workspace.workspace;
    let workspace =
        Workspace::open(root).with_context(|| format!("open workspace {}", root.display()))?;
    let history = workspace.history().context("read version history")?;
    if args.json {
        return print_json(&history);
    }
    if history.is_empty() {
        println!("no versions published in {}", workspace.config().collection());
    }
    for version in &history {
        let files: Vec<String> = version
            .files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        println!("{} {}", version.id, files.join(","));
    }
    Ok(())
}

fn parse_stream(name: &str) -> Result<StreamName> {
    StreamName::new(name).map_err(anyhow::Error::from)
}

fn print_submission(submission: &Submission) {
    match submission {
        Submission::Recorded { count, .. } => println!("{count} labeled samples"),
        Submission::Skipped => println!("verdict not recognized, nothing recorded"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
