//! Model verdicts from a user-configured inference command.
//!
//! The command receives the sentence on stdin and prints a JSON answer on
//! stdout, either a single label with its score:
//!
//! ```text
//! {"label": "SARCASTIC", "score": 0.87}
//! ```
//!
//! or a score per label, from which the highest wins:
//!
//! ```text
//! {"scores": {"NORMAL": 0.13, "SARCASTIC": 0.87}}
//! ```
//!
//! The answer is rendered into the verdict text that a correction later
//! carries back through [`LabelParser::parse`].
use crate::error::InferenceError;
use crate::label::{LabelCode, LabelParser};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// A rendered verdict plus the label it names.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: LabelCode,
    pub certainty: f64,
    pub verdict: String,
    pub elapsed: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelAnswer {
    Single { label: String, score: f64 },
    Scores { scores: BTreeMap<String, f64> },
}

/// Run `command` on `sentence` and render its answer as a verdict.
pub fn classify(
    command: &str,
    sentence: &str,
    parser: &LabelParser,
) -> Result<Classification, InferenceError> {
    let start = Instant::now();
    let stdout = invoke_model_command(command, sentence)?;
    let elapsed = start.elapsed();
    let (label, certainty) = parse_answer(&stdout, parser)?;
    let verdict = parser
        .render(label, certainty, elapsed)
        .ok_or_else(|| InferenceError::Response(format!("label code {label} has no name")))?;
    Ok(Classification {
        label,
        certainty,
        verdict,
        elapsed,
    })
}

fn invoke_model_command(command: &str, input: &str) -> Result<String, InferenceError> {
    let args = shell_words::split(command).map_err(|err| InferenceError::Command {
        command: command.to_string(),
        detail: err.to_string(),
    })?;
    let Some((program, rest)) = args.split_first() else {
        return Err(InferenceError::Command {
            command: command.to_string(),
            detail: "command is empty".to_string(),
        });
    };
    let spawn_error = |source| InferenceError::Spawn {
        program: program.clone(),
        source,
    };

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;
    if let Some(mut stdin) = child.stdin.take() {
        // A model that exits without reading stdin is judged by its status.
        if let Err(err) = stdin.write_all(input.as_bytes()) {
            tracing::debug!(error = %err, "model command closed stdin early");
        }
    }
    let output = child.wait_with_output().map_err(spawn_error)?;
    let elapsed_ms = start.elapsed().as_millis();

    tracing::info!(
        elapsed_ms,
        program = %program,
        input_bytes = input.len(),
        response_bytes = output.stdout.len(),
        "model invoke complete"
    );

    if !output.status.success() {
        return Err(InferenceError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    String::from_utf8(output.stdout)
        .map_err(|err| InferenceError::Response(format!("stdout is not UTF-8: {err}")))
}

fn parse_answer(text: &str, parser: &LabelParser) -> Result<(LabelCode, f64), InferenceError> {
    let answer: ModelAnswer = serde_json::from_str(text.trim())
        .map_err(|err| InferenceError::Response(format!("{err}: {}", text.trim())))?;
    let (name, score) = match answer {
        ModelAnswer::Single { label, score } => (label, score),
        ModelAnswer::Scores { scores } => scores
            .into_iter()
            .filter(|(_, score)| score.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| InferenceError::Response("no finite scores".to_string()))?,
    };
    if !score.is_finite() {
        return Err(InferenceError::Response(format!(
            "score for {name} is not finite"
        )));
    }
    let code = parser
        .table()
        .code_for(&name)
        .ok_or_else(|| InferenceError::Response(format!("unknown label {name:?}")))?;
    Ok((code, score))
}
