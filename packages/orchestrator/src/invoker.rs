//! External trainer invoker.
//!
//! Launches the training program once per task with the dataset ref and the
//! description as its last two arguments, waits for it, and reads the
//! artifact refs from its stdout. Output lines have the form
//! `<label>: <value>`; the value is everything after the first `": "`.
//! Labels are matched case-insensitively and lines may come in any order:
//!
//! | labels | meaning |
//! |---|---|
//! | `model`, `model url`, `model ref` | model artifact ref (required) |
//! | `doc`, `doc url`, `documentation url`, `doc ref` | documentation ref (required) |
//! | `duration_ms` | training time; measured here when absent |
//! | `algorithm` | algorithm identifier |
//! | `dataset_rows`, `dataset size` | number of dataset rows |
//! | `feature_count`, `features` | number of features |
//!
//! Any other line is ignored.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use training_core::TrainingMetadata;

use crate::trainer::{Trainer, TrainerError, TrainerFuture, TrainerOutput};

const DEFAULT_PROGRAM: &str = "python3";
const DEFAULT_SCRIPT: &str = "python/train_model.py";

/// How to launch the training program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments placed before the dataset ref and description.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: vec![DEFAULT_SCRIPT.to_string()],
            working_dir: None,
        }
    }
}

impl TrainerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `TRAINER_PROGRAM` (default: `python3`)
    /// - `TRAINER_SCRIPT` (default: `python/train_model.py`; set it empty to
    ///   run the program without a script argument)
    /// - `TRAINER_WORKDIR` (optional)
    pub fn from_env() -> Self {
        let program = std::env::var("TRAINER_PROGRAM")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());

        let args = match std::env::var("TRAINER_SCRIPT") {
            Ok(script) if script.trim().is_empty() => Vec::new(),
            Ok(script) => vec![script],
            Err(_) => vec![DEFAULT_SCRIPT.to_string()],
        };

        let working_dir = std::env::var("TRAINER_WORKDIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        Self {
            program,
            args,
            working_dir,
        }
    }
}

/// Runs the training program as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    config: Arc<TrainerConfig>,
}

impl ProcessTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }
}

impl Trainer for ProcessTrainer {
    fn name(&self) -> &str {
        &self.config.program
    }

    fn train(&self, dataset_ref: &str, description: &str) -> TrainerFuture {
        let config = self.config.clone();
        let dataset_ref = dataset_ref.to_string();
        let description = description.to_string();
        Box::pin(async move { run_trainer(&config, &dataset_ref, &description).await })
    }
}

async fn run_trainer(
    config: &TrainerConfig,
    dataset_ref: &str,
    description: &str,
) -> Result<TrainerOutput, TrainerError> {
    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .arg(dataset_ref)
        .arg(description)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    tracing::debug!("Launching trainer {} for {}", config.program, dataset_ref);

    let started = Instant::now();
    let output = command.output().await.map_err(|source| TrainerError::Spawn {
        program: config.program.clone(),
        source,
    })?;
    let elapsed = started.elapsed();

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(TrainerError::Exit {
            code: output.status.code(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report = parse_trainer_output(&stdout).map_err(|reason| TrainerError::MalformedOutput {
        reason,
        stderr,
    })?;

    Ok(report.into_output(elapsed))
}

/// Fields read from trainer stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainerReport {
    pub model_ref: String,
    pub doc_ref: String,
    pub duration_ms: Option<u64>,
    pub algorithm: Option<String>,
    pub dataset_rows: Option<u64>,
    pub feature_count: Option<u32>,
}

impl TrainerReport {
    /// Fill in the duration from the measured wall-clock time if the trainer
    /// did not report one.
    pub fn into_output(self, measured: Duration) -> TrainerOutput {
        let measured_ms = u64::try_from(measured.as_millis()).unwrap_or(u64::MAX);
        TrainerOutput {
            model_ref: self.model_ref,
            doc_ref: self.doc_ref,
            metadata: TrainingMetadata {
                duration_ms: self.duration_ms.unwrap_or(measured_ms),
                algorithm: self.algorithm,
                dataset_rows: self.dataset_rows,
                feature_count: self.feature_count,
            },
        }
    }
}

enum Label {
    Model,
    Doc,
    Duration,
    Algorithm,
    DatasetRows,
    FeatureCount,
}

fn classify(label: &str) -> Option<Label> {
    let normalized: String = label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    match normalized.as_str() {
        "model" | "model_url" | "model_ref" => Some(Label::Model),
        "doc" | "docs" | "doc_url" | "doc_ref" | "documentation" | "documentation_url" => {
            Some(Label::Doc)
        }
        "duration_ms" | "training_duration_ms" => Some(Label::Duration),
        "algorithm" => Some(Label::Algorithm),
        "dataset_rows" | "dataset_size" => Some(Label::DatasetRows),
        "feature_count" | "features" => Some(Label::FeatureCount),
        _ => None,
    }
}

fn set_required(slot: &mut Option<String>, name: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("empty value for '{}'", name));
    }
    if slot.is_some() {
        return Err(format!("'{}' reported more than once", name));
    }
    *slot = Some(value.to_string());
    Ok(())
}

fn parse_optional<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable trainer {} value: {}", name, value);
            None
        }
    }
}

/// Read artifact refs and metadata from trainer stdout.
///
/// Returns a reason string when a required label is missing, empty or
/// repeated.
pub fn parse_trainer_output(stdout: &str) -> Result<TrainerReport, String> {
    let mut model = None;
    let mut doc = None;
    let mut report = TrainerReport::default();

    for line in stdout.lines() {
        let Some((label, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match classify(label) {
            Some(Label::Model) => set_required(&mut model, "model", value)?,
            Some(Label::Doc) => set_required(&mut doc, "doc", value)?,
            Some(Label::Duration) => report.duration_ms = parse_optional("duration_ms", value),
            Some(Label::Algorithm) if !value.is_empty() => {
                report.algorithm = Some(value.to_string())
            }
            Some(Label::DatasetRows) => report.dataset_rows = parse_optional("dataset_rows", value),
            Some(Label::FeatureCount) => {
                report.feature_count = parse_optional("feature_count", value)
            }
            _ => {}
        }
    }

    match (model, doc) {
        (Some(model_ref), Some(doc_ref)) => Ok(TrainerReport {
            model_ref,
            doc_ref,
            ..report
        }),
        (None, None) => Err("missing 'model' and 'doc' lines".to_string()),
        (None, Some(_)) => Err("missing 'model' line".to_string()),
        (Some(_), None) => Err("missing 'doc' line".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_by_name_not_position() {
        let report = parse_trainer_output("doc: docs/b.pdf\nmodel: models/a.pkl\n").unwrap();
        assert_eq!(report.model_ref, "models/a.pkl");
        assert_eq!(report.doc_ref, "docs/b.pdf");
    }

    #[test]
    fn value_is_text_after_first_separator() {
        let report = parse_trainer_output(
            "Model URL: https://cdn.example.com/models/a.pkl\r\n\
             Documentation URL: https://cdn.example.com/docs/a.pdf\r\n",
        )
        .unwrap();
        assert_eq!(report.model_ref, "https://cdn.example.com/models/a.pkl");
        assert_eq!(report.doc_ref, "https://cdn.example.com/docs/a.pdf");

        let report = parse_trainer_output("model: s3: bucket\ndoc: d\n").unwrap();
        assert_eq!(report.model_ref, "s3: bucket");
    }

    #[test]
    fn metadata_lines_are_optional() {
        let report = parse_trainer_output(
            "Training started\n\
             algorithm: RandomForest\n\
             dataset_rows: 150\n\
             feature_count: 4\n\
             duration_ms: not-a-number\n\
             model: m\n\
             doc: d\n",
        )
        .unwrap();
        assert_eq!(report.algorithm.as_deref(), Some("RandomForest"));
        assert_eq!(report.dataset_rows, Some(150));
        assert_eq!(report.feature_count, Some(4));
        assert_eq!(report.duration_ms, None);

        let output = report.into_output(Duration::from_millis(1500));
        assert_eq!(output.metadata.duration_ms, 1500);
    }

    #[test]
    fn reported_duration_wins_over_measured() {
        let report = parse_trainer_output("model: m\ndoc: d\nduration_ms: 42\n").unwrap();
        let output = report.into_output(Duration::from_secs(9));
        assert_eq!(output.metadata.duration_ms, 42);
    }

    #[test]
    fn missing_empty_or_repeated_labels_are_rejected() {
        assert!(parse_trainer_output("").is_err());
        assert!(parse_trainer_output("model: m\n").is_err());
        assert!(parse_trainer_output("model: m\ndoc: \n").is_err());
        assert!(parse_trainer_output("model: m\nmodel: n\ndoc: d\n").is_err());
        // No separator, no label.
        assert!(parse_trainer_output("model:m\ndoc:d\n").is_err());
    }

    #[test]
    fn env_defaults_run_the_python_script() {
        let config = TrainerConfig::default();
        assert_eq!(config.program, "python3");
        assert_eq!(config.args, vec!["python/train_model.py".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_success_is_parsed() {
        let trainer = ProcessTrainer::new(
            TrainerConfig::new("sh")
                .with_arg("-c")
                .with_arg("echo \"doc: docs/$0.pdf\"; echo \"model: models/$0.pkl\"; echo \"algorithm: $1\""),
        );
        let output = trainer
            .train("iris", "LogisticRegression")
            .await
            .unwrap();
        assert_eq!(output.model_ref, "models/iris.pkl");
        assert_eq!(output.doc_ref, "docs/iris.pdf");
        assert_eq!(output.metadata.algorithm.as_deref(), Some("LogisticRegression"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_failure_captures_stderr() {
        let trainer = ProcessTrainer::new(
            TrainerConfig::new("sh")
                .with_arg("-c")
                .with_arg("echo 'model: m'; echo 'bad dataset' >&2; exit 3"),
        );
        let err = trainer.train("iris", "classify").await.unwrap_err();
        match &err {
            TrainerError::Exit { code, stderr } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "bad dataset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let trainer = ProcessTrainer::new(TrainerConfig::new("/nonexistent/trainer-binary"));
        let err = trainer.train("iris", "classify").await.unwrap_err();
        assert!(matches!(err, TrainerError::Spawn { .. }));
        assert_eq!(err.stderr(), "");
    }
}
