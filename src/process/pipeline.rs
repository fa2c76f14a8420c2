//! Joining processes stdout-to-stdin and attributing failures.

use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::ProcessResult;
use super::runner::{Proc, SharedStdin};
use crate::classify;
use crate::error::{ExecError, StageFailure};

/// Which failures a pipeline reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeFailure {
    /// The stage that failed first in time; ties go to the earlier stage.
    #[default]
    First,
    /// Every failing stage, in pipeline order.
    All,
}

impl FromStr for PipeFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(PipeFailure::First),
            "all" => Ok(PipeFailure::All),
            other => Err(format!("unknown pipe failure policy: {other}")),
        }
    }
}

/// Feed `source`'s stdout into `sink`'s stdin. False when the sink's stdin
/// is not an open, unclaimed pipe.
pub(crate) fn connect(source: &Proc, sink: &Proc) -> bool {
    let Some(stdin) = sink.take_stdin() else {
        debug!("cannot pipe `{}` into `{}`: stdin unavailable", source.command, sink.command);
        return false;
    };
    source.control.set_piped();
    let chunks = source.stdout.subscribe();
    tokio::spawn(feed(chunks, stdin, sink.command.to_string()));
    true
}

async fn feed(mut chunks: mpsc::Receiver<Vec<u8>>, stdin: SharedStdin, command: String) {
    let mut stdin = stdin.lock().await;
    while let Some(chunk) = chunks.recv().await {
        // The reader exiting early (`head`) is normal; stop feeding.
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!("pipe into `{command}` closed: {e}");
            return;
        }
    }
    if let Err(e) = stdin.shutdown().await {
        debug!("closing pipe into `{command}`: {e}");
    }
}

/// Wait for every stage and classify the pipeline as a whole.
pub(crate) async fn settle(
    upstream: &[Arc<Proc>],
    last: &Arc<Proc>,
    policy: PipeFailure,
    unwired: &[usize],
) -> Result<ProcessResult, ExecError> {
    let mut outcomes = Vec::with_capacity(upstream.len() + 1);
    for proc in upstream.iter().chain(std::iter::once(last)) {
        outcomes.push((proc.clone(), proc.settled().await));
    }
    if let Some(&index) = unwired.first() {
        return Err(ExecError::PipeUnavailable { index });
    }

    let last_index = upstream.len();
    let mut failures = Vec::new();
    let mut last_outcome = None;
    for (index, (proc, settled)) in outcomes.into_iter().enumerate() {
        let outcome = classify::classify(&settled, &proc.options, proc.control.nothrow());
        match outcome {
            Ok(result) if index == last_index => last_outcome = Some(result),
            Ok(_) => {}
            Err(error) => failures.push((settled.finished, StageFailure { index, error })),
        }
    }

    match last_outcome {
        Some(result) if failures.is_empty() => Ok(result),
        _ => Err(attribute(failures, policy)),
    }
}

fn attribute(
    mut failures: Vec<(std::time::Instant, StageFailure)>,
    policy: PipeFailure,
) -> ExecError {
    match policy {
        PipeFailure::First => {
            failures.sort_by_key(|(finished, f)| (*finished, f.index));
            let mut failures = failures.into_iter().map(|(_, f)| f);
            match failures.next() {
                Some(first) => ExecError::PipelineStage {
                    index: first.index,
                    source: Box::new(first.error),
                },
                None => ExecError::PipelineStages {
                    failures: Vec::new(),
                },
            }
        }
        PipeFailure::All => {
            failures.sort_by_key(|(_, f)| f.index);
            ExecError::PipelineStages {
                failures: failures.into_iter().map(|(_, f)| f).collect(),
            }
        }
    }
}
