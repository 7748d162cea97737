/// Runs batch files and the scripted demo against the reference host

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use hostbatch_core::wire::{self, BatchResponse};
use hostbatch_core::{Arg, ChannelBridge, Deferred, Dispatcher, ObjectRef, Target};
use hostbatch_host::{spawn_service, HostOptions, Interpreter, PrintSink};
use tracing::info;

use crate::error::{CliError, Result};

/// Options shared by every command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Largest batch the host accepts
    pub max_records: Option<usize>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_records(mut self, limit: Option<usize>) -> Self {
        self.max_records = limit;
        self
    }

    fn interpreter(&self, print_sink: PrintSink) -> Interpreter {
        let mut options = HostOptions::new().print_sink(print_sink);
        if let Some(limit) = self.max_records {
            options = options.max_records(limit);
        }
        Interpreter::with_options(options)
    }
}

/// Result of running one batch file
#[derive(Debug)]
pub struct ExecOutput {
    pub source_file: PathBuf,
    pub records: usize,
    pub response: BatchResponse,
    /// Lines the batch printed on the host
    pub printed: Vec<String>,
}

impl ExecOutput {
    /// The response map with keys in a stable order
    pub fn response_json(&self) -> Result<String> {
        let sorted: BTreeMap<_, _> = self.response.iter().collect();
        Ok(serde_json::to_string_pretty(&sorted)?)
    }
}

/// Execute a wire-format batch file on a fresh host.
pub fn exec(input: &Path, options: &RunOptions) -> Result<ExecOutput> {
    let source = fs::read_to_string(input).map_err(|source| CliError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let batch = wire::decode_batch(&source).map_err(|source| CliError::Batch {
        file: input.to_path_buf(),
        source,
    })?;
    info!(file = %input.display(), records = batch.len(), "executing batch file");

    let (print_tx, print_rx) = mpsc::channel();
    let mut interpreter = options.interpreter(print_tx);
    let response = interpreter.execute_batch(&batch)?;

    Ok(ExecOutput {
        source_file: input.to_path_buf(),
        records: batch.len(),
        response,
        printed: print_rx.try_iter().collect(),
    })
}

/// Result of the scripted demo session
#[derive(Debug)]
pub struct DemoOutput {
    /// What the client saw, one line per step
    pub transcript: Vec<String>,
    /// Lines printed on the host
    pub printed: Vec<String>,
    /// Round trips the host served
    pub batches: usize,
}

/// Run the scripted client session against a host service task.
///
/// The client blocks on each round trip, so it runs on a blocking thread
/// while the host drains its channel on the runtime.
pub async fn demo(options: &RunOptions) -> Result<DemoOutput> {
    let (print_tx, print_rx) = mpsc::channel();
    let (bridge, service) = spawn_service(options.interpreter(print_tx));

    let transcript = tokio::task::spawn_blocking(move || scripted_session(bridge)).await??;
    let batches = service.await?;
    info!(batches, "demo finished");

    Ok(DemoOutput {
        transcript,
        printed: print_rx.try_iter().collect(),
        batches,
    })
}

fn scripted_session(bridge: ChannelBridge) -> hostbatch_core::Result<Vec<String>> {
    let dispatcher = Dispatcher::new(bridge);
    let mut transcript = Vec::new();

    dispatcher.begin_batch()?;
    let canvas: Deferred<ObjectRef> =
        dispatcher.invoke_with_result(Target::Global, "createObject", vec![Arg::from("Canvas")])?;
    dispatcher.set_property(&canvas, "width", 320i64)?;
    dispatcher.set_property(&canvas, "height", 200i64)?;
    dispatcher.set_property(&canvas, "title", "hostbatch")?;
    let width: Deferred<i64> = dispatcher.get_property(&canvas, "width")?;
    let height: Deferred<i64> = dispatcher.get_property(&canvas, "height")?;
    let title: Deferred<String> = dispatcher.get_property(&canvas, "title")?;

    let area = &width * &height;
    let wide = width.greater(&height);
    let padded = 10i64 + &width;
    let title_length = title.length();
    dispatcher.invoke(Target::Global, "print", vec![Arg::from("area"), Arg::from(&area)])?;

    transcript.push(format!("queued {} records", dispatcher.queued_len()));
    let summary = dispatcher.end_batch()?;
    transcript.push(format!(
        "sent {} records, {} results resolved",
        summary.records, summary.resolved
    ));
    transcript.push(format!("canvas = {canvas}"));
    transcript.push(format!("area = {area}"));
    transcript.push(format!("wide = {wide}"));
    transcript.push(format!("10 + width = {padded}"));
    transcript.push(format!("title length = {title_length}"));

    // Both operands are known now.
    let half = &area / 2i64;
    transcript.push(format!(
        "area / 2 = {half} ({} records queued)",
        dispatcher.queued_len()
    ));

    // Outside a batch this is its own round trip.
    let object = dispatcher.object(canvas.try_value()?);
    object.set("visible", true)?;
    transcript.push(format!("visible = {}", object.get::<bool>("visible")?));

    Ok(transcript)
}
