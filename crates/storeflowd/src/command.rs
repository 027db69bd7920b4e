//! Command-backed processor.
//!
//! Runs an external program once per job. The job payload is written to the
//! child's stdin as JSON; exit status 0 means success and stdout, when it
//! parses as JSON, becomes the job's result data. Each processor instance
//! owns a scratch directory that the program can use as a persistent
//! profile (cookies, downloads) across the jobs it serves.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use storeflow_core::{Job, ProcessOutcome};
use storeflow_scheduler::Processor;

/// Scratch state handed to the program through the environment.
#[derive(Debug)]
pub struct CommandSlot {
    pub index: u64,
    pub dir: PathBuf,
    pub runs: u32,
}

/// Process-wide slot counter; scratch directory names are derived from it.
static NEXT_SLOT: AtomicU64 = AtomicU64::new(0);

pub struct CommandProcessor {
    program: String,
    args: Vec<String>,
    scratch_root: PathBuf,
}

impl CommandProcessor {
    /// `argv[0]` is the program, the rest are its arguments.
    pub fn new(argv: Vec<String>) -> anyhow::Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next().context("no command given")?;
        Ok(Self {
            program,
            args: argv.collect(),
            scratch_root: std::env::temp_dir(),
        })
    }

    /// Put slot directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: PathBuf) -> Self {
        self.scratch_root = root;
        self
    }
}

impl Processor for CommandProcessor {
    type Instance = CommandSlot;

    async fn create_instance(&self) -> anyhow::Result<CommandSlot> {
        let index = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .scratch_root
            .join(format!("storeflow-{}-slot-{index}", std::process::id()));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating slot directory {}", dir.display()))?;
        debug!(slot = index, dir = %dir.display(), "slot directory created");
        Ok(CommandSlot {
            index,
            dir,
            runs: 0,
        })
    }

    async fn process(&self, slot: &mut CommandSlot, job: &Job) -> anyhow::Result<ProcessOutcome> {
        let payload = serde_json::to_vec(&job.payload)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("STOREFLOW_JOB_ID", &job.id)
            .env("STOREFLOW_ATTEMPT", job.attempts.to_string())
            .env("STOREFLOW_SLOT_DIR", &slot.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to run '{}'", self.program))?;
        slot.runs += 1;

        let mut stdin = child.stdin.take().context("child stdin not captured")?;
        let feed = async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("waiting for command")?;
        if let Err(e) = fed {
            // The program may exit without reading its input.
            debug!(job_id = %job.id, error = %e, "payload not fully written");
        }

        if output.status.success() {
            Ok(ProcessOutcome::success(parse_stdout(&output.stdout)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(ProcessOutcome::failure(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                last_line(&stderr, 500)
            )))
        }
    }

    async fn destroy_instance(&self, slot: CommandSlot) {
        if let Err(e) = tokio::fs::remove_dir_all(&slot.dir).await {
            warn!(slot = slot.index, error = %e, "failed to remove slot directory");
        }
        debug!(slot = slot.index, runs = slot.runs, "slot released");
    }
}

/// JSON when stdout parses as JSON, a string otherwise, nothing when empty.
fn parse_stdout(stdout: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn last_line(text: &str, max_chars: usize) -> String {
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
        .trim();
    line.chars().take(max_chars).collect()
}
