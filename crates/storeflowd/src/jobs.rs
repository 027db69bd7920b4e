//! Job list loading.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context};

use storeflow_core::{Job, JobRequest};

/// Read a JSON array of `{ "id"?: string, "payload": any }` entries.
/// Entries without an id get a generated one.
pub fn load_jobs(path: &Path) -> anyhow::Result<Vec<Job>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading job list {}", path.display()))?;
    parse_jobs(&content).with_context(|| format!("parsing job list {}", path.display()))
}

pub fn parse_jobs(content: &str) -> anyhow::Result<Vec<Job>> {
    let requests: Vec<JobRequest> = serde_json::from_str(content)?;
    let jobs: Vec<Job> = requests.into_iter().map(JobRequest::into_job).collect();

    let mut seen = HashSet::new();
    for job in &jobs {
        if !seen.insert(job.id.as_str()) {
            bail!("job id '{}' appears more than once", job.id);
        }
    }
    Ok(jobs)
}
