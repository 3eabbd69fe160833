/// Job Executor
///
/// Runs the tasks of a job in order on a `ContainerRuntime` and records one
/// `TaskExecution` per task that ran.
///
/// ## Execution Rules
/// - Each task's files are written into the working directory before its
///   command runs
/// - The command's redirected stdout (`$CODERUN_OUTPUT`) becomes the result
/// - Exit code 0 → task Completed, anything else → Failed
/// - The first failed task stops the job; the job is then Failed
/// - Runtime errors (image pull, daemon unreachable) fail the task with the
///   error text

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use coderun_common::language::OUTPUT_ENV;
use coderun_common::types::{Job, JobState, TaskExecution, TaskSpec, TaskState};
use coderun_common::units;
use tracing::{info, warn};

use crate::runtime::{ContainerOutput, ContainerRuntime, ContainerSpec};

pub const WORKING_DIR: &str = "/workspace";
pub const OUTPUT_PATH: &str = "/tmp/coderun-output";

/// Run every task of `job` and return it in its terminal state
pub async fn execute_job<R: ContainerRuntime + ?Sized>(mut job: Job, runtime: &R) -> Job {
    info!(job_id = %job.id, tasks = job.tasks.len(), "Executing job");

    let mut state = JobState::Completed;
    for (index, task) in job.tasks.iter().enumerate() {
        let execution = run_task(&job, index, task, runtime).await;
        let failed = execution.state == TaskState::Failed;
        job.execution.push(execution);
        if failed {
            state = JobState::Failed;
            break;
        }
    }

    job.state = state;
    info!(job_id = %job.id, state = %job.state, "Job finished");
    job
}

async fn run_task<R: ContainerRuntime + ?Sized>(
    job: &Job,
    index: usize,
    task: &TaskSpec,
    runtime: &R,
) -> TaskExecution {
    let started_at = Utc::now();
    let outcome = match container_spec(job, index, task) {
        Ok(spec) => runtime.run(&spec).await.map(|out| (spec.timeout, out)),
        Err(e) => Err(e),
    };

    let (state, result, error) = match outcome {
        Ok((_, out)) if out.exit_code == 0 && !out.timed_out => {
            (TaskState::Completed, out.stdout, String::new())
        }
        Ok((timeout, out)) => (TaskState::Failed, String::new(), failure_text(&out, timeout)),
        Err(e) => {
            warn!(job_id = %job.id, task = %task.name, "Task could not run: {:#}", e);
            (TaskState::Failed, String::new(), format!("{:#}", e))
        }
    };

    TaskExecution {
        state,
        result,
        error,
        started_at,
        completed_at: Some(Utc::now()),
    }
}

fn failure_text(out: &ContainerOutput, timeout: std::time::Duration) -> String {
    if out.timed_out {
        return format!("task timed out after {}", humantime::format_duration(timeout));
    }
    if out.stderr.trim().is_empty() {
        format!("exit code {}", out.exit_code)
    } else {
        out.stderr.clone()
    }
}

/// Translate a task into a container run
pub fn container_spec(job: &Job, index: usize, task: &TaskSpec) -> anyhow::Result<ContainerSpec> {
    let timeout = task.timeout_duration()?;
    let (nano_cpus, memory_bytes) = match &task.limits {
        Some(limits) => (
            Some(units::parse_cpus(&limits.cpus)?),
            Some(units::parse_memory(&limits.memory)?),
        ),
        None => (None, None),
    };

    let mut env = vec![format!("{}={}", OUTPUT_ENV, OUTPUT_PATH)];
    let mut script = String::new();
    for (i, (name, content)) in task.files.iter().enumerate() {
        let var = format!("CODERUN_FILE_{}", i);
        env.push(format!("{}={}", var, general_purpose::STANDARD.encode(content)));

        let path = shell_quote(name);
        if let Some((dir, _)) = name.rsplit_once('/') {
            script.push_str(&format!("mkdir -p {} || exit 125\n", shell_quote(dir)));
        }
        script.push_str(&format!(
            "printf '%s' \"${}\" | base64 -d > {} || exit 125\n",
            var, path
        ));
    }
    script.push_str(&format!(": > \"${}\"\n", OUTPUT_ENV));
    // only the output file reaches stdout; anything else the command prints
    // is diagnostics
    script.push_str(&format!("(\n{}\n) 1>&2\n", task.run));
    script.push_str(&format!("status=$?\ncat \"${}\"\nexit $status\n", OUTPUT_ENV));

    Ok(ContainerSpec {
        name: format!("coderun-{}-{}", job.id, index),
        image: task.image.clone(),
        script,
        env,
        working_dir: WORKING_DIR.to_string(),
        nano_cpus,
        memory_bytes,
        timeout,
    })
}

/// Single-quote a word for `sh`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
