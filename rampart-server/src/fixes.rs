//! Fix passes (§2 "Server glue", gated by `ServerOptions::run_fixes`): a startup consistency
//! sweep over every persisted job, logging anything a crash could have left inconsistent so an
//! operator notices before the normal resume pass papers over it.
use rampart_engine::{JobData, JobRunner, JobState};
use rampart_integration::error::Error;
use tracing::warn;

/// Scans every persisted job for states a clean shutdown never leaves behind: `Running` (the
/// process died before the KV was told the job was paused/cancelled; the resume pass picks these
/// back up as if the operator had asked for a restart) and `Paused` without `needsManualResume`
/// set (the runner's own invariant is that a non-manual pause is always a crash artifact, since
/// operator pauses always set the flag). Neither is fixed here — the resume pass in
/// `Server::start` is the fix — this only makes the crash visible in the log.
pub fn run_fixes(runner: &JobRunner) -> Result<(), Error> {
    let mut inconsistent = 0usize;

    runner.scan(
        |job: &JobData| matches!(job.state, JobState::Running) || (job.state == JobState::Paused && !job.flags.needs_manual_resume()),
        |job: &JobData| {
            inconsistent += 1;
            warn!(uid = %job.uid, typename = %job.typename, state = ?job.state, "fix pass: job left in a non-clean-shutdown state, will be resumed on startup");
        },
    )?;

    if inconsistent > 0 {
        warn!(count = inconsistent, "fix pass complete: jobs found in a crash-consistent state");
    }

    Ok(())
}
