//! The Job Runner (§4.4): a durable supervisor over in-process trader tasks. Grounded in the
//! teacher's engine/system split (`barter/src/engine/mod.rs`, `barter/src/system/mod.rs`) for the
//! supervisor shape, generalized from "one engine" to "one task per job" since this spec's runner
//! multiplexes many independent, individually pausable/cancelable jobs rather than one engine
//! loop.
use dashmap::DashMap;
use rampart_integration::{
    error::{CancelCause, Error},
    kv::Kv,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc};
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A job's persisted lifecycle. Terminal states (`Completed`, `Canceled`, `Failed`) are sticky.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum JobState {
    Running,
    Paused,
    Completed,
    Canceled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

/// Which trader model a job's `uid` names. One dispatch point downstream, at the runner boundary
/// (§9 "Dynamic polymorphism").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum TraderType {
    Limiter,
    Looper,
    Waller,
    Watcher,
}

impl std::fmt::Display for TraderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Limiter => "limiter",
            Self::Looper => "looper",
            Self::Waller => "waller",
            Self::Watcher => "watcher",
        };
        write!(f, "{s}")
    }
}

/// Bit 0 is `needsManualResume`: set whenever an operator (rather than the job's own lifecycle)
/// paused the job, so that startup never auto-resumes it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct JobFlags(pub u32);

impl JobFlags {
    pub const NEEDS_MANUAL_RESUME: u32 = 1 << 0;

    pub fn needs_manual_resume(&self) -> bool {
        self.0 & Self::NEEDS_MANUAL_RESUME != 0
    }

    pub fn set_needs_manual_resume(&mut self, value: bool) {
        if value {
            self.0 |= Self::NEEDS_MANUAL_RESUME;
        } else {
            self.0 &= !Self::NEEDS_MANUAL_RESUME;
        }
    }
}

/// The durable record persisted at `/jobs/<uid>`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct JobData {
    pub uid: Uuid,
    pub typename: TraderType,
    pub state: JobState,
    pub flags: JobFlags,
    pub last_error: Option<String>,
}

impl JobData {
    fn key(uid: Uuid) -> Vec<u8> {
        format!("/jobs/{uid}").into_bytes()
    }

    fn load(tx: &dyn rampart_integration::kv::Transaction, uid: Uuid) -> Result<Option<Self>, Error> {
        tx.get(&Self::key(uid))?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|err| Error::internal(err.to_string())))
            .transpose()
    }

    fn store(tx: &dyn rampart_integration::kv::TransactionMut, data: &Self) -> Result<(), Error> {
        let bytes = serde_json::to_vec(data).map_err(|err| Error::internal(err.to_string()))?;
        tx.set(&Self::key(data.uid), &bytes)
    }
}

/// The in-memory half of a live job: the cancellation handle and the join handle the runner
/// awaits when pausing or cancelling. Not persisted; reconstructed by `resume` after a restart.
struct LiveJob {
    cancellation: CancellationToken,
    cause: Arc<std::sync::Mutex<Option<CancelCause>>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

/// Durable supervisor over per-job tasks (§4.4). Every externally visible state transition is
/// committed to the KV before the API call that caused it returns.
pub struct JobRunner {
    kv: Arc<dyn Kv>,
    live: DashMap<Uuid, Arc<LiveJob>>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner").field("live_jobs", &self.live.len()).finish()
    }
}

impl JobRunner {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv, live: DashMap::new() }
    }

    /// Creates a durable job record in `Paused` state. Refuses duplicates.
    pub fn add(&self, uid: Uuid, typename: TraderType) -> Result<JobData, Error> {
        let mut created = None;
        self.kv.with_read_writer(&mut |tx| {
            if JobData::load(tx, uid)?.is_some() {
                return Err(Error::exist(format!("job {uid} already exists")));
            }
            let data = JobData {
                uid,
                typename,
                state: JobState::Paused,
                flags: JobFlags::default(),
                last_error: None,
            };
            JobData::store(tx, &data)?;
            created = Some(data);
            Ok(())
        })?;
        Ok(created.expect("with_read_writer succeeded without storing a value"))
    }

    pub fn get(&self, uid: Uuid) -> Result<JobData, Error> {
        let mut found = None;
        self.kv.with_reader(&mut |tx| {
            found = JobData::load(tx, uid)?;
            Ok(())
        })?;
        found.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))
    }

    /// Iterates every persisted job under a read transaction, calling `visit` for each one that
    /// passes `filter`.
    pub fn scan(
        &self,
        filter: impl Fn(&JobData) -> bool,
        mut visit: impl FnMut(&JobData),
    ) -> Result<(), Error> {
        self.kv.with_reader(&mut |tx| {
            for (_, value) in tx.scan(b"/jobs/")? {
                let data: JobData =
                    serde_json::from_slice(&value).map_err(|err| Error::internal(err.to_string()))?;
                if filter(&data) {
                    visit(&data);
                }
            }
            Ok(())
        })
    }

    pub fn update_flags(&self, uid: Uuid, flags: JobFlags) -> Result<(), Error> {
        self.kv.with_read_writer(&mut |tx| {
            let mut data = JobData::load(tx, uid)?.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))?;
            data.flags = flags;
            JobData::store(tx, &data)
        })
    }

    /// Spawns `func` under a child of `parent`, persisting `Running` before returning. On return,
    /// persists the terminal state implied by the outcome, unless the job was paused (in which
    /// case [`JobRunner::pause`] persists `Paused` itself).
    pub fn resume<F, Fut>(&self, uid: Uuid, parent: &CancellationToken, func: F) -> Result<JobState, Error>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.kv.with_read_writer(&mut |tx| {
            let mut data = JobData::load(tx, uid)?.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))?;
            if data.state.is_terminal() {
                return Err(Error::invalid(format!("job {uid} is in terminal state {:?}", data.state)));
            }
            data.state = JobState::Running;
            data.flags.set_needs_manual_resume(false);
            data.last_error = None;
            JobData::store(tx, &data)
        })?;

        let cancellation = parent.child_token();
        let cause = Arc::new(std::sync::Mutex::new(None));

        let task_cancellation = cancellation.clone();
        let task_cause = Arc::clone(&cause);
        let kv = Arc::clone(&self.kv);

        let handle = tokio::spawn(async move {
            let outcome = func(task_cancellation.clone()).await;
            Self::complete(&kv, uid, outcome, &task_cause, &task_cancellation);
        });

        self.live.insert(
            uid,
            Arc::new(LiveJob {
                cancellation,
                cause,
                handle: AsyncMutex::new(Some(handle)),
            }),
        );

        Ok(JobState::Running)
    }

    /// Persists the state a job's completion implies. Skipped (left to the caller) when the task
    /// was cancelled for `Pause` or `Shutdown`, since neither is a terminal transition.
    fn complete(
        kv: &Arc<dyn Kv>,
        uid: Uuid,
        outcome: Result<(), Error>,
        cause: &Arc<std::sync::Mutex<Option<CancelCause>>>,
        cancellation: &CancellationToken,
    ) {
        let cause = *cause.lock().expect("cause mutex poisoned");

        if cancellation.is_cancelled() && matches!(cause, Some(CancelCause::Pause) | Some(CancelCause::Shutdown)) {
            debug!(%uid, ?cause, "job task returned after pause/shutdown, leaving state for the caller to persist");
            return;
        }

        let next_state = if cancellation.is_cancelled() {
            JobState::Canceled
        } else {
            match &outcome {
                Ok(()) => JobState::Completed,
                Err(_) => JobState::Failed,
            }
        };

        let result = kv.with_read_writer(&mut |tx| {
            let mut data = match JobData::load(tx, uid)? {
                Some(data) => data,
                None => return Ok(()),
            };
            if data.state.is_terminal() {
                return Ok(());
            }
            data.state = next_state;
            data.last_error = outcome.as_ref().err().map(ToString::to_string);
            JobData::store(tx, &data)
        });

        match result {
            Ok(()) => info!(%uid, state = ?next_state, "job reached terminal state"),
            Err(err) => error!(%uid, %err, "failed to persist job terminal state"),
        }
    }

    async fn suspend(&self, uid: Uuid, with_cause: CancelCause) -> Result<Option<Arc<LiveJob>>, Error> {
        let Some(live) = self.live.get(&uid).map(|entry| Arc::clone(&entry)) else {
            return Ok(None);
        };

        *live.cause.lock().expect("cause mutex poisoned") = Some(with_cause);
        live.cancellation.cancel();

        let handle = live.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(%uid, %err, "job task panicked");
            }
        }

        self.live.remove(&uid);
        Ok(Some(live))
    }

    /// Cancels the live job with cause `Pause`, waits for it to exit, then persists `Paused`.
    /// Idempotent from `Paused`; errors if the job is already terminal.
    pub async fn pause(&self, uid: Uuid) -> Result<JobState, Error> {
        let current = self.get(uid)?;
        if current.state == JobState::Paused {
            return Ok(JobState::Paused);
        }
        if current.state.is_terminal() {
            return Err(Error::invalid(format!("job {uid} is in terminal state {:?}", current.state)));
        }

        self.suspend(uid, CancelCause::Pause).await?;

        self.kv.with_read_writer(&mut |tx| {
            let mut data = JobData::load(tx, uid)?.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))?;
            if !data.state.is_terminal() {
                data.state = JobState::Paused;
                data.flags.set_needs_manual_resume(true);
                JobData::store(tx, &data)?;
            }
            Ok(())
        })?;

        Ok(JobState::Paused)
    }

    /// Cancels the live job with cause `Cancel`, waits for it to exit, then persists `Canceled`.
    /// Idempotent from `Canceled`/`Completed`/`Failed`.
    pub async fn cancel(&self, uid: Uuid) -> Result<JobState, Error> {
        let current = self.get(uid)?;
        if current.state.is_terminal() {
            return Ok(current.state);
        }

        self.suspend(uid, CancelCause::Cancel).await?;

        self.kv.with_read_writer(&mut |tx| {
            let mut data = JobData::load(tx, uid)?.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))?;
            if !data.state.is_terminal() {
                data.state = JobState::Canceled;
                JobData::store(tx, &data)?;
            }
            Ok(())
        })?;

        Ok(JobState::Canceled)
    }

    /// Cancels the live job with cause `Shutdown`, waits for it to exit, then persists it as
    /// resumable: `Paused` with `needsManualResume` left untouched, so a job that was simply
    /// `Running` is picked back up by the next startup's resume pass, and a job an operator had
    /// already paused stays paused. Idempotent from any terminal state.
    pub async fn shutdown(&self, uid: Uuid) -> Result<JobState, Error> {
        let current = self.get(uid)?;
        if current.state.is_terminal() {
            return Ok(current.state);
        }

        self.suspend(uid, CancelCause::Shutdown).await?;

        self.kv.with_read_writer(&mut |tx| {
            let mut data = JobData::load(tx, uid)?.ok_or_else(|| Error::not_exist(format!("job {uid} not found")))?;
            if !data.state.is_terminal() {
                data.state = JobState::Paused;
                JobData::store(tx, &data)?;
            }
            Ok(())
        })?;

        Ok(JobState::Paused)
    }

    /// Suspends every live job for shutdown, best-effort; continues on a per-job error.
    pub async fn stop_all(&self) {
        let uids: Vec<Uuid> = self.live.iter().map(|entry| *entry.key()).collect();
        for uid in uids {
            if let Err(err) = self.shutdown(uid).await {
                warn!(%uid, %err, "stop_all: failed to suspend job for shutdown");
            }
        }
    }

    pub fn is_live(&self, uid: Uuid) -> bool {
        self.live.contains_key(&uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_integration::kv::MemoryKv;

    fn runner() -> JobRunner {
        JobRunner::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn add_refuses_a_duplicate_uid() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();
        let err = runner.add(uid, TraderType::Limiter).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn resume_persists_running_and_pause_persists_paused_with_manual_resume() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();

        let parent = CancellationToken::new();
        runner
            .resume(uid, &parent, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        assert_eq!(runner.get(uid).unwrap().state, JobState::Running);

        let state = runner.pause(uid).await.unwrap();
        assert_eq!(state, JobState::Paused);
        let data = runner.get(uid).unwrap();
        assert_eq!(data.state, JobState::Paused);
        assert!(data.flags.needs_manual_resume());
    }

    #[tokio::test]
    async fn pause_is_idempotent_once_already_paused() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();
        assert_eq!(runner.pause(uid).await.unwrap(), JobState::Paused);
        assert_eq!(runner.pause(uid).await.unwrap(), JobState::Paused);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_from_every_terminal_state() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();

        let parent = CancellationToken::new();
        runner
            .resume(uid, &parent, |_| async move { Ok(()) })
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runner.get(uid).unwrap().state, JobState::Completed);

        // Cancelling an already-completed job is a no-op that returns its terminal state.
        assert_eq!(runner.cancel(uid).await.unwrap(), JobState::Completed);
    }

    #[tokio::test]
    async fn resume_refuses_a_terminal_job() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();
        runner.cancel(uid).await.unwrap();

        let parent = CancellationToken::new();
        let err = runner
            .resume(uid, &parent, |_| async move { Ok(()) })
            .unwrap_err();
        assert!(err.to_string().contains("terminal state"));
    }

    #[tokio::test]
    async fn explicit_resume_clears_needs_manual_resume() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();

        let parent = CancellationToken::new();
        runner
            .resume(uid, &parent, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        runner.pause(uid).await.unwrap();
        assert!(runner.get(uid).unwrap().flags.needs_manual_resume());

        runner
            .resume(uid, &parent, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        assert!(!runner.get(uid).unwrap().flags.needs_manual_resume());
    }

    #[tokio::test]
    async fn shutdown_persists_paused_without_manual_resume_unlike_an_operator_pause() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();

        let parent = CancellationToken::new();
        runner
            .resume(uid, &parent, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        assert_eq!(runner.get(uid).unwrap().state, JobState::Running);

        let state = runner.shutdown(uid).await.unwrap();
        assert_eq!(state, JobState::Paused);

        let data = runner.get(uid).unwrap();
        assert_eq!(data.state, JobState::Paused);
        assert!(
            !data.flags.needs_manual_resume(),
            "shutdown must leave a job resumable by the next startup's scan, unlike pause()"
        );
    }

    #[tokio::test]
    async fn shutdown_does_not_clear_a_preexisting_manual_resume_flag() {
        let runner = runner();
        let uid = Uuid::new_v4();
        runner.add(uid, TraderType::Limiter).unwrap();

        let parent = CancellationToken::new();
        runner
            .resume(uid, &parent, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        let mut flags = JobFlags::default();
        flags.set_needs_manual_resume(true);
        runner.update_flags(uid, flags).unwrap();

        runner.shutdown(uid).await.unwrap();
        assert!(runner.get(uid).unwrap().flags.needs_manual_resume());
    }
}
