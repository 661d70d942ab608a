//! Server glue (§2): wires the Job Runner, Naming index, and product registry together, runs the
//! startup resume pass, and owns graceful shutdown. Grounded in the teacher's top-level
//! construct/register/run split (no single file in the pack plays this role directly, since the
//! teacher workspace never ships a binary; this follows the same construct-then-register shape
//! its own `System`/`Engine` builders use internally).
use crate::{fixes, options::ServerOptions, registry::ProductRegistry, secrets::SecretStore, state::ServerState};
use rampart_engine::{job::TraderType, JobRunner, Naming};
use rampart_integration::{error::Error, kv::Kv, messenger::Messenger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Server {
    pub kv: Arc<dyn Kv>,
    pub runner: Arc<JobRunner>,
    pub naming: Arc<Naming>,
    pub registry: Arc<ProductRegistry>,
    pub secrets: SecretStore,
    pub messenger: Arc<dyn Messenger>,
    pub options: ServerOptions,
    pub root_cancellation: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("options", &self.options).finish()
    }
}

impl Server {
    pub fn new(kv: Arc<dyn Kv>, messenger: Arc<dyn Messenger>, secrets: SecretStore, options: ServerOptions) -> Self {
        Self {
            runner: Arc::new(JobRunner::new(Arc::clone(&kv))),
            naming: Arc::new(Naming::new(Arc::clone(&kv))),
            registry: Arc::new(ProductRegistry::new()),
            kv,
            secrets,
            messenger,
            options,
            root_cancellation: CancellationToken::new(),
        }
    }

    pub fn server_state(&self) -> Result<ServerState, Error> {
        ServerState::load(&self.kv)
    }

    /// Startup sequence (§9 "Global state": construct KV, construct exchange clients, construct
    /// server, register handlers): runs the fix pass if configured, then resumes every persisted
    /// job that isn't terminal and doesn't have `needsManualResume` set, unless `NoResume`.
    pub fn start(&self) -> Result<(), Error> {
        if self.options.run_fixes {
            fixes::run_fixes(&self.runner)?;
        }

        if self.options.no_resume {
            info!("NoResume set, skipping startup resume pass");
            return Ok(());
        }

        let mut resumed = 0usize;
        let mut to_resume = Vec::new();
        self.runner.scan(
            |job| !job.state.is_terminal() && !job.flags.needs_manual_resume(),
            |job| to_resume.push((job.uid, job.typename)),
        )?;

        for (uid, typename) in to_resume {
            match self.resume_job(uid, typename) {
                Ok(()) => resumed += 1,
                Err(err) => warn!(%uid, %typename, %err, "startup resume failed for job, left paused"),
            }
        }

        info!(resumed, "startup resume pass complete");
        Ok(())
    }

    /// Reconstructs and resumes one job; the adapter it needs must already be registered (the
    /// caller is expected to have registered every market named by a job's persisted Limiter/
    /// Looper/Waller/Watcher state before calling `start`).
    fn resume_job(&self, uid: Uuid, typename: TraderType) -> Result<(), Error> {
        let market = self.market_for_job(uid, typename)?;
        let adapter = self.registry.get(&market)?;
        let kv = Arc::clone(&self.kv);
        let parent = self.root_cancellation.clone();

        self.runner.resume(uid, &parent, move |cancellation| {
            let adapter = Arc::clone(&adapter);
            let kv = Arc::clone(&kv);
            async move {
                let trader = rampart_engine::rebuild(typename, uid, adapter, kv)?;
                trader.run(cancellation).await
            }
        })?;
        Ok(())
    }

    /// Resolves which registered market a job's adapter-bearing persisted state names. Requires
    /// exactly one registered market when a job's own state doesn't carry one explicitly (every
    /// trader state in this workspace is market-agnostic by construction, since a `ProductAdapter`
    /// is supplied at construction rather than recorded in the persisted record).
    fn market_for_job(&self, uid: Uuid, typename: TraderType) -> Result<rampart_instrument::market::Market, Error> {
        let markets = self.registry.markets();
        match markets.as_slice() {
            [one] => Ok(one.clone()),
            [] => Err(Error::not_exist(format!("no product adapters registered, cannot resume job {uid}"))),
            _ => Err(Error::invalid(format!(
                "job {uid} ({typename}) is ambiguous across {} registered markets; register jobs with an explicit market",
                markets.len()
            ))),
        }
    }

    /// Suspends every live job for shutdown (resumable on the next startup, unlike an operator
    /// pause), closes every registered adapter, best-effort.
    pub async fn stop(&self) {
        self.runner.stop_all().await;
        self.registry.close_all().await;
        self.root_cancellation.cancel();
    }
}
