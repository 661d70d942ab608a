//! The CLI-equivalent command API (§6 "Exposed CLI-equivalent API"): plain Rust functions, one per
//! command, over the Job Runner and Naming index. There is no argument parser here by design (see
//! `DESIGN.md`) — a thin outer layer (a REPL, an HTTP handler, a Telegram bot) is expected to call
//! these directly after parsing its own transport-specific input.
use crate::server::Server;
use rampart_engine::{
    job::TraderType,
    trader::{self, Limiter, LimiterState, Looper, Waller},
    JobState,
};
use rampart_execution::ProductAdapter;
use rampart_instrument::{pair::Pair, point::Point};
use rampart_integration::error::Error;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// One row of `job list`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub uid: Uuid,
    pub name: Option<String>,
    pub typename: TraderType,
    pub state: JobState,
}

/// `job list`: every persisted job, with its name if one is assigned.
pub fn job_list(server: &Server) -> Result<Vec<JobSummary>, Error> {
    let mut rows = Vec::new();
    server.runner.scan(
        |_| true,
        |job| rows.push((job.uid, job.typename, job.state)),
    )?;

    rows.into_iter()
        .map(|(uid, typename, state)| {
            Ok(JobSummary {
                uid,
                name: server.naming.lookup_by_uid(uid)?,
                typename,
                state,
            })
        })
        .collect()
}

/// `job pause <arg>`.
pub async fn job_pause(server: &Server, arg: &str) -> Result<JobState, Error> {
    let uid = server.naming.resolve(arg)?;
    server.runner.pause(uid).await
}

/// `job cancel <arg>`.
pub async fn job_cancel(server: &Server, arg: &str) -> Result<JobState, Error> {
    let uid = server.naming.resolve(arg)?;
    server.runner.cancel(uid).await
}

/// `job resume <arg>`: looks up which market the job's adapter belongs to the same way the
/// startup resume pass does, then hands the reconstructed trader to the runner.
pub fn job_resume(server: &Server, arg: &str) -> Result<JobState, Error> {
    let uid = server.naming.resolve(arg)?;
    let job = server.runner.get(uid)?;

    let markets = server.registry.markets();
    let market = match markets.as_slice() {
        [one] => one.clone(),
        [] => return Err(Error::not_exist("no product adapters registered")),
        _ => return Err(Error::invalid("ambiguous across registered markets, resume requires exactly one")),
    };
    let adapter = server.registry.get(&market)?;

    let kv = Arc::clone(&server.kv);
    let parent = server.root_cancellation.clone();
    let typename = job.typename;

    server.runner.resume(uid, &parent, move |cancellation| {
        let adapter = Arc::clone(&adapter);
        let kv = Arc::clone(&kv);
        async move {
            let trader = trader::rebuild(typename, uid, adapter, kv)?;
            trader.run(cancellation).await
        }
    })
}

/// `job set-option <arg> k=v`. Only `Limiter` jobs currently expose options.
pub fn job_set_option(server: &Server, arg: &str, key: &str, value: &str) -> Result<(), Error> {
    let uid = server.naming.resolve(arg)?;
    let job = server.runner.get(uid)?;

    match job.typename {
        TraderType::Limiter => {
            let mut state = LimiterState::load(&server.kv, uid)?
                .ok_or_else(|| Error::not_exist(format!("limiter {uid} has no persisted state")))?;
            rampart_engine::trader::limiter::set_option(&mut state, key, value)?;
            state_store_limiter(server, uid, &state)
        }
        other => Err(Error::invalid(format!("{other} jobs expose no options"))),
    }
}

fn state_store_limiter(server: &Server, uid: Uuid, state: &LimiterState) -> Result<(), Error> {
    let bytes = serde_json::to_vec(state).map_err(|err| Error::internal(err.to_string()))?;
    server.kv.with_read_writer(&mut |tx| tx.set(format!("/limiter/{uid}").as_bytes(), &bytes))
}

/// `job set-name <arg> <name>`.
pub fn job_set_name(server: &Server, arg: &str, name: &str) -> Result<(), Error> {
    let uid = server.naming.resolve(arg)?;
    let job = server.runner.get(uid)?;
    server.naming.set_name(name, uid, job.typename)
}

/// One job's exported record, for `job export`/`job import`. Carries only the uid, typename and
/// assigned name; trader-specific state stays in its own keyspace and round-trips through the KV
/// untouched (export/import moves the job-runner record and naming entry, not the order history).
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct JobExport {
    pub uid: Uuid,
    pub typename: TraderType,
    pub state: JobState,
    pub name: Option<String>,
}

/// `job export <arg>`.
pub fn job_export(server: &Server, arg: &str) -> Result<JobExport, Error> {
    let uid = server.naming.resolve(arg)?;
    let job = server.runner.get(uid)?;
    Ok(JobExport {
        uid: job.uid,
        typename: job.typename,
        state: job.state,
        name: server.naming.lookup_by_uid(uid)?,
    })
}

/// `job import`: recreates the job-runner record (refusing a uid collision, per `JobRunner::add`)
/// and reassigns the name if one was exported. Does not touch trader state; import is expected to
/// follow a restore of the KV backing store, where the trader keyspaces are already present.
pub fn job_import(server: &Server, export: JobExport) -> Result<(), Error> {
    server.runner.add(export.uid, export.typename)?;
    if let Some(name) = export.name {
        server.naming.set_name(&name, export.uid, export.typename)?;
    }
    Ok(())
}

/// `limit`: creates and starts a Limiter job for `size`/`price`/`cancel` against `adapter`'s
/// market. Side (`cancel > price` is BUY, `cancel < price` is SELL) follows from `Point::side`.
pub async fn limit(
    server: &Server,
    adapter: Arc<ProductAdapter>,
    size: Decimal,
    price: Decimal,
    cancel: Decimal,
) -> Result<(uuid::Uuid, JobState), Error> {
    let point = Point::new(size, price, cancel)?;
    let uid = Uuid::new_v4();
    server.runner.add(uid, TraderType::Limiter)?;
    let limiter = Limiter::new(uid, Arc::clone(&adapter), Arc::clone(&server.kv), point)?;

    let parent = server.root_cancellation.clone();
    let state = server.runner.resume(uid, &parent, move |cancellation| limiter.run(cancellation))?;
    Ok((uid, state))
}

/// `loop`: creates and starts a Looper job for a buy point followed by a sell point.
pub async fn wall_loop(
    server: &Server,
    adapter: Arc<ProductAdapter>,
    buy_point: Point,
    sell_point: Point,
) -> Result<(uuid::Uuid, JobState), Error> {
    let uid = Uuid::new_v4();
    server.runner.add(uid, TraderType::Looper)?;
    let looper = Looper::new(uid, Arc::clone(&adapter), Arc::clone(&server.kv), buy_point, sell_point)?;

    let parent = server.root_cancellation.clone();
    let state = server.runner.resume(uid, &parent, move |cancellation| looper.run(cancellation))?;
    Ok((uid, state))
}

/// `wall`: creates and starts a Waller job over a grid of margin-adjusted pairs.
pub async fn wall(
    server: &Server,
    adapter: Arc<ProductAdapter>,
    pairs: Vec<Pair>,
    fee_pct: Decimal,
) -> Result<(uuid::Uuid, JobState), Error> {
    let uid = Uuid::new_v4();
    server.runner.add(uid, TraderType::Waller)?;
    let waller = Waller::new(uid, Arc::clone(&adapter), Arc::clone(&server.kv), pairs, fee_pct)?;

    let parent = server.root_cancellation.clone();
    let state = server.runner.resume(uid, &parent, move |cancellation| waller.run(cancellation))?;
    Ok((uid, state))
}

/// Read-only status query, used by the outer layer to render `job list`/`job export` detail
/// without needing a live adapter. Returns `None` if the job's trader state hasn't been persisted
/// yet (a job that was `add`ed but never resumed).
pub fn job_status(server: &Server, arg: &str) -> Result<Option<trader::TraderStatus>, Error> {
    let uid = server.naming.resolve(arg)?;
    let job = server.runner.get(uid)?;
    trader::status(&server.kv, uid, job.typename)
}
