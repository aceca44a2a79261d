//! Process entry point: parses configuration, wires every component
//! described in spec.md §4 together, starts the dispatcher pool and HTTP
//! server, and waits for a graceful shutdown. Grounded on the teacher's
//! `kumod::main` / `StartConfig::run` shape (parse → validate → init
//! logging → build shared state → spawn background workers → serve →
//! wait_for_shutdown), flattened since this process has no Lua policy
//! engine to load.
mod clock;
mod config;
mod consent;
mod debouncer;
mod error;
mod gateway;
mod gateway_fake;
mod http_server;
mod idempotency;
mod jobs;
mod metrics;
mod nudge;
mod queue;
mod replay;
mod safety;
mod sms_router;
mod store;
mod voice_router;

#[cfg(test)]
mod integration_tests;

use clap::Parser;
use config::Opt;
use consent::ConsentLedger;
use debouncer::AlertDebouncer;
use gateway::TelephonyGateway;
use gateway_fake::FakeGateway;
use idempotency::IdempotencyGuard;
use jobs::{JobPool, LoggingExecutor};
use leadwire_common::logging::LoggingConfig;
use leadwire_lifecycle::{LifeCycle, ShutdownSubscription};
use leadwire_template::TemplateEngine;
use queue::DispatcherContext;
use sms_router::SmsRouter;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use voice_router::VoiceRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    opt.validate()?;

    LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "LEADWIRE_LOG",
        default_filter: "info",
        diag_format: opt.diag_format,
    }
    .init()?;

    tracing::info!(listen = %opt.listen, safe_mode = opt.safe_mode, "starting leadwired");

    let mut lifecycle = LifeCycle::new();

    let store = Arc::new(Store::connect(&opt.db_path).await?);
    let clock = Arc::new(clock::Clock::new(&opt.default_timezone));
    let consent = Arc::new(ConsentLedger::new());
    let idempotency = Arc::new(IdempotencyGuard::new());
    let debouncer = Arc::new(AlertDebouncer::new());
    let templates = Arc::new(TemplateEngine::new());
    let replay_queue = Arc::new(replay::DeferredReplayQueue::new(opt.replay_queue_capacity));

    let gateway: Arc<dyn TelephonyGateway> =
        match (&opt.provider_account_id, &opt.provider_auth_token) {
            (Some(sid), Some(token)) => {
                Arc::new(gateway::TwilioGateway::new(sid.clone(), token.clone())?)
            }
            _ => {
                tracing::warn!("no telephony credentials configured; using the in-process fake gateway");
                Arc::new(FakeGateway::new())
            }
        };

    let jobs = Arc::new(JobPool::spawn(
        opt.job_pool_workers,
        opt.job_pool_capacity,
        Arc::new(LoggingExecutor),
    ));

    let voice_router = Arc::new(VoiceRouter::new(
        store.clone(),
        gateway.clone(),
        consent.clone(),
        clock.clone(),
        templates.clone(),
        Some(jobs.clone()),
    ));
    let sms_router = Arc::new(SmsRouter::new(store.clone(), consent.clone(), debouncer.clone(), templates.clone()));

    let dispatcher_ctx = DispatcherContext {
        store: store.clone(),
        gateway: gateway.clone(),
        consent: consent.clone(),
        clock: clock.clone(),
        debouncer: debouncer.clone(),
        admin_number: opt.admin_number.clone(),
        claim_batch_size: opt.claim_batch_size,
        stuck_timeout: Duration::from_secs(opt.stuck_timeout_secs as u64),
        safe_mode: opt.safe_mode,
    };

    for i in 0..opt.dispatcher_workers {
        let ctx = dispatcher_ctx.clone();
        let name: &'static str = Box::leak(format!("dispatcher-{i}").into_boxed_str());
        tokio::spawn(queue::run_dispatcher(ctx, name));
    }

    let state = http_server::AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        consent: consent.clone(),
        clock: clock.clone(),
        idempotency: idempotency.clone(),
        debouncer: debouncer.clone(),
        templates: templates.clone(),
        voice_router: voice_router.clone(),
        sms_router: sms_router.clone(),
        opt: Arc::new(opt.clone()),
        replay_queue: replay_queue.clone(),
    };

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                http_server::replay_deferred(&state).await;
            }
        });
    }

    let app = http_server::router(state);
    let listener = tokio::net::TcpListener::bind(opt.listen.as_str()).await?;
    tracing::info!(addr = %opt.listen, "listening for provider webhooks");

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                ShutdownSubscription::get().shutting_down().await;
            })
            .await
    });

    lifecycle.wait_for_shutdown().await;
    if let Err(err) = server_task.await {
        tracing::error!("http server task panicked: {err:#}");
    }

    tracing::info!("leadwired shut down cleanly");
    Ok(())
}
