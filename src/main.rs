//! Process entry point: wiring, signal handling, and exit codes
//! (spec §5.4, §6.3).

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use eln_mcp_bridge::audit::{AuditEmitter, AuditEvent, AuditEventKind, AuditOutcome, StderrAuditSink};
use eln_mcp_bridge::auth::AuthManager;
use eln_mcp_bridge::config::Configuration;
use eln_mcp_bridge::error::CoreError;
use eln_mcp_bridge::http_client::HttpClient;
use eln_mcp_bridge::protocol::ProtocolDispatcher;
use eln_mcp_bridge::resources::ResourceManager;

/// Exit codes on fatal error (spec §6.3).
mod exit_code {
    pub const CONFIGURATION_INVALID: u8 = 1;
    pub const AUTHENTICATION_FAILED: u8 = 2;
    pub const RUNTIME_FATAL: u8 = 3;
    pub const SIGNAL_TERMINATED: u8 = 130;
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // stdout is reserved for JSON-RPC frames; all diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match Configuration::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(exit_code::CONFIGURATION_INVALID);
        }
    };

    let audit_emitter = AuditEmitter::spawn(Arc::new(StderrAuditSink), config.audit.buffer_capacity);
    let audit = audit_emitter.handle();
    audit.emit(AuditEvent::new(
        "startup",
        AuditEventKind::ProcessStart,
        AuditOutcome::Ok,
    ));

    let auth_manager = Arc::new(AuthManager::new(config.auth.clone(), audit.clone()));

    // Two-phase construction resolves the AuthManager <-> HTTPClient
    // reference cycle (spec §2.3): build HTTPClient with the manager as its
    // credential provider, then hand the client back to the manager.
    let http_client = match HttpClient::new(config.http.clone(), auth_manager.clone()) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            eprintln!("failed to initialize HTTP client: {err}");
            return ExitCode::from(exit_code::RUNTIME_FATAL);
        }
    };
    auth_manager.wire_http_client(http_client.clone());

    if let Err(err) = auth_manager.ensure_authenticated("startup").await {
        eprintln!("authentication failed at startup: {err}");
        let code = match err {
            CoreError::Configuration(_) => exit_code::CONFIGURATION_INVALID,
            _ => exit_code::AUTHENTICATION_FAILED,
        };
        return ExitCode::from(code);
    }

    let resource_manager = Arc::new(ResourceManager::new(
        http_client,
        auth_manager,
        config.scope,
        audit.clone(),
    ));
    let dispatcher = ProtocolDispatcher::new(resource_manager, audit.clone());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    // On SIGINT/SIGTERM the dispatcher stops accepting new input lines but
    // keeps running whatever request it is already handling (spec §5.4):
    // notifying `stop_accepting` only ever short-circuits the "wait for the
    // next line" point in the loop, never an in-flight request. `signaled`
    // records that shutdown was signal-driven so the exit code reflects it
    // even though the dispatcher returns normally once it stops.
    let stop_accepting = Arc::new(Notify::new());
    let signaled = Arc::new(AtomicBool::new(false));

    let watchdog = {
        let stop_accepting = stop_accepting.clone();
        let signaled = signaled.clone();
        let audit = audit.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signaled.store(true, Ordering::SeqCst);
            audit.emit(AuditEvent::new(
                "shutdown",
                AuditEventKind::ProcessStop,
                AuditOutcome::Ok,
            ));
            stop_accepting.notify_one();

            // The in-flight request gets up to 30s to finish on its own
            // (spec §5.4); past that, force the process down rather than
            // hang indefinitely on a stuck upstream call.
            tokio::time::sleep(Duration::from_secs(30)).await;
            eprintln!("shutdown grace period exceeded; forcing exit");
            std::process::exit(i32::from(exit_code::SIGNAL_TERMINATED));
        })
    };

    let result = dispatcher.run(stdin, stdout, stop_accepting).await;
    watchdog.abort();

    if !signaled.load(Ordering::SeqCst) {
        audit.emit(AuditEvent::new(
            "shutdown",
            AuditEventKind::ProcessStop,
            AuditOutcome::Ok,
        ));
    }

    // Drain whatever the audit buffer is still holding, bounded to 5s
    // (spec §5.4 step 3) rather than an unconditional fixed sleep.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while !audit.is_drained() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        eprintln!("audit drain exceeded grace period; exiting with events still queued");
    }

    if signaled.load(Ordering::SeqCst) {
        if let Err(err) = result {
            eprintln!("runtime error during shutdown: {err}");
        }
        return ExitCode::from(exit_code::SIGNAL_TERMINATED);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("runtime error: {err}");
            ExitCode::from(exit_code::RUNTIME_FATAL)
        }
    }
}

/// Resolves on SIGINT or SIGTERM so shutdown can begin (spec §5.4).
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
