//! chat-relay - main entry point.
//!
//! Runs the relay service in webhook or poll mode, or the `logs`
//! subcommand for inspecting the circular log. The dispatch core (queue,
//! workers, access list) runs on plain threads; a tokio runtime is built
//! only in webhook mode to drive the HTTP ingress.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chat_relay::access::AccessList;
use chat_relay::config::{Config, DEFAULT_LOG_PATH};
use chat_relay::logging::{CircularLog, CircularLogLayer, LogLevel, follow, tail};
use chat_relay::queue::MessageQueue;
use chat_relay::server::{AppState, build_router};
use chat_relay::shutdown::Shutdown;
use chat_relay::telegram::TelegramClient;
use chat_relay::update::UpdateHandler;
use chat_relay::worker::spawn_workers;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("logs") {
        return run_logs(&args[2..]);
    }
    run_service()
}

/// `chat-relay logs [-n COUNT] [-f]`: tail or follow the circular log.
fn run_logs(args: &[String]) -> ExitCode {
    let path = std::env::var("RELAY_LOG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_PATH));

    if args.iter().any(|arg| arg == "-f" || arg == "--follow") {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
                eprintln!("chat-relay: signal handler registration failed: {err}");
                return ExitCode::FAILURE;
            }
        }
        return match follow(&path, &stop, &mut std::io::stdout()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("chat-relay: cannot follow {}: {err}", path.display());
                ExitCode::FAILURE
            }
        };
    }

    let count = args
        .windows(2)
        .find(|pair| pair[0] == "-n")
        .and_then(|pair| pair[1].parse().ok())
        .unwrap_or(50);
    match tail(&path, count) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("chat-relay: cannot read {}: {err}", path.display());
            ExitCode::FAILURE
        }
    }
}

fn run_service() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("chat-relay: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);
    config.dump();
    let boot = Instant::now();

    // Verify the token up front; running blind helps nobody.
    let client = match TelegramClient::new(&config.api_base, &config.bot_token) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "platform client init failed");
            return ExitCode::FAILURE;
        }
    };
    let identity = match client.get_me() {
        Ok(identity) => identity,
        Err(err) => {
            tracing::error!(error = %err, "getMe failed - bad token?");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        id = identity.id,
        username = identity.username.as_deref().unwrap_or("???"),
        "online"
    );

    let access = match AccessList::load(&config.access_path) {
        Ok(access) => Arc::new(access),
        Err(err) => {
            tracing::error!(error = %err, "access list load failed");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(count = access.count(), "access list loaded");

    let queue = Arc::new(MessageQueue::new(config.user_ring_size));
    let shutdown = Arc::new(Shutdown::new());
    let handler = Arc::new(UpdateHandler::new(
        Arc::clone(&config),
        Arc::clone(&access),
        Arc::clone(&queue),
        identity.username.clone(),
        boot,
    ));

    let workers = spawn_workers(&config, &queue, &shutdown);

    let served = if config.webhook_enabled {
        run_webhook_mode(&config, &client, handler)
    } else {
        run_poll_mode(&config, &client, &handler, &shutdown)
    };

    tracing::info!("shutting down");
    shutdown.trigger();
    queue.shutdown();
    for handle in workers {
        let _ = handle.join();
    }
    tracing::info!("clean shutdown complete");
    served
}

/// Installs the circular log as the tracing backend. Falling back to plain
/// stderr when the file cannot be opened is deliberate: a broken log path
/// should not keep the relay down.
fn init_tracing(config: &Config) {
    match CircularLog::init(&config.log_path, config.log_max_size_mb * 1024 * 1024) {
        Ok(log) => {
            let log = Arc::new(log);
            log.set_min_level(LogLevel::parse(&config.log_level));
            tracing_subscriber::registry()
                .with(CircularLogLayer::new(log))
                .init();
        }
        Err(err) => {
            eprintln!(
                "chat-relay: cannot open log file '{}': {err} - logging to stderr only",
                config.log_path.display()
            );
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Webhook mode: serve the ingress until SIGINT/SIGTERM.
fn run_webhook_mode(
    config: &Arc<Config>,
    client: &TelegramClient,
    handler: Arc<UpdateHandler>,
) -> ExitCode {
    let state = AppState::new(
        config.webhook_secret.clone(),
        config.webhook_pool_size,
        Arc::new(move |update| {
            handler.handle(&update);
        }),
    );
    let router = build_router(state);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.webhook_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "ingress runtime build failed");
            return ExitCode::FAILURE;
        }
    };

    let port = config.webhook_port;
    let served = runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, port, "webhook bind failed");
                return ExitCode::FAILURE;
            }
        };
        tracing::info!(port, "webhook ingress listening");

        match axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(error = %err, "webhook server failed");
                ExitCode::FAILURE
            }
        }
    });

    // The platform would keep pushing to a dead endpoint otherwise.
    if let Err(err) = client.delete_webhook() {
        tracing::warn!(error = %err, "webhook deregistration failed");
    }
    served
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Poll mode: long-poll the platform until SIGINT/SIGTERM raises the
/// shutdown flag.
fn run_poll_mode(
    config: &Config,
    client: &TelegramClient,
    handler: &UpdateHandler,
    shutdown: &Shutdown,
) -> ExitCode {
    // Poll and push are mutually exclusive; drop any stale registration.
    if let Err(err) = client.delete_webhook() {
        tracing::warn!(error = %err, "stale webhook removal failed");
    }

    let stop = shutdown.flag();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            tracing::error!(error = %err, "signal handler registration failed");
            return ExitCode::FAILURE;
        }
    }

    let mut offset = 0i64;
    tracing::info!(timeout = config.poll_timeout, "entering poll loop");

    while !stop.load(Ordering::Relaxed) {
        match client.get_updates(offset, config.poll_limit, config.poll_timeout) {
            Ok(updates) => {
                for update in &updates {
                    if let Some(id) = handler.handle(update) {
                        if id >= offset {
                            offset = id + 1;
                        }
                    }
                }
            }
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!(error = %err, "getUpdates failed, retrying in 5s");
                shutdown.sleep(Duration::from_secs(5));
            }
        }
    }
    ExitCode::SUCCESS
}
