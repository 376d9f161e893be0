//! curfewd - The curfew background service
//!
//! This is the main entry point for the curfewd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Narrative generator (optional)
//! - Core engine
//! - Bridge IPC server
//! - Health endpoint

mod health;

use anyhow::{Context, Result};
use clap::Parser;
use curfew_api::{
    ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, Request, Response,
    ResponsePayload,
};
use curfew_config::load_config_or_default;
use curfew_core::{CurfewEngine, NarrativeClient};
use curfew_ipc::{BridgePlatform, IpcServer, ServerMessage};
use curfew_narrative::HttpTextGenerator;
use curfew_platform_api::TextGenerator;
use curfew_store::{RestrictionStore, SqliteStore};
use curfew_util::{
    default_config_path, is_mock_time_active, ClientId, CurfewError, ErrorKind, RateLimiter,
    DATABASE_FILENAME,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::health::Readiness;

/// curfewd - Curfew scheduling and enforcement service
#[derive(Parser, Debug)]
#[command(name = "curfewd")]
#[command(about = "Curfew scheduling and enforcement service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/curfewd/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set CURFEW_SOCKET env var)
    #[arg(short, long, env = "CURFEW_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set CURFEW_DATA_DIR env var)
    #[arg(short, long, env = "CURFEW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Everything a request handler needs
struct Shared {
    engine: Arc<CurfewEngine>,
    bridge: Arc<BridgePlatform>,
    ipc: Arc<IpcServer>,
    readiness: Arc<Readiness>,
    rate_limiter: Mutex<RateLimiter<ClientId>>,
}

/// Main service state
struct Service {
    ctx: Arc<Shared>,
    health_addr: Option<(String, u16)>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            timezone = %policy.engine.timezone,
            exempt = policy.engine.exempt.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.daemon.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.daemon.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn RestrictionStore> = Arc::new(
            SqliteStore::open(&db_path, policy.engine.timezone)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let generator: Option<Arc<dyn TextGenerator>> =
            match HttpTextGenerator::from_config(&policy.narrative) {
                Ok(Some(generator)) => Some(Arc::new(generator)),
                Ok(None) => {
                    info!("No narrative endpoint configured, using fallback lines only");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Narrative generator unavailable, using fallback lines only");
                    None
                }
            };
        let narrative = Arc::new(NarrativeClient::new(&policy.narrative, generator));

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;
        let ipc = Arc::new(ipc);

        info!(socket_path = %socket_path.display(), "IPC server started");

        let bridge = Arc::new(BridgePlatform::new(ipc.event_sender()));
        let engine = Arc::new(CurfewEngine::new(
            policy.engine,
            store,
            bridge.clone(),
            narrative,
        ));
        let readiness = Arc::new(Readiness::new(engine.clone(), bridge.clone()));

        // 30 requests per second per client
        let rate_limiter = Mutex::new(RateLimiter::new(30, Duration::from_secs(1)));

        let health_addr = match policy.daemon.health_port {
            0 => None,
            port => Some((policy.daemon.health_host, port)),
        };

        Ok(Self {
            ctx: Arc::new(Shared {
                engine,
                bridge,
                ipc,
                readiness,
                rate_limiter,
            }),
            health_addr,
        })
    }

    async fn run(self) -> Result<()> {
        let ctx = self.ctx;
        let mut ipc_messages = ctx
            .ipc
            .take_message_receiver()
            .await
            .context("Message receiver already taken")?;

        let ipc_accept = ctx.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let health_task: Option<JoinHandle<()>> = self.health_addr.map(|(host, port)| {
            let readiness = ctx.readiness.clone();
            tokio::spawn(async move {
                if let Err(e) = health::serve(&host, port, readiness).await {
                    error!(error = %e, "Health endpoint failed");
                }
            })
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        if is_mock_time_active() {
            warn!(now = %ctx.engine.now(), "Mock time is active");
        }

        info!("Service running, waiting for a bridge");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                Some(msg) = ipc_messages.recv() => {
                    handle_ipc_message(&ctx, msg).await;
                }
            }
        }

        info!("Shutting down curfewd");

        ctx.ipc.broadcast_event(Event::new(EventPayload::ShuttingDown));
        ctx.engine.shutdown().await;
        if let Some(task) = health_task {
            task.abort();
        }
        ctx.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }
}

impl Shared {
    /// Runs in arrival order, before the request gets its own task.
    ///
    /// Bridge traffic is never throttled since it carries every state change.
    /// Presence and bridge attachment are applied here so that a later leave
    /// can never be overtaken by an earlier join.
    fn admit(&self, client_id: &ClientId, role: ClientRole, request: &Request) -> Option<Response> {
        if role != ClientRole::Bridge {
            let allowed = self
                .rate_limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check(client_id);
            if !allowed {
                return Some(Response::error(
                    request.request_id,
                    ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                ));
            }
        }

        if !role.can_report_events() {
            return None;
        }

        match &request.command {
            Command::StateChanged { subject, after, .. } => {
                self.bridge.record_state_change(subject.id, after.is_some());
            }
            Command::BridgeReady { monitored } => {
                self.readiness.set_recovered(false);
                self.bridge.attach(client_id.clone(), monitored.iter().copied());
            }
            _ => {}
        }

        None
    }
}

async fn handle_ipc_message(ctx: &Arc<Shared>, msg: ServerMessage) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            let role = ctx
                .ipc
                .get_client_info(&client_id)
                .await
                .map(|info| info.role)
                .unwrap_or(ClientRole::Observer);

            if let Some(response) = ctx.admit(&client_id, role, &request) {
                let _ = ctx.ipc.send_response(&client_id, response).await;
                return;
            }

            // Each request runs in its own task; a panic there becomes a
            // generic error instead of taking the service down.
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let request_id = request.request_id;
                let handler = {
                    let ctx = ctx.clone();
                    let client_id = client_id.clone();
                    tokio::spawn(async move {
                        handle_command(&ctx, &client_id, role, request_id, request.command).await
                    })
                };

                let response = match handler.await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(client_id = %client_id, request_id, error = %e, "Request handler failed");
                        Response::error(
                            request_id,
                            ErrorInfo::new(ErrorCode::InternalError, "Something went wrong"),
                        )
                    }
                };

                if let Err(e) = ctx.ipc.send_response(&client_id, response).await {
                    debug!(client_id = %client_id, error = %e, "Could not deliver response");
                }
            });
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                "Client connected"
            );
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");

            if ctx.bridge.detach(&client_id) {
                ctx.readiness.set_recovered(false);
                warn!(client_id = %client_id, "Bridge disconnected, not ready until it returns");
            }

            ctx.rate_limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&client_id);
        }
    }
}

fn error_response(request_id: u64, err: &CurfewError) -> Response {
    match err.kind() {
        ErrorKind::Validation => debug!(error = %err, "Request rejected"),
        _ => warn!(error = %err, "Request failed"),
    }
    Response::error(request_id, ErrorInfo::from(err))
}

fn permission_denied(request_id: u64, role: ClientRole) -> Response {
    Response::error(
        request_id,
        ErrorInfo::new(
            ErrorCode::PermissionDenied,
            format!("{:?} clients may not do that", role),
        ),
    )
}

async fn handle_command(
    ctx: &Shared,
    client_id: &ClientId,
    role: ClientRole,
    request_id: u64,
    command: Command,
) -> Response {
    let engine = &ctx.engine;
    let now = engine.now();

    match command {
        Command::SetRestriction { subject, time } => {
            if !role.can_administer() {
                return permission_denied(request_id, role);
            }
            match engine.set_restriction(&subject, &time, &now).await {
                Ok(window) => {
                    Response::success(request_id, ResponsePayload::RestrictionSet(window.to_view()))
                }
                Err(e) => error_response(request_id, &e),
            }
        }

        Command::RemoveRestriction { subject_id } => {
            if !role.can_administer() {
                return permission_denied(request_id, role);
            }
            match engine.remove_restriction(subject_id).await {
                Ok(()) => {
                    Response::success(request_id, ResponsePayload::RestrictionRemoved { subject_id })
                }
                Err(e) => error_response(request_id, &e),
            }
        }

        Command::ResetAll => {
            if !role.can_administer() {
                return permission_denied(request_id, role);
            }
            match engine.reset_all().await {
                Ok(()) => Response::success(request_id, ResponsePayload::ResetDone),
                Err(e) => error_response(request_id, &e),
            }
        }

        Command::ListActive => match engine.list_active(&now) {
            Ok(windows) => Response::success(
                request_id,
                ResponsePayload::Active {
                    windows: windows.iter().map(|w| w.to_view()).collect(),
                },
            ),
            Err(e) => error_response(request_id, &e),
        },

        Command::Appeal { subject, reason } => {
            if !role.can_report_events() {
                return permission_denied(request_id, role);
            }
            match engine.appeal(&subject, &reason, &now).await {
                Ok(view) => Response::success(request_id, ResponsePayload::AppealRuled(view)),
                Err(e) => error_response(request_id, &e),
            }
        }

        Command::StateChanged {
            subject,
            before,
            after,
        } => {
            if !role.can_report_events() {
                return permission_denied(request_id, role);
            }
            let outcome = engine
                .on_state_changed(&subject, before.as_deref(), after.as_deref(), &now)
                .await;
            Response::success(request_id, ResponsePayload::StateHandled(outcome))
        }

        Command::BridgeReady { .. } => {
            if !role.can_report_events() {
                return permission_denied(request_id, role);
            }

            match engine.recover(&now).await {
                Ok(report) => {
                    ctx.readiness.set_recovered(true);
                    Response::success(request_id, ResponsePayload::Recovered(report))
                }
                Err(e) => error_response(request_id, &e),
            }
        }

        Command::SubscribeEvents => Response::success(
            request_id,
            ResponsePayload::Subscribed {
                client_id: client_id.clone(),
            },
        ),

        Command::UnsubscribeEvents => Response::success(request_id, ResponsePayload::Unsubscribed),

        Command::GetHealth => {
            Response::success(request_id, ResponsePayload::Health(ctx.readiness.status()))
        }

        Command::Ping => Response::success(request_id, ResponsePayload::Pong),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "curfewd starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Pacific;
    use curfew_api::{ResponseResult, SubjectRef};
    use curfew_config::EngineConfig;
    use curfew_platform_api::Platform;
    use curfew_util::SubjectId;

    fn shared(dir: &tempfile::TempDir) -> Shared {
        let ipc = Arc::new(IpcServer::new(dir.path().join("curfewd.sock")));
        let bridge = Arc::new(BridgePlatform::new(ipc.event_sender()));
        let engine = Arc::new(CurfewEngine::new(
            EngineConfig::default(),
            Arc::new(SqliteStore::in_memory(Pacific).unwrap()),
            bridge.clone(),
            Arc::new(NarrativeClient::disabled()),
        ));
        let readiness = Arc::new(Readiness::new(engine.clone(), bridge.clone()));

        Shared {
            engine,
            bridge,
            ipc,
            readiness,
            rate_limiter: Mutex::new(RateLimiter::new(30, Duration::from_secs(1))),
        }
    }

    fn state_changed(request_id: u64, subject: u64, after: Option<&str>) -> Request {
        Request::new(
            request_id,
            Command::StateChanged {
                subject: SubjectRef::new(subject, "owl"),
                before: None,
                after: after.map(String::from),
            },
        )
    }

    #[test]
    fn test_bridge_bursts_are_not_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared(&dir);
        let bridge = ClientId::new();

        for i in 0..40 {
            let request = state_changed(i, 7, Some("lounge"));
            assert!(shared.admit(&bridge, ClientRole::Bridge, &request).is_none());
        }
    }

    #[test]
    fn test_observers_are_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared(&dir);
        let observer = ClientId::new();

        for i in 0..30 {
            let request = Request::new(i, Command::Ping);
            assert!(shared.admit(&observer, ClientRole::Observer, &request).is_none());
        }

        let response = shared
            .admit(&observer, ClientRole::Observer, &Request::new(30, Command::Ping))
            .unwrap();
        match response.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::RateLimited),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_presence_follows_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared(&dir);
        let bridge = ClientId::new();
        let owl = SubjectId::new(7);

        let ready = Request::new(1, Command::BridgeReady { monitored: vec![] });
        assert!(shared.admit(&bridge, ClientRole::Bridge, &ready).is_none());
        assert_eq!(shared.bridge.bridge_client(), Some(bridge.clone()));

        shared.admit(&bridge, ClientRole::Bridge, &state_changed(2, 7, None));
        shared.admit(&bridge, ClientRole::Bridge, &state_changed(3, 7, Some("lounge")));
        assert!(shared.bridge.is_in_monitored_state(owl));

        shared.admit(&bridge, ClientRole::Bridge, &state_changed(4, 7, Some("lounge")));
        shared.admit(&bridge, ClientRole::Bridge, &state_changed(5, 7, None));
        assert!(!shared.bridge.is_in_monitored_state(owl));
    }

    #[test]
    fn test_observer_cannot_report_presence() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared(&dir);
        let observer = ClientId::new();

        shared.admit(&observer, ClientRole::Observer, &state_changed(1, 7, Some("lounge")));
        assert!(!shared.bridge.is_in_monitored_state(SubjectId::new(7)));

        let ready = Request::new(2, Command::BridgeReady { monitored: vec![] });
        shared.admit(&observer, ClientRole::Observer, &ready);
        assert!(shared.bridge.bridge_client().is_none());
    }
}
