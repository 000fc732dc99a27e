use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use keeper_core::{InstallLayout, KeeperConfig, Ledger, SystemService};
use keeper_oracle::{GitHubReleases, OracleSettings, SystemToolRunner, VersionOracle};
use keeper_policy::{OracleDetector, PolicyEngine};

use crate::capabilities::{LogBroadcaster, LogNotifier, ProcessLauncher};
use crate::coordinator::{Capabilities, Command, Coordinator, CoordinatorSettings, RunOutcome};
use crate::error::{io_err, SupervisorError};
use crate::protocol::{SupervisorRequest, SupervisorResponse};
use crate::reconcile::reconcile;

/// Start the supervisor on a current-thread runtime and block until it exits.
pub fn start_blocking(config: KeeperConfig) -> Result<RunOutcome, SupervisorError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Reconcile, then drive the coordinator with the status socket and ctrl-c
/// handler attached.
pub async fn run(config: KeeperConfig) -> Result<RunOutcome, SupervisorError> {
    let layout = config.layout();
    ensure_runtime_dirs(&layout)?;

    let mut ledger = Ledger::open_at(&layout.ledger_path())?;
    let notifier = Arc::new(LogNotifier);
    let report = reconcile(&layout, &mut ledger, notifier.as_ref())?;
    tracing::info!(
        install_dir = %config.install_dir.display(),
        confirmed_build = ?ledger.confirmed_build().map(|b| b.0),
        try_number = report.try_number,
        "startup reconciliation complete"
    );
    if !config.protocol_configured() {
        tracing::warn!(
            only_server_protocol_update = config.only_server_protocol_update,
            "neither local_protocol nor protocol_file is set; Oxide protocol checks will report unknown"
        );
    }

    let oracle = VersionOracle::new(
        OracleSettings::from(&config),
        Arc::new(SystemToolRunner::in_dir(&config.install_dir)),
        Arc::new(GitHubReleases::new(config.http_timeout())),
    );
    let updater = config.updater_binary.as_deref().map(|p| config.resolve(p));
    let caps = Capabilities {
        detector: Arc::new(OracleDetector::new(oracle, PolicyEngine::from_config(&config))),
        service: Arc::new(SystemService::new(
            config.service.clone(),
            &config.install_dir,
        )),
        broadcaster: Arc::new(LogBroadcaster),
        notifier,
        launcher: Arc::new(ProcessLauncher::resolve(updater.as_deref())),
    };
    let mut coordinator = Coordinator::new(CoordinatorSettings::from(&config), caps, ledger);

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let socket_handle = {
        let socket = layout.socket_path();
        let commands = command_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { socket_server_task(socket, commands, shutdown).await })
    };

    let signal_handle = {
        let commands = command_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down supervisor");
                    let (reply, done) = oneshot::channel();
                    if commands.send(Command::Stop(reply)).await.is_ok() {
                        let _ = done.await;
                    }
                }
                Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
            }
        })
    };
    drop(command_tx);

    let outcome = coordinator.run(command_rx).await;

    let _ = shutdown_tx.send(());
    signal_handle.abort();
    handle_join("socket_server", socket_handle.await)?;
    outcome
}

async fn socket_server_task(
    socket: PathBuf,
    commands: mpsc::Sender<Command>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SupervisorError> {
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "status socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let commands = commands.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, commands).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    commands: mpsc::Sender<Command>,
) -> Result<(), SupervisorError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("supervisor socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match SupervisorRequest::parse_line(&line) {
            Ok(request) => request,
            Err(message) => {
                write_response(&mut writer, &SupervisorResponse::error(message)).await?;
                continue;
            }
        };

        let response = dispatch(request, &commands).await;
        write_response(&mut writer, &response).await?;
        if request == SupervisorRequest::Stop {
            break;
        }
    }

    Ok(())
}

/// Forward one request to the coordinator task and wait for its answer.
async fn dispatch(request: SupervisorRequest, commands: &mpsc::Sender<Command>) -> SupervisorResponse {
    let result = match request {
        SupervisorRequest::Status => ask(commands, Command::Status)
            .await
            .and_then(|status| Ok(Some(serde_json::to_value(status)?))),
        SupervisorRequest::Check => ask(commands, Command::Check)
            .await
            .and_then(|reply| Ok(Some(serde_json::to_value(reply)?))),
        SupervisorRequest::Stop => ask(commands, Command::Stop).await.map(|()| None),
    };
    match result {
        Ok(data) => SupervisorResponse::ok(data),
        Err(err) => SupervisorResponse::error(err.to_string()),
    }
}

async fn ask<T>(
    commands: &mpsc::Sender<Command>,
    make: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> Result<T, SupervisorError> {
    let (reply, response) = oneshot::channel();
    commands
        .send(make(reply))
        .await
        .map_err(|_| SupervisorError::ChannelClosed("coordinator commands"))?;
    response
        .await
        .map_err(|_| SupervisorError::ChannelClosed("coordinator reply"))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), SupervisorError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(SupervisorError::Protocol(format!(
                "supervisor socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale supervisor socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(layout: &InstallLayout) -> Result<(), SupervisorError> {
    for dir in [layout.work_dir(), layout.run_dir(), layout.markers_dir()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &SupervisorResponse,
) -> Result<(), SupervisorError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("supervisor socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("supervisor socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("supervisor socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), SupervisorError>, tokio::task::JoinError>,
) -> Result<(), SupervisorError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(SupervisorError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// stderr subscriber; `KEEPER_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("KEEPER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), SupervisorError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), SupervisorError> {
    Ok(())
}
