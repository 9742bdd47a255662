use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use crate::config::{self, Config};
use crate::controller::{Controller, RunSignal, ThreadSleeper};
use crate::ipc::{self, DaemonCommand, DaemonResponse};
use crate::models::{ControllerStatus, SharedStatus};
use crate::player::KodiConnector;
use crate::presence::DiscordPresence;
use crate::tray::{self, TrayAction, TrayHandle};

// Requests for the supervisor loop on the main thread
enum Request {
    Command(DaemonCommand, Option<Sender<DaemonResponse>>),
    /// Leave the loop; sent once any shutdown reply has been delivered.
    Exit,
}

pub struct Daemon {
    config_path: PathBuf,
    config: Config,
}

impl Daemon {
    pub fn new(config_path: PathBuf, config: Config) -> Result<Self> {
        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn run(self) -> Result<()> {
        use interprocess::local_socket::prelude::*;
        use interprocess::local_socket::{GenericFilePath, ListenerOptions};

        self.config.ensure_dirs()?;
        let socket_path = self.config.socket_path();

        // Remove stale socket
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string())?;

        let name = socket_path.as_os_str().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| "Failed to create socket listener")?;

        info!("Daemon started, listening on {}", socket_path.display());

        let (request_tx, request_rx): (Sender<Request>, Receiver<Request>) = mpsc::channel();
        let status: SharedStatus = Arc::new(Mutex::new(ControllerStatus::default()));

        let listener_tx = request_tx.clone();
        thread::Builder::new()
            .name("control-socket".into())
            .spawn(move || {
                loop {
                    match listener.accept() {
                        Ok(conn) => {
                            if let Err(e) = handle_connection(conn, &listener_tx) {
                                error!("Connection error: {e}");
                            }
                        }
                        Err(e) => error!("Accept error: {e}"),
                    }
                }
            })?;

        let (tray_tx, tray_rx) = mpsc::channel();
        let tray = tray::spawn(tray_tx, Arc::clone(&status));
        let bridge_tx = request_tx.clone();
        let bridge_config_path = self.config_path.clone();
        thread::Builder::new()
            .name("tray-bridge".into())
            .spawn(move || forward_tray_actions(tray_rx, bridge_tx, bridge_config_path))?;

        let mut supervisor = Supervisor {
            config_path: self.config_path,
            config: self.config,
            worker: None,
            status,
            tray,
        };

        if supervisor.config.daemon.poll_on_start {
            if let DaemonResponse::Error(e) = supervisor.handle(DaemonCommand::Start) {
                error!("Could not start presence updates: {e}");
            }
        }

        for request in request_rx {
            match request {
                Request::Command(command, reply) => {
                    let response = supervisor.handle(command);
                    if let Some(reply) = reply {
                        let _ = reply.send(response);
                    }
                }
                Request::Exit => break,
            }
        }

        if let Some(tray) = &supervisor.tray {
            tray.shutdown();
        }
        let _ = fs::remove_file(&socket_path);
        let _ = fs::remove_file(&pid_path);

        info!("Daemon stopped");
        Ok(())
    }

    pub fn start_detached(config: &Config, config_path: &std::path::Path) -> Result<()> {
        use std::process::{Command, Stdio};

        let socket_path = config.socket_path();
        if socket_path.exists() {
            let client = ipc::DaemonClient::new(&socket_path);
            if client.is_daemon_running() {
                anyhow::bail!("Daemon is already running");
            }
            fs::remove_file(&socket_path)?;
        }

        config.ensure_dirs()?;
        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_path())
            .with_context(|| format!("Failed to open {}", config.log_path().display()))?;

        let exe = std::env::current_exe()?;
        let mut command = Command::new(&exe);
        command
            .arg("--config")
            .arg(config_path)
            .arg("daemon")
            .arg("run")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
            .spawn()
            .with_context(|| "Failed to start daemon")?;

        for _ in 0..50 {
            if socket_path.exists() {
                return Ok(());
            }
            thread::sleep(std::time::Duration::from_millis(100));
        }

        anyhow::bail!(
            "Daemon failed to start, see {}",
            config.log_path().display()
        )
    }

    pub fn stop(config: &Config) -> Result<()> {
        let client = ipc::DaemonClient::new(config.socket_path());
        if client.is_daemon_running() {
            client.shutdown()?;
            for _ in 0..50 {
                if !config.socket_path().exists() {
                    return Ok(());
                }
                thread::sleep(std::time::Duration::from_millis(100));
            }
        }
        Ok(())
    }

    pub fn is_running(config: &Config) -> bool {
        let client = ipc::DaemonClient::new(config.socket_path());
        client.is_daemon_running()
    }
}

/// A controller thread and the signal that stops it.
struct Worker {
    signal: RunSignal,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_active(&self) -> bool {
        self.signal.is_running() && !self.handle.is_finished()
    }
}

struct Supervisor {
    config_path: PathBuf,
    config: Config,
    worker: Option<Worker>,
    status: SharedStatus,
    tray: Option<TrayHandle>,
}

impl Supervisor {
    fn handle(&mut self, command: DaemonCommand) -> DaemonResponse {
        let result = match command {
            DaemonCommand::Start => self.start(),
            DaemonCommand::Stop => {
                self.stop();
                Ok(())
            }
            DaemonCommand::Reload => self.reload(),
            DaemonCommand::GetStatus => return DaemonResponse::Status(self.status()),
            DaemonCommand::Shutdown => {
                self.stop();
                Ok(())
            }
        };

        if let Some(tray) = &self.tray {
            tray.refresh();
        }

        match result {
            Ok(()) => DaemonResponse::Ok,
            Err(e) => DaemonResponse::Error(format!("{e:#}")),
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.as_ref().is_some_and(Worker::is_active) {
            return Ok(());
        }

        self.config.validate()?;

        let player_config = self.config.player.clone();
        let client_id = self.config.presence.client_id.clone();
        let tray = self.tray.clone();

        self.spawn_worker(move |signal, status| {
            let mut controller = Controller::new(
                player_config,
                KodiConnector,
                DiscordPresence::new(&client_id),
                ThreadSleeper,
                signal,
            )
            .with_status(status);
            if let Some(tray) = tray {
                controller = controller.with_notifier(move || tray.refresh());
            }
            controller.run()
        })?;

        info!("Presence updates started");
        Ok(())
    }

    /// Runs `body` on a new thread once the previous worker, if any, has
    /// finished its last cycle. Never blocks the caller on that join.
    fn spawn_worker<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(RunSignal, SharedStatus) -> Result<()> + Send + 'static,
    {
        let previous = self.worker.take().map(|w| w.handle);
        let signal = RunSignal::new();
        let status = Arc::clone(&self.status);
        let tray = self.tray.clone();
        let worker_signal = signal.clone();

        self.set_status(|s| {
            s.running = true;
            s.last_error = None;
        });

        let spawned = thread::Builder::new()
            .name("presence-poll".into())
            .spawn(move || {
                if let Some(previous) = previous {
                    if !previous.is_finished() {
                        info!("Waiting for the previous poll cycle to finish");
                    }
                    if previous.join().is_err() {
                        warn!("Previous presence loop panicked");
                    }
                    // The previous worker marked the status stopped on its way out.
                    {
                        let mut s = lock_status(&status);
                        s.running = worker_signal.is_running();
                    }
                    if let Some(tray) = &tray {
                        tray.refresh();
                    }
                }

                let result = body(worker_signal.clone(), Arc::clone(&status));

                {
                    let mut s = lock_status(&status);
                    s.running = false;
                    s.now_playing = None;
                    s.playing = false;
                    if let Err(e) = result {
                        error!("Presence loop failed: {e:#}");
                        s.last_error = Some(format!("{e:#}"));
                    }
                }
                if let Some(tray) = &tray {
                    tray.refresh();
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { signal, handle });
                Ok(())
            }
            Err(e) => {
                self.set_status(|s| s.running = false);
                Err(e).with_context(|| "Failed to spawn presence thread")
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            if worker.signal.is_running() {
                worker.signal.stop();
                info!("Presence updates stopping after the current cycle");
            }
        }
        self.set_status(|s| {
            s.running = false;
            s.now_playing = None;
        });
    }

    fn set_status(&self, f: impl FnOnce(&mut ControllerStatus)) {
        f(&mut lock_status(&self.status));
    }

    fn reload(&mut self) -> Result<()> {
        let config = Config::load_from(&self.config_path)?;
        config.validate()?;

        let was_active = self.worker.as_ref().is_some_and(Worker::is_active);
        self.config = config;
        info!("Configuration reloaded from {}", self.config_path.display());

        if was_active {
            self.stop();
            self.start()?;
        }
        Ok(())
    }

    fn status(&self) -> ControllerStatus {
        let mut status = lock_status(&self.status).clone();
        // A stop request is reported immediately, not after the cycle ends.
        status.running = self.worker.as_ref().is_some_and(Worker::is_active);
        status
    }
}

fn lock_status(status: &SharedStatus) -> MutexGuard<'_, ControllerStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

fn forward_tray_actions(
    actions: Receiver<TrayAction>,
    requests: Sender<Request>,
    config_path: PathBuf,
) {
    for action in actions {
        let command = match action {
            TrayAction::Start => DaemonCommand::Start,
            TrayAction::Stop => DaemonCommand::Stop,
            TrayAction::Reload => DaemonCommand::Reload,
            TrayAction::Settings => {
                if let Err(e) = config::open_in_editor(&config_path) {
                    error!("{e:#}");
                }
                continue;
            }
            TrayAction::Quit => {
                let _ = requests.send(Request::Command(DaemonCommand::Shutdown, None));
                let _ = requests.send(Request::Exit);
                break;
            }
        };
        if requests.send(Request::Command(command, None)).is_err() {
            break;
        }
    }
}

fn handle_connection(
    conn: interprocess::local_socket::Stream,
    requests: &Sender<Request>,
) -> Result<()> {
    let mut reader = BufReader::new(&conn);
    let mut writer = &conn;

    let mut line = String::new();
    reader.read_line(&mut line)?;

    let command: DaemonCommand = serde_json::from_str(&line)?;
    let shutdown = command == DaemonCommand::Shutdown;

    let (reply_tx, reply_rx) = mpsc::channel();
    requests
        .send(Request::Command(command, Some(reply_tx)))
        .map_err(|_| anyhow::anyhow!("Daemon is shutting down"))?;
    let response = reply_rx
        .recv()
        .unwrap_or_else(|_| DaemonResponse::Error("Daemon is shutting down".to_string()));

    writeln!(writer, "{}", ipc::encode(&response)?)?;
    writer.flush()?;

    if shutdown {
        let _ = requests.send(Request::Exit);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tray::menu_entries;
    use std::time::Duration;

    fn supervisor(dir: &std::path::Path, config: Config) -> Supervisor {
        let config_path = dir.join("config.toml");
        config.save_to(&config_path).unwrap();
        Supervisor {
            config_path,
            config,
            worker: None,
            status: Arc::default(),
            tray: None,
        }
    }

    #[test]
    fn test_status_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        match sup.handle(DaemonCommand::GetStatus) {
            DaemonResponse::Status(s) => {
                assert!(!s.running);
                assert_eq!(s.summary(), "Stopped");
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_stop_without_worker_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        assert!(matches!(sup.handle(DaemonCommand::Stop), DaemonResponse::Ok));
    }

    #[test]
    fn test_start_requires_client_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        match sup.handle(DaemonCommand::Start) {
            DaemonResponse::Error(e) => assert!(e.contains("client_id")),
            other => panic!("unexpected response {other:?}"),
        }
        assert!(sup.worker.is_none());
    }

    #[test]
    fn test_reload_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());

        let mut edited = Config::default();
        edited.set("presence.client_id", "1234").unwrap();
        edited.set("player.host", "htpc.local").unwrap();
        edited.save_to(&sup.config_path).unwrap();

        assert!(matches!(sup.handle(DaemonCommand::Reload), DaemonResponse::Ok));
        assert_eq!(sup.config.player.host, "htpc.local");
        // Not running before the reload, so still not running.
        assert!(sup.worker.is_none());
    }

    #[test]
    fn test_reload_keeps_old_config_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        fs::write(&sup.config_path, "player = [not toml").unwrap();

        assert!(matches!(
            sup.handle(DaemonCommand::Reload),
            DaemonResponse::Error(_)
        ));
        assert_eq!(sup.config.player.host, "localhost");
    }

    #[test]
    fn test_tray_quit_shuts_down() {
        let (action_tx, action_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel();

        action_tx.send(TrayAction::Stop).unwrap();
        action_tx.send(TrayAction::Quit).unwrap();
        action_tx.send(TrayAction::Start).unwrap();
        forward_tray_actions(action_rx, request_tx, PathBuf::from("unused.toml"));

        let requests: Vec<Request> = request_rx.iter().collect();
        assert_eq!(requests.len(), 3);
        assert!(matches!(
            requests[0],
            Request::Command(DaemonCommand::Stop, None)
        ));
        assert!(matches!(
            requests[1],
            Request::Command(DaemonCommand::Shutdown, None)
        ));
        assert!(matches!(requests[2], Request::Exit));
    }

    fn join_worker(sup: &mut Supervisor) {
        if let Some(worker) = sup.worker.take() {
            worker.handle.join().unwrap();
        }
    }

    #[test]
    fn test_stop_marks_status_stopped_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        sup.spawn_worker(|signal, status| {
            lock_status(&status).now_playing = Some("Movie A".to_string());
            while signal.is_running() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();
        assert!(lock_status(&sup.status).running);

        assert!(matches!(sup.handle(DaemonCommand::Stop), DaemonResponse::Ok));

        // The tray renders the shared status directly.
        let shared = lock_status(&sup.status).clone();
        assert!(!shared.running);
        assert_eq!(shared.summary(), "Stopped");
        let entries = menu_entries(&shared);
        let start = entries.iter().find(|e| e.action == Some(TrayAction::Start)).unwrap();
        let stop = entries.iter().find(|e| e.action == Some(TrayAction::Stop)).unwrap();
        assert!(start.enabled);
        assert!(!stop.enabled);
        assert!(!sup.status().running);

        join_worker(&mut sup);
        assert!(!lock_status(&sup.status).running);
    }

    #[test]
    fn test_worker_sees_running_before_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        let (seen_tx, seen_rx) = mpsc::channel();
        sup.spawn_worker(move |_, status| {
            seen_tx.send(lock_status(&status).running).unwrap();
            Ok(())
        })
        .unwrap();

        assert!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        join_worker(&mut sup);
    }

    #[test]
    fn test_failing_worker_leaves_error_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        sup.spawn_worker(|_, _| Err(anyhow::anyhow!("Kodi sent garbage")))
            .unwrap();
        join_worker(&mut sup);

        let status = lock_status(&sup.status).clone();
        assert!(!status.running);
        assert!(status.last_error.unwrap().contains("Kodi sent garbage"));
        assert_eq!(sup.status().summary(), "Stopped");
    }

    #[test]
    fn test_restart_does_not_wait_for_previous_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(dir.path(), Config::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        // A cycle that ignores the run signal until released.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = Arc::clone(&order);
        sup.spawn_worker(move |_, _| {
            let released = release_rx.recv_timeout(Duration::from_secs(5)).is_ok();
            first.lock().unwrap().push(format!("first released={released}"));
            Ok(())
        })
        .unwrap();

        sup.handle(DaemonCommand::Stop);
        let second = Arc::clone(&order);
        sup.spawn_worker(move |signal, status| {
            let running = lock_status(&status).running && signal.is_running();
            second.lock().unwrap().push(format!("second running={running}"));
            Ok(())
        })
        .unwrap();

        // Returned while the first cycle is still blocked.
        assert!(order.lock().unwrap().is_empty());
        assert!(sup.status().running);

        release_tx.send(()).unwrap();
        join_worker(&mut sup);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first released=true", "second running=true"]
        );
    }
}
