//! Watch mode is a one-way transition: once entered, the process watches
//! declared globs until it is killed externally. Three moving parts:
//!
//! 1. **File watcher**: the `notify` crate with a debouncer, so a burst of
//!    rapid saves collapses into one rebuild.
//! 2. **Reload hub**: a dedicated thread accepting WebSocket clients via
//!    `tungstenite`, plus a broadcast thread pushing `"reload"` to every
//!    connected browser tab.
//! 3. **Bindings**: each changed path either re-runs one mid-level minify
//!    task or asks clients to refresh outright (markup, fonts, dist output).

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;
use tungstenite::WebSocket;

use crate::config::Paths;
use crate::error::{ConfigError, SensuError, WatchError};
use crate::globset::GlobSet;
use crate::pipeline::Pipeline;
use crate::registry::ReloadSink;

/// What a filesystem change under a glob should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Re-run one mid-level task, then reload.
    Run(&'static str),
    /// The changed file is already servable, just reload.
    Reload,
}

/// One watched glob and its reaction. Registered once at watch start and
/// never mutated afterwards.
pub struct WatchBinding {
    pub glob: GlobSet,
    pub react: Reaction,
}

/// The full binding table, in match order (first hit wins).
pub fn bindings(paths: &Paths) -> Result<Vec<WatchBinding>, ConfigError> {
    let binding = |rule: String, react: Reaction| -> Result<WatchBinding, ConfigError> {
        Ok(WatchBinding {
            glob: GlobSet::single(&rule)?,
            react,
        })
    };

    // `html` defaults to the project root, which may be the bare `.`
    let html_rule = if paths.html == "." {
        "*.html".to_string()
    } else {
        format!("{}/*.html", paths.html)
    };

    Ok(vec![
        binding(html_rule, Reaction::Reload)?,
        binding(format!("{}/**/*", paths.dist), Reaction::Reload)?,
        binding(format!("{}/**/*", paths.fonts), Reaction::Reload)?,
        binding(format!("{}/**/*", paths.images), Reaction::Reload)?,
        binding(
            format!("{}/**/*.scss", paths.scss),
            Reaction::Run("minify:css"),
        )?,
        binding(
            format!("{}/**/*.js", paths.third_party),
            Reaction::Run("minify:corejs"),
        )?,
        binding(format!("{}/**/*.js", paths.js), Reaction::Run("minify:js"))?,
        binding(
            format!("{}/**/*", paths.images_temp),
            Reaction::Run("minify:images"),
        )?,
    ])
}

fn react_for(bindings: &[WatchBinding], path: &Utf8Path) -> Option<Reaction> {
    bindings
        .iter()
        .find(|b| b.glob.matches(path))
        .map(|b| b.react)
}

/// Connected browser clients plus the broadcast channel feeding them.
pub struct ReloadHub {
    tx: Sender<()>,
    port: u16,
    _incoming: JoinHandle<()>,
    _outgoing: JoinHandle<()>,
}

impl ReloadHub {
    /// Bind the WebSocket port and spawn the accept/broadcast threads. The
    /// hub lives for the rest of the process.
    pub fn start() -> Result<Self, WatchError> {
        let (tcp, port) = reserve_port()?;
        let clients = Arc::new(Mutex::new(vec![]));

        let incoming = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, outgoing) = new_thread_ws_reload(clients);

        tracing::info!("live-reload socket on ws://127.0.0.1:{port}");

        Ok(Self {
            tx,
            port,
            _incoming: incoming,
            _outgoing: outgoing,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ReloadSink for ReloadHub {
    fn broadcast(&self) {
        // The broadcast thread never exits, send cannot fail.
        let _ = self.tx.send(());
    }
}

fn reserve_port() -> Result<(TcpListener, u16), WatchError> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(WatchError::Bind)?,
    };

    let addr = listener.local_addr().map_err(WatchError::Bind)?;
    Ok((listener, addr.port()))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("reload socket accept failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap().push(socket),
                Err(e) => tracing::error!("websocket handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::error!("reload send failed: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// The watch loop proper. Debounced filesystem events are mapped through the
/// binding table; each distinct task runs at most once per batch, then the
/// clients are told to reload. A failed re-run logs and keeps watching.
pub(crate) fn watch_loop(pipeline: &Pipeline, hub: &ReloadHub) -> Result<(), SensuError> {
    let pwd = std::env::current_dir().map_err(WatchError::Io)?;
    let bindings = bindings(pipeline.paths())?;

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer =
        new_debouncer(Duration::from_millis(250), None, tx).map_err(WatchError::Notify)?;

    let mut roots = vec![pipeline.paths().base.clone()];
    if pipeline.paths().html != pipeline.paths().base {
        roots.push(pipeline.paths().html.clone());
    }
    for root in roots {
        debouncer
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .map_err(WatchError::Notify)?;
        tracing::info!("watching {root}");
    }

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changed: HashSet<Utf8PathBuf> = events
                    .iter()
                    .filter(|de| {
                        matches!(
                            de.event.kind,
                            EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                        )
                    })
                    .flat_map(|de| &de.event.paths)
                    .filter_map(|path| {
                        let path = path.strip_prefix(&pwd).unwrap_or(path);
                        Utf8PathBuf::try_from(path.to_path_buf()).ok()
                    })
                    .collect();

                if changed.is_empty() {
                    continue;
                }

                let mut tasks: Vec<&'static str> = Vec::new();
                let mut reload = false;

                for path in &changed {
                    match react_for(&bindings, path) {
                        Some(Reaction::Run(task)) => {
                            if !tasks.contains(&task) {
                                tasks.push(task);
                            }
                        }
                        Some(Reaction::Reload) => reload = true,
                        None => {}
                    }
                }

                for task in tasks {
                    tracing::info!("change detected, re-running {task}");
                    if let Err(e) = pipeline.run_with_reload(task, hub) {
                        tracing::error!("error while re-running {task}:\n{e}");
                        continue;
                    }
                    reload = true;
                }

                if reload {
                    hub.broadcast();
                }
            }
            Ok(Err(errors)) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
            Err(e) => return Err(WatchError::Recv(e).into()),
        }
    }
}
