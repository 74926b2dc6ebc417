//! Scripted engine endpoint for tests
//!
//! Speaks the newline wire profile on `127.0.0.1:<ephemeral>`. Each request
//! line is logged and answered by a caller-provided script.

use placer_bridge::{BridgeConfig, WireProfile};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// How the engine answers one request
pub(crate) enum Reply {
    /// Write this line back
    Send(String),
    /// Close this connection; later connections are served normally
    Close,
    /// Close this connection and drop every later connection on accept
    Die,
    /// Read the request and never answer it
    Ignore,
}

pub(crate) struct FakeEngine {
    pub port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    accepts: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let accepts = Arc::new(AtomicUsize::new(0));
        let dead = Arc::new(AtomicBool::new(false));

        let log = requests.clone();
        let accepted = accepts.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                if dead.load(Ordering::SeqCst) {
                    continue;
                }

                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.lock().unwrap().push(line.clone());
                    match script(&line) {
                        Reply::Send(text) => {
                            let framed = format!("{}\n", text);
                            if write_half.write_all(framed.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        Reply::Ignore => {}
                        Reply::Close => break,
                        Reply::Die => {
                            dead.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
        });

        Self {
            port,
            requests,
            accepts,
            task,
        }
    }

    /// Engine that acknowledges everything and assigns `id` to spawns
    pub async fn accepting(id: &'static str) -> Self {
        Self::start(move |line| {
            if line.starts_with("vset /objects/spawn") {
                Reply::Send(format!("ok id={}", id))
            } else if line.starts_with("vget /object/") {
                Reply::Send("ok 0 0 100".into())
            } else {
                Reply::Send("ok".into())
            }
        })
        .await
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Bridge config with short timeouts and a small retry budget
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            connect_timeout: Duration::from_millis(200),
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            command_timeout: Duration::from_millis(500),
            wire: WireProfile::Line,
            ..BridgeConfig::with_address("127.0.0.1", self.port)
        }
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}
