//! Plugin side of the driver RPC.
//!
//! [`RpcServerDriver`] owns a concrete driver and answers calls from one or
//! more connections. Each request runs on its own task, so heartbeats are
//! answered while a long driver call holds the driver lock.

use super::protocol::{Call, RawConfig, Reply, Request, Response};
use crate::drivers::Driver;
use machine_shared::constants::API_VERSION;
use machine_shared::constants::plugin::{ENV_KEY, ENV_VAL, HEARTBEAT_TIMEOUT, LISTEN_ADDR};
use machine_shared::errors::{MachineError, MachineResult};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};

pub struct RpcServerDriver {
    driver: Mutex<Box<dyn Driver>>,
    heartbeat: Notify,
    close: Notify,
}

impl RpcServerDriver {
    pub fn new(driver: Box<dyn Driver>) -> Arc<Self> {
        Arc::new(Self {
            driver: Mutex::new(driver),
            heartbeat: Notify::new(),
            close: Notify::new(),
        })
    }

    /// Execute one call against the wrapped driver.
    pub async fn dispatch(&self, call: Call) -> Reply {
        match call {
            Call::GetVersion => reply(Ok(API_VERSION)),
            Call::Heartbeat => {
                self.heartbeat.notify_one();
                Reply::empty()
            }
            // Signalled by the connection once the reply is on the wire.
            Call::Close => Reply::empty(),
            Call::GetConfigRaw => {
                let driver = self.driver.lock().await;
                reply(driver.get_config_raw().await.map(RawConfig))
            }
            Call::SetConfigRaw(raw) => {
                let mut driver = self.driver.lock().await;
                reply(driver.set_config_raw(&raw.0).await)
            }
            Call::SetConfigFromFlags(flags) => {
                let mut driver = self.driver.lock().await;
                reply(driver.set_config_from_flags(&flags).await)
            }
            Call::GetCreateFlags => reply(self.driver.lock().await.get_create_flags().await),
            Call::DriverName => reply(self.driver.lock().await.driver_name().await),
            Call::Create => reply(self.driver.lock().await.create().await),
            Call::GetIp => reply(self.driver.lock().await.get_ip().await),
            Call::GetMachineName => reply(self.driver.lock().await.get_machine_name().await),
            Call::GetSshHostname => reply(self.driver.lock().await.get_ssh_hostname().await),
            Call::GetSshKeyPath => reply(self.driver.lock().await.get_ssh_key_path().await),
            Call::GetSshPort => reply(self.driver.lock().await.get_ssh_port().await),
            Call::GetSshUsername => reply(self.driver.lock().await.get_ssh_username().await),
            Call::GetUrl => reply(self.driver.lock().await.get_url().await),
            Call::GetState => reply(self.driver.lock().await.get_state().await),
            Call::Kill => reply(self.driver.lock().await.kill().await),
            Call::PreCreateCheck => reply(self.driver.lock().await.pre_create_check().await),
            Call::Remove => reply(self.driver.lock().await.remove().await),
            Call::Restart => reply(self.driver.lock().await.restart().await),
            Call::Start => reply(self.driver.lock().await.start().await),
            Call::Stop => reply(self.driver.lock().await.stop().await),
        }
    }

    /// Accept connections on `listener` until a `Close` call is answered or
    /// no heartbeat arrives within `heartbeat_timeout`.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        heartbeat_timeout: Duration,
    ) -> MachineResult<()> {
        let accept = tokio::spawn(accept_loop(Arc::clone(&self), listener));

        let result = loop {
            tokio::select! {
                _ = self.close.notified() => {
                    tracing::debug!("Closing plugin on server side");
                    break Ok(());
                }
                _ = self.heartbeat.notified() => continue,
                _ = tokio::time::sleep(heartbeat_timeout) => {
                    tracing::warn!(?heartbeat_timeout, "No heartbeat from the host, exiting");
                    break Err(MachineError::Timeout {
                        operation: "waiting for heartbeat".to_string(),
                        duration: heartbeat_timeout,
                    });
                }
            }
        };

        accept.abort();
        result
    }
}

fn reply<T: Serialize>(result: MachineResult<T>) -> Reply {
    match result.and_then(|v| serde_json::to_value(v).map_err(MachineError::from)) {
        Ok(value) => Reply::ok(value),
        Err(e) => Reply::error(e.to_string()),
    }
}

async fn accept_loop(server: Arc<RpcServerDriver>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "Accepted host connection");
                tokio::spawn(handle_connection(Arc::clone(&server), stream));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn handle_connection(server: Arc<RpcServerDriver>, stream: TcpStream) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Error reading request");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match Request::from_json(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request, dropping connection");
                break;
            }
        };

        let server = Arc::clone(&server);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let method = request.call.method();
            let is_close = matches!(request.call, Call::Close);
            if !matches!(request.call, Call::Heartbeat) {
                tracing::debug!(method, id = request.id, "Handling call");
            }

            let response = Response {
                id: request.id,
                reply: server.dispatch(request.call).await,
            };
            match response.to_json_line() {
                Ok(line) => {
                    let mut w = writer.lock().await;
                    if let Err(e) = w.write_all(line.as_bytes()).await {
                        tracing::debug!(method, error = %e, "Failed to write response");
                    }
                }
                Err(e) => tracing::warn!(method, error = %e, "Failed to encode response"),
            }

            if is_close {
                server.close.notify_one();
            }
        });
    }
}

/// Run `driver` as a plugin server.
///
/// Refuses to start unless the host's token is in the environment. Binds a
/// loopback port, prints its address as the first stdout line and serves
/// until closed or abandoned.
pub async fn serve_driver(driver: Box<dyn Driver>) -> MachineResult<()> {
    if std::env::var(ENV_KEY).ok().as_deref() != Some(ENV_VAL) {
        eprintln!(
            "This is a Docker Machine plugin binary.\n\
             Plugin binaries are not intended to be invoked directly.\n\
             Please use this plugin through the main 'docker-machine' binary.\n\
             (API version: {})",
            API_VERSION
        );
        return Err(MachineError::Plugin(
            "plugin binary invoked without the host token".to_string(),
        ));
    }

    let listener = TcpListener::bind(LISTEN_ADDR).await?;
    let addr = listener.local_addr()?;

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", addr)?;
        stdout.flush()?;
    }

    tracing::debug!(%addr, "Plugin server listening");
    RpcServerDriver::new(driver)
        .serve(listener, HEARTBEAT_TIMEOUT)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fakedriver::FakeDriver;
    use machine_shared::State;

    async fn connect(listener_addr: &str) -> (tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>, tokio::net::tcp::OwnedWriteHalf) {
        let stream = TcpStream::connect(listener_addr).await.unwrap();
        let (r, w) = stream.into_split();
        (BufReader::new(r).lines(), w)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        w: &mut tokio::net::tcp::OwnedWriteHalf,
        id: u64,
        call: Call,
    ) -> Reply {
        let line = Request { id, call }.to_json_line().unwrap();
        w.write_all(line.as_bytes()).await.unwrap();
        let resp = Response::from_json(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.id, id);
        resp.reply
    }

    #[tokio::test]
    async fn test_dispatch_reaches_driver() {
        let server = RpcServerDriver::new(Box::new(FakeDriver::with_state("dev", State::Stopped)));

        assert_eq!(server.dispatch(Call::GetVersion).await, Reply::ok(serde_json::json!(API_VERSION)));
        assert_eq!(server.dispatch(Call::GetMachineName).await, Reply::ok(serde_json::json!("dev")));
        assert_eq!(server.dispatch(Call::Start).await, Reply::empty());
        assert_eq!(server.dispatch(Call::GetState).await, Reply::ok(serde_json::json!("Running")));

        match server.dispatch(Call::GetUrl).await {
            Reply::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_ends_serve_after_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = RpcServerDriver::new(FakeDriver::boxed("dev", ""));
        let serving = tokio::spawn(server.serve(listener, Duration::from_secs(5)));

        let (mut lines, mut w) = connect(&addr).await;
        assert_eq!(roundtrip(&mut lines, &mut w, 1, Call::Close).await, Reply::empty());

        let result = tokio::time::timeout(Duration::from_secs(1), serving).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_server_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = RpcServerDriver::new(FakeDriver::boxed("dev", ""));
        let serving = tokio::spawn(server.serve(listener, Duration::from_millis(300)));

        let (mut lines, mut w) = connect(&addr).await;
        for id in 0..6 {
            roundtrip(&mut lines, &mut w, id, Call::Heartbeat).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!serving.is_finished());

        let result = tokio::time::timeout(Duration::from_secs(2), serving).await.unwrap().unwrap();
        assert!(matches!(result, Err(MachineError::Timeout { .. })));
    }
}
