//! Multiplexed RPC connection to a plugin server.
//!
//! One reader task owns the read half and routes each response to the
//! caller waiting on its id. Writes are serialized through a mutex, so any
//! number of calls may be in flight at once.

use super::protocol::{Call, Reply, Request, Response};
use machine_shared::errors::{MachineError, MachineResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

impl Pending {
    /// Marks the connection closed; dropping the waiters fails their calls.
    fn shut(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

pub struct RpcClient {
    addr: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Dial the plugin server at `addr`.
    pub async fn connect(addr: &str) -> MachineResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MachineError::Rpc(format!("failed to connect to {}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let pending = Arc::new(Mutex::new(Pending::default()));
        let reader = tokio::spawn(read_responses(
            addr.to_string(),
            read_half,
            Arc::clone(&pending),
        ));

        tracing::debug!(addr = %addr, "Connected to plugin server");

        Ok(Self {
            addr: addr.to_string(),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            pending,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Issue one call and wait for its reply value.
    pub async fn call(&self, call: Call) -> MachineResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(MachineError::ConnectionClosed);
            }
            pending.waiters.insert(id, tx);
        }

        let line = Request { id, call }.to_json_line()?;
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(w) => w.write_all(line.as_bytes()).await.map_err(Some),
                None => Err(None),
            }
        };
        match written {
            Ok(()) => {}
            Err(None) => {
                self.pending.lock().waiters.remove(&id);
                return Err(MachineError::ConnectionClosed);
            }
            Err(Some(e)) => {
                tracing::debug!(method, error = %e, "Failed to write request");
                self.close_connection().await;
                return Err(MachineError::ConnectionClosed);
            }
        }

        match rx.await {
            Ok(Reply::Ok { value }) => Ok(value),
            Ok(Reply::Error { message }) => Err(MachineError::Rpc(message)),
            Err(_) => Err(MachineError::ConnectionClosed),
        }
    }

    /// Issue one call and decode its reply value.
    pub async fn call_typed<T: DeserializeOwned>(&self, call: Call) -> MachineResult<T> {
        let method = call.method();
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|e| {
            MachineError::Rpc(format!("malformed reply to {}: {}", method, e))
        })
    }

    /// Issue one call whose reply carries no value.
    pub async fn call_unit(&self, call: Call) -> MachineResult<()> {
        self.call(call).await.map(|_| ())
    }

    /// Tear down the connection. In-flight and later calls fail with
    /// [`MachineError::ConnectionClosed`].
    pub async fn close_connection(&self) {
        self.pending.lock().shut();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_responses(addr: String, read_half: OwnedReadHalf, pending: Arc<Mutex<Pending>>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match Response::from_json(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(addr = %addr, error = %e, "Malformed response from plugin");
                        break;
                    }
                };
                let waiter = pending.lock().waiters.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.reply);
                    }
                    None => {
                        tracing::debug!(addr = %addr, id = response.id, "Response for unknown call");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(addr = %addr, "Plugin server closed the connection");
                break;
            }
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "Error reading from plugin server");
                break;
            }
        }
    }
    pending.lock().shut();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Answers requests out of order: each reply is held until the next
    /// request arrives, then both are answered newest first.
    async fn swapping_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut lines = BufReader::new(r).lines();
            let first = Request::from_json(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let second = Request::from_json(&lines.next_line().await.unwrap().unwrap()).unwrap();
            for req in [second, first] {
                let resp = Response {
                    id: req.id,
                    reply: Reply::ok(serde_json::json!(req.call.method())),
                };
                w.write_all(resp.to_json_line().unwrap().as_bytes())
                    .await
                    .unwrap();
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_replies_are_routed_by_id() {
        let (addr, server) = swapping_server().await;
        let client = Arc::new(RpcClient::connect(&addr).await.unwrap());

        let c1 = Arc::clone(&client);
        let first = tokio::spawn(async move { c1.call_typed::<String>(Call::Create).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second: String = client.call_typed(Call::Heartbeat).await.unwrap();

        assert_eq!(second, "Heartbeat");
        assert_eq!(first.await.unwrap().unwrap(), "Create");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_fail_after_close() {
        let (addr, _server) = swapping_server().await;
        let client = RpcClient::connect(&addr).await.unwrap();
        client.close_connection().await;

        assert!(client.is_closed());
        let err = client.call(Call::GetState).await.unwrap_err();
        assert!(matches!(err, MachineError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_server_hangup_fails_pending_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let _ = lines.next_line().await;
        });

        let client = RpcClient::connect(&addr).await.unwrap();
        let err = client.call(Call::Start).await.unwrap_err();
        assert!(matches!(err, MachineError::ConnectionClosed));
        assert!(client.is_closed());
    }
}
