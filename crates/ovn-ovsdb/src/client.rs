//! Persistent OVSDB JSON-RPC client
//!
//! One connection carries every request. A background task reads the
//! socket, answers `echo` keepalives, routes replies to their waiting
//! callers by request id and forwards `update` notifications to the
//! matching monitor subscription.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::TableUpdates;
use crate::endpoint::{Endpoint, RetryPolicy};
use crate::error::{OvsdbError, Result};
use crate::protocol::{self, Message, MessageDecoder, Request, Response};
use crate::reply::{check_results, OperationResult};
use crate::transaction::Transaction;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Initial contents of a monitored database plus the stream of later changes
#[derive(Debug)]
pub struct Subscription {
    pub initial: TableUpdates,
    pub updates: mpsc::UnboundedReceiver<TableUpdates>,
}

struct Shared {
    endpoint: String,
    writer: Mutex<Writer>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    monitors: Mutex<HashMap<String, mpsc::UnboundedSender<TableUpdates>>>,
}

impl Shared {
    async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn deliver_update(&self, params: Value) {
        let (monitor_id, updates) = match params.as_array().map(Vec::as_slice) {
            Some([id, updates]) => (id.as_str().unwrap_or_default().to_string(), updates.clone()),
            _ => {
                warn!("Malformed OVSDB update notification: {}", params);
                return;
            }
        };

        let updates: TableUpdates = match serde_json::from_value(updates) {
            Ok(u) => u,
            Err(e) => {
                warn!("Failed to parse OVSDB table updates: {}", e);
                return;
            }
        };

        let mut monitors = self.monitors.lock().await;
        if let Some(tx) = monitors.get(&monitor_id) {
            if tx.send(updates).is_err() {
                debug!("Monitor '{}' has no subscriber left, dropping it", monitor_id);
                monitors.remove(&monitor_id);
            }
        } else {
            debug!("Update for unknown monitor '{}'", monitor_id);
        }
    }

    async fn dispatch(&self, value: Value) {
        match protocol::classify(value) {
            Ok(Message::Reply { id, result }) => {
                let waiter = self.pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(rpc_error));
                    }
                    None => debug!("Dropping OVSDB reply for unknown request id {}", id),
                }
            }
            Ok(Message::Request { method, params, id }) if method == "echo" => {
                if let Err(e) = self.send(&Response::success(id, params)).await {
                    warn!("Failed to answer OVSDB echo: {}", e);
                }
            }
            Ok(Message::Request { method, .. }) => {
                debug!("Ignoring OVSDB server request '{}'", method)
            }
            Ok(Message::Notification { method, params }) if method == "update" => {
                self.deliver_update(params).await
            }
            Ok(Message::Notification { method, .. }) => {
                debug!("Ignoring OVSDB notification '{}'", method)
            }
            Err(e) => warn!("Malformed OVSDB message: {}", e),
        }
    }

    async fn close(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(OvsdbError::Closed));
        }
        self.monitors.lock().await.clear();
    }
}

fn rpc_error(error: Value) -> OvsdbError {
    OvsdbError::Rpc(
        error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = MessageDecoder::new();
    let mut chunk = vec![0u8; 16 * 1024];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to read from OVSDB {}: {}", shared.endpoint, e);
                break;
            }
        };
        decoder.push(&chunk[..n]);

        loop {
            match decoder.next_value() {
                Ok(Some(value)) => shared.dispatch(value).await,
                Ok(None) => break,
                Err(e) => {
                    error!("Discarding undecodable OVSDB stream data: {}", e);
                    decoder.clear();
                    break;
                }
            }
        }
    }

    warn!("OVSDB connection to {} closed", shared.endpoint);
    shared.close().await;
}

/// Persistent OVSDB client
pub struct OvsdbClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl OvsdbClient {
    /// Wrap an already connected stream. Must be called inside a tokio runtime.
    pub fn from_stream<S>(stream: S, endpoint: impl Into<String>, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            endpoint: endpoint.into(),
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
        });
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            next_id: AtomicU64::new(1),
            timeout,
            reader,
        }
    }

    /// Connect once
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let label = endpoint.to_string();
        debug!("Attempting to connect to OVSDB at {}", label);

        let connected = match endpoint {
            Endpoint::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
                .await
                .map(|s| Self::from_stream(s, label.clone(), timeout)),
            Endpoint::Unix(path) => UnixStream::connect(path)
                .await
                .map(|s| Self::from_stream(s, label.clone(), timeout)),
        };

        connected.map_err(|e| OvsdbError::Connection {
            endpoint: label,
            reason: e.to_string(),
        })
    }

    /// Connect, retrying with a fixed delay between attempts
    pub async fn connect_with_retry(
        endpoint: &Endpoint,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let attempts = policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::connect(endpoint, timeout).await {
                Ok(client) => {
                    info!("Connected to OVSDB at {}", endpoint);
                    return Ok(client);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        error!(
                            "Could not connect to OVSDB at {} (attempt {}/{}): {}. Retrying in {:?}",
                            endpoint, attempt, attempts, e, policy.delay
                        );
                        tokio::time::sleep(policy.delay).await;
                    } else {
                        error!(
                            "Could not connect to OVSDB at {} (attempt {}/{}): {}",
                            endpoint, attempt, attempts, e
                        );
                    }
                }
            }
        }

        Err(OvsdbError::Connection {
            endpoint: endpoint.to_string(),
            reason: format!("gave up after {} attempts: {}", attempts, last_error),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a JSON-RPC request and wait for its reply
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(method, params, id);
        let (tx, rx) = oneshot::channel();

        self.shared.pending.lock().await.insert(id, tx);
        debug!("OVSDB request {} -> {}: {}", id, self.shared.endpoint, method);

        if let Err(e) = self.shared.send(&request).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(OvsdbError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(OvsdbError::Timeout {
                    method: method.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    /// List all databases
    pub async fn list_dbs(&self) -> Result<Vec<String>> {
        let result = self.call("list_dbs", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Get schema for a database
    pub async fn get_schema(&self, db: &str) -> Result<Value> {
        self.call("get_schema", json!([db])).await
    }

    /// Names of every table in `db`
    pub async fn table_names(&self, db: &str) -> Result<Vec<String>> {
        let schema = self.get_schema(db).await?;
        let tables = schema
            .get("tables")
            .and_then(Value::as_object)
            .ok_or_else(|| OvsdbError::Protocol("schema without tables".to_string()))?;
        Ok(tables.keys().cloned().collect())
    }

    /// Keepalive round trip
    pub async fn echo(&self) -> Result<()> {
        self.call("echo", json!([])).await.map(|_| ())
    }

    /// Submit a transaction and validate every operation's result
    pub async fn transact(&self, txn: Transaction) -> Result<Vec<OperationResult>> {
        if txn.is_empty() {
            return Ok(Vec::new());
        }
        let expected = txn.len();
        let params = txn.to_params()?;
        debug!(
            database = txn.database(),
            operations = expected,
            "OVSDB transact"
        );

        let result = self.call("transact", params).await?;
        check_results(expected, result)
    }

    /// Start a monitor; updates are delivered on the returned channel
    pub async fn monitor(&self, db: &str, monitor_id: &str, requests: Value) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .monitors
            .lock()
            .await
            .insert(monitor_id.to_string(), tx);

        let initial = match self.call("monitor", json!([db, monitor_id, requests])).await {
            Ok(initial) => initial,
            Err(e) => {
                self.shared.monitors.lock().await.remove(monitor_id);
                return Err(e);
            }
        };

        let initial: TableUpdates = if initial.is_null() {
            TableUpdates::new()
        } else {
            serde_json::from_value(initial)?
        };

        Ok(Subscription {
            initial,
            updates: rx,
        })
    }

    /// Monitor every column of every table in `db`
    pub async fn monitor_all(&self, db: &str) -> Result<Subscription> {
        let requests: Map<String, Value> = self
            .table_names(db)
            .await?
            .into_iter()
            .map(|table| (table, json!({})))
            .collect();
        info!("Monitoring {} tables of {}", requests.len(), db);
        self.monitor(db, db, Value::Object(requests)).await
    }
}

impl Drop for OvsdbClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
