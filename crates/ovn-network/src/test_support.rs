//! Scripted in-process OVSDB server for unit tests

use ovn_ovsdb::protocol::MessageDecoder;
use ovn_ovsdb::{OvsdbClient, DEFAULT_TIMEOUT};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Requests received by the fake server, in order
pub(crate) type Recorded = Arc<Mutex<Vec<Value>>>;

/// Connect a client to a fake server that answers each request with the
/// next queued `result` value. Requests past the end of the script get no
/// answer.
pub(crate) fn scripted_client(results: Vec<Value>) -> (Arc<OvsdbClient>, Recorded) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&recorded);
    let mut script: VecDeque<Value> = results.into();

    tokio::spawn(async move {
        let (mut rd, mut wr) = tokio::io::split(server_io);
        let mut decoder = MessageDecoder::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            while let Ok(Some(request)) = decoder.next_value() {
                seen.lock().unwrap().push(request.clone());
                if let Some(result) = script.pop_front() {
                    let reply = json!({"id": request["id"], "result": result, "error": null});
                    let bytes = serde_json::to_vec(&reply).unwrap();
                    if wr.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let client = OvsdbClient::from_stream(client_io, "fake", DEFAULT_TIMEOUT);
    (Arc::new(client), recorded)
}

/// Operations of the `n`th recorded transact request
pub(crate) fn ops(recorded: &Recorded, n: usize) -> Vec<Value> {
    let requests = recorded.lock().unwrap();
    let params = requests[n]["params"].as_array().cloned().unwrap_or_default();
    params.into_iter().skip(1).collect()
}
