//! A connection to one language server subprocess.
//!
//! The client owns the child process, a monotonic request counter, a pending
//! map correlating request ids to in-flight callers, and the set of open
//! documents. A single background task reads framed messages off the child's
//! stdout; on read error the error latches and every subsequent call on this
//! client fails with it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::transport;
use super::types::*;
use crate::{IndexError, Result};

/// Imposed on every request whose caller carries no deadline of its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Language servers can take a while to come up; `initialize` gets longer.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<StdMutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

pub struct Client {
    lang: String,
    child: StdMutex<Child>,
    stdin: Mutex<ChildStdin>,
    seq: AtomicI64,
    pending: Pending,
    fatal: Arc<StdMutex<Option<String>>>,
    open_docs: StdMutex<HashMap<String, i32>>,
    init_at: StdMutex<Option<Instant>>,
}

impl Client {
    /// Spawn the server, run the initialize handshake, and record the init
    /// timestamp.
    pub async fn spawn(
        cancel: &CancellationToken,
        lang: &str,
        cmd: &str,
        args: &[String],
        root_uri: String,
    ) -> Result<Arc<Self>> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IndexError::ServerStart {
                lang: lang.to_string(),
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| IndexError::ServerStart {
            lang: lang.to_string(),
            message: "child stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| IndexError::ServerStart {
            lang: lang.to_string(),
            message: "child stdout unavailable".to_string(),
        })?;

        let client = Arc::new(Self {
            lang: lang.to_string(),
            child: StdMutex::new(child),
            stdin: Mutex::new(stdin),
            seq: AtomicI64::new(0),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            fatal: Arc::new(StdMutex::new(None)),
            open_docs: StdMutex::new(HashMap::new()),
            init_at: StdMutex::new(None),
        });

        tokio::spawn(read_loop(
            BufReader::new(stdout),
            client.pending.clone(),
            client.fatal.clone(),
            lang.to_string(),
        ));

        let init_params = InitializeParams {
            process_id: std::process::id(),
            root_uri,
            capabilities: ClientCapabilities::default(),
        };
        client
            .call(cancel, Some(INITIALIZE_TIMEOUT), "initialize", init_params)
            .await
            .map_err(|e| IndexError::ServerStart {
                lang: lang.to_string(),
                message: format!("initialize failed: {e}"),
            })?;

        client.notify("initialized", serde_json::json!({})).await?;
        *lock(&client.init_at) = Some(Instant::now());

        tracing::info!("Started {} language server (indexing in background)", lang);
        Ok(client)
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// When `initialize` completed, for the orchestrator's adaptive wait.
    pub fn init_time(&self) -> Option<Instant> {
        *lock(&self.init_at)
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout: None` applies [`DEFAULT_REQUEST_TIMEOUT`]. Timeouts surface
    /// as [`IndexError::RpcTimeout`], distinct from server-reported errors.
    pub async fn call<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        method: &'static str,
        params: P,
    ) -> Result<Value> {
        if let Some(msg) = lock(&self.fatal).clone() {
            return Err(IndexError::Protocol(msg));
        }

        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let result = self.call_inner(cancel, timeout, method, params, id, rx).await;
        lock(&self.pending).remove(&id);
        result
    }

    async fn call_inner<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        method: &'static str,
        params: P,
        id: i64,
        rx: oneshot::Receiver<Result<Value>>,
    ) -> Result<Value> {
        let request = Request {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };
        {
            let mut stdin = self.stdin.lock().await;
            transport::write_message(&mut *stdin, &request).await?;
        }

        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        tokio::select! {
            reply = rx => match reply {
                Ok(reply) => reply,
                Err(_) => {
                    let msg = lock(&self.fatal)
                        .clone()
                        .unwrap_or_else(|| "language server connection closed".to_string());
                    Err(IndexError::Protocol(msg))
                }
            },
            _ = cancel.cancelled() => Err(IndexError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(IndexError::RpcTimeout(timeout)),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify<P: Serialize>(&self, method: &'static str, params: P) -> Result<()> {
        let request = Request {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        };
        let mut stdin = self.stdin.lock().await;
        transport::write_message(&mut *stdin, &request).await
    }

    /// Notify the server that a document is open; records version 1.
    pub async fn did_open(&self, uri: &str, language_id: &str, text: &str) -> Result<()> {
        lock(&self.open_docs).insert(uri.to_string(), 1);
        self.notify(
            "textDocument/didOpen",
            DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.to_string(),
                    language_id: language_id.to_string(),
                    version: 1,
                    text: text.to_string(),
                },
            },
        )
        .await
    }

    /// Notify the server that a document was closed.
    pub async fn did_close(&self, uri: &str) -> Result<()> {
        lock(&self.open_docs).remove(uri);
        self.notify(
            "textDocument/didClose",
            DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier {
                    uri: uri.to_string(),
                },
            },
        )
        .await
    }

    /// `textDocument/definition`; positions are 0-based.
    pub async fn definition(
        &self,
        cancel: &CancellationToken,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let value = self
            .call(
                cancel,
                None,
                "textDocument/definition",
                position_params(uri, line, character),
            )
            .await?;
        parse_locations(value)
    }

    /// `textDocument/implementation`; positions are 0-based.
    pub async fn implementation(
        &self,
        cancel: &CancellationToken,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let value = self
            .call(
                cancel,
                None,
                "textDocument/implementation",
                position_params(uri, line, character),
            )
            .await?;
        parse_locations(value)
    }

    /// `textDocument/references`; positions are 0-based.
    pub async fn references(
        &self,
        cancel: &CancellationToken,
        uri: &str,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let params = ReferenceParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
            position: Position { line, character },
            context: ReferenceContext {
                include_declaration,
            },
        };
        let value = self
            .call(cancel, None, "textDocument/references", params)
            .await?;
        parse_locations(value)
    }

    /// `textDocument/hover`; positions are 0-based.
    pub async fn hover(
        &self,
        cancel: &CancellationToken,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>> {
        let value = self
            .call(
                cancel,
                None,
                "textDocument/hover",
                position_params(uri, line, character),
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// `textDocument/documentSymbol`.
    pub async fn document_symbol(
        &self,
        cancel: &CancellationToken,
        uri: &str,
    ) -> Result<Vec<DocumentSymbol>> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
        };
        let value = self
            .call(cancel, None, "textDocument/documentSymbol", params)
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Close open documents best-effort and kill the subprocess.
    pub async fn shutdown(&self) {
        let uris: Vec<String> = lock(&self.open_docs).keys().cloned().collect();
        for uri in uris {
            let _ = self.did_close(&uri).await;
        }
        let mut child = lock(&self.child);
        if let Err(e) = child.start_kill() {
            tracing::debug!("Failed to kill {} language server: {}", self.lang, e);
        }
    }
}

fn position_params(uri: &str, line: u32, character: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier {
            uri: uri.to_string(),
        },
        position: Position { line, character },
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Background reader: decode frames, correlate responses with pending
/// requests, drop notifications and server→client requests.
async fn read_loop(
    mut stdout: BufReader<ChildStdout>,
    pending: Pending,
    fatal: Arc<StdMutex<Option<String>>>,
    lang: String,
) {
    loop {
        let body = match transport::read_message(&mut stdout).await {
            Ok(body) => body,
            Err(e) => {
                latch(&pending, &fatal, &lang, e.to_string());
                return;
            }
        };

        let response: RawResponse = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(e) => {
                latch(&pending, &fatal, &lang, format!("malformed frame: {e}"));
                return;
            }
        };

        // Ids arrive as integers or strings; anything else is dropped.
        let id = match &response.id {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse::<i64>().ok(),
            _ => None,
        };
        let Some(id) = id else { continue };

        let sender = lock(&pending).remove(&id);
        if let Some(sender) = sender {
            let reply = match response.error {
                Some(err) => Err(IndexError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
            let _ = sender.send(reply);
        }
    }
}

fn latch(pending: &Pending, fatal: &Arc<StdMutex<Option<String>>>, lang: &str, msg: String) {
    if !msg.contains("closed") {
        tracing::warn!("{} LSP read error: {}", lang, msg);
    }
    *lock(fatal) = Some(msg.clone());
    let senders: Vec<_> = lock(pending).drain().collect();
    for (_, sender) in senders {
        let _ = sender.send(Err(IndexError::Protocol(msg.clone())));
    }
}
