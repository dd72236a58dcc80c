//! In-memory media server for testing
//!
//! Serves both connection flavors from one object table, records every
//! call, and can be scripted to fail or to answer slowly.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use remotemedia_media_client::{
    AsyncMediaServerClient, MediaObjectRef, MediaServerClient, MediaServerConnector, Request,
    Response, RpcError, RpcResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Code the mock reports for references it does not know
pub const UNKNOWN_OBJECT_CODE: i32 = 40101;

/// Code the mock reports for unknown subscription tokens
pub const UNKNOWN_TOKEN_CODE: i32 = 40102;

/// Code the mock reports for commands without a scripted result
pub const UNKNOWN_COMMAND_CODE: i32 = 40103;

/// Scripted failure for one RPC name
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Server-reported failure with this code
    Server(i32),
    /// Connection drops mid-call
    Broken,
    /// Reply of a shape the request never produces
    Malformed,
}

#[derive(Debug, Clone)]
struct ObjectRecord {
    parent: Option<MediaObjectRef>,
    pipeline: MediaObjectRef,
}

#[derive(Default)]
struct ServerState {
    objects: HashMap<MediaObjectRef, ObjectRecord>,
    subscriptions: HashMap<String, MediaObjectRef>,
    command_results: HashMap<String, Bytes>,
    faults: HashMap<&'static str, Fault>,
    calls: Vec<(MediaObjectRef, &'static str)>,
    last_handler: Option<(String, u16)>,
    latency: Option<Duration>,
}

/// Mock media server shared by every connection it hands out
#[derive(Default)]
pub struct MockMediaServer {
    state: Mutex<ServerState>,
    connections_opened: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockMediaServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connector opening connections to this server
    pub fn connector(self: &Arc<Self>) -> Arc<dyn MediaServerConnector> {
        Arc::new(MockConnector {
            server: Arc::clone(self),
        })
    }

    /// Create a pipeline on the server
    pub fn add_pipeline(&self, id: &str) -> MediaObjectRef {
        let reference = MediaObjectRef::pipeline(id);
        self.state.lock().objects.insert(
            reference.clone(),
            ObjectRecord {
                parent: None,
                pipeline: reference.clone(),
            },
        );
        reference
    }

    /// Create an element whose parent is `parent`
    pub fn add_element(&self, kind: &str, id: &str, parent: &MediaObjectRef) -> MediaObjectRef {
        let reference = MediaObjectRef::new(kind, id);
        let mut state = self.state.lock();
        let pipeline = state
            .objects
            .get(parent)
            .map(|record| record.pipeline.clone())
            .unwrap_or_else(|| parent.clone());
        state.objects.insert(
            reference.clone(),
            ObjectRecord {
                parent: Some(parent.clone()),
                pipeline,
            },
        );
        reference
    }

    /// Result bytes returned for a command type
    pub fn set_command_result(&self, command_type: &str, result: impl Into<Bytes>) {
        self.state
            .lock()
            .command_results
            .insert(command_type.to_string(), result.into());
    }

    /// Fail every call of `rpc` until cleared
    pub fn fail(&self, rpc: &'static str, fault: Fault) {
        self.state.lock().faults.insert(rpc, fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Delay every reply
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn is_alive(&self, reference: &MediaObjectRef) -> bool {
        self.state.lock().objects.contains_key(reference)
    }

    /// Number of active subscriptions
    pub fn subscriptions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of calls of `rpc` received so far
    pub fn calls_to(&self, rpc: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, name)| *name == rpc)
            .count()
    }

    /// Number of calls of `rpc` addressed to `target`
    pub fn calls_to_object(&self, rpc: &str, target: &MediaObjectRef) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(reference, name)| *name == rpc && reference == target)
            .count()
    }

    /// Event handler address of the most recent subscription
    pub fn last_handler(&self) -> Option<(String, u16)> {
        self.state.lock().last_handler.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().latency
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn handle(&self, target: &MediaObjectRef, request: &Request) -> RpcResult<Response> {
        let mut state = self.state.lock();
        state.calls.push((target.clone(), request.name()));

        match state.faults.get(request.name()) {
            Some(Fault::Server(code)) => {
                return Err(RpcError::Server {
                    message: format!("scripted failure of {}", request.name()),
                    code: *code,
                })
            }
            Some(Fault::Broken) => {
                return Err(RpcError::Broken(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )))
            }
            Some(Fault::Malformed) => {
                return Ok(match request {
                    Request::Release | Request::Unsubscribe { .. } | Request::KeepAlive => {
                        Response::Token("garbage".into())
                    }
                    _ => Response::Unit,
                })
            }
            None => {}
        }

        let record = match state.objects.get(target) {
            Some(record) => record.clone(),
            None => {
                return Err(RpcError::Server {
                    message: format!("Object '{}' not found", target),
                    code: UNKNOWN_OBJECT_CODE,
                })
            }
        };

        match request {
            Request::Release => {
                state.objects.remove(target);
                state
                    .objects
                    .retain(|_, child| child.parent.as_ref() != Some(target));
                state.subscriptions.retain(|_, owner| owner != target);
                Ok(Response::Unit)
            }
            Request::Subscribe {
                handler_address,
                handler_port,
            } => {
                state.last_handler = Some((handler_address.clone(), *handler_port));
                let token = uuid::Uuid::new_v4().to_string();
                state.subscriptions.insert(token.clone(), target.clone());
                Ok(Response::Token(token))
            }
            Request::Unsubscribe { token } => match state.subscriptions.remove(token) {
                Some(_) => Ok(Response::Unit),
                None => Err(RpcError::Server {
                    message: format!("Unknown subscription {}", token),
                    code: UNKNOWN_TOKEN_CODE,
                }),
            },
            Request::SendCommand(command) => state
                .command_results
                .get(command.command_type())
                .cloned()
                .map(Response::CommandResult)
                .ok_or_else(|| RpcError::Server {
                    message: format!("Unknown command {}", command.command_type()),
                    code: UNKNOWN_COMMAND_CODE,
                }),
            Request::KeepAlive => Ok(Response::Unit),
            Request::GetParent => Ok(Response::Reference(record.parent)),
            Request::GetMediaPipeline => Ok(Response::Reference(Some(record.pipeline))),
        }
    }
}

struct MockConnector {
    server: Arc<MockMediaServer>,
}

#[async_trait]
impl MediaServerConnector for MockConnector {
    fn connect_blocking(&self) -> RpcResult<Box<dyn MediaServerClient>> {
        self.server.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            server: Arc::clone(&self.server),
        }))
    }

    async fn connect(&self) -> RpcResult<Box<dyn AsyncMediaServerClient>> {
        self.server.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            server: Arc::clone(&self.server),
        }))
    }
}

struct MockClient {
    server: Arc<MockMediaServer>,
}

impl MediaServerClient for MockClient {
    fn call(&mut self, target: &MediaObjectRef, request: &Request) -> RpcResult<Response> {
        self.server.enter();
        if let Some(latency) = self.server.latency() {
            std::thread::sleep(latency);
        }
        let reply = self.server.handle(target, request);
        self.server.leave();
        reply
    }
}

#[async_trait]
impl AsyncMediaServerClient for MockClient {
    async fn call(&mut self, target: &MediaObjectRef, request: &Request) -> RpcResult<Response> {
        self.server.enter();
        if let Some(latency) = self.server.latency() {
            tokio::time::sleep(latency).await;
        }
        let reply = self.server.handle(target, request);
        self.server.leave();
        reply
    }
}
