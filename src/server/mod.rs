//! RPC server: accept loop, per-connection request loop, dispatcher
//!
//! The accept loop runs on the caller's thread; each accepted socket is
//! handed to the worker pool, whose worker runs that connection's whole
//! request/response loop. Within one connection requests are therefore
//! strictly serial; across connections the only coupling is the pool
//! size.
//!
//! Every recoverable failure is converted into a failure envelope and the
//! connection keeps serving. Only a transport failure on the socket (or
//! the `quit` sentinel) ends a connection.
// (c) 2025 Ross Younger

mod pool;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::RpcError;
use crate::method::{CallError, IntoMethod, MethodRegistry};
use crate::protocol::envelope::{self, Failure, FailureKind, Response};
use crate::protocol::frame::{read_frame, write_frame, QUIT_SENTINEL};
use crate::serial::TaggedValue;

use pool::WorkerPool;

/// The RPC server: a method registry plus a listening socket.
///
/// Register every method before calling [`run`](Server::run); the
/// registry is frozen once serving begins.
///
/// ```no_run
/// use tagrpc::{Server, ServerConfig};
///
/// let mut server = Server::new(ServerConfig::default());
/// let _ = server
///     .register("add", |a: i64, b: i64| Ok(a + b))
///     .register("greet", |name: String| Ok(format!("hello, {name}")));
/// server.run().unwrap();
/// ```
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    methods: MethodRegistry,
    listener: Option<TcpListener>,
}

impl Server {
    /// Creates a server with an empty registry. Nothing is bound yet.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            listener: None,
        }
    }

    /// Registers a handler under a name, replacing any previous handler
    /// of that name. Chainable.
    pub fn register<F, Args, R>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: IntoMethod<Args, R>,
    {
        info!("method registered: {name}");
        self.methods.insert(name, handler.into_method());
        self
    }

    /// Binds the configured address and port, reporting the actual local
    /// address (useful with port 0). Idempotent.
    pub fn bind(&mut self) -> Result<SocketAddr, RpcError> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr().map_err(RpcError::from)?);
        }
        let listener = TcpListener::bind((self.config.address.as_str(), self.config.port))?;
        let addr = listener.local_addr()?;
        info!("listening on {addr}");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Serves forever: accepts connections and hands each to the worker
    /// pool. Binds first if [`bind`](Server::bind) has not been called.
    ///
    /// An error accepting one connection is logged and the loop carries
    /// on; only failure to bind or to start the pool is returned.
    pub fn run(mut self) -> Result<(), RpcError> {
        let addr = self.bind()?;
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind((self.config.address.as_str(), self.config.port))?,
        };
        let methods = Arc::new(self.methods);
        let pool = WorkerPool::new(self.config.workers)?;
        info!("serving on {addr} with {} workers", pool.size());

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    debug!(
                        "accepted connection from {}",
                        peer_name(&stream)
                    );
                    let methods = Arc::clone(&methods);
                    let limit = self.config.max_frame_size;
                    pool.execute(move || connection_loop(stream, &methods, limit));
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
        Ok(())
    }
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map_or_else(|_| "<unknown peer>".to_string(), |a| a.to_string())
}

/// One connection's request/response loop, run to completion on a pool
/// worker.
fn connection_loop(mut stream: TcpStream, methods: &MethodRegistry, limit: u64) {
    let peer = peer_name(&stream);
    loop {
        let payload = match read_frame(&mut stream, limit) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("connection from {peer} ended: {e}");
                return;
            }
        };
        if payload == QUIT_SENTINEL {
            debug!("{peer} sent quit");
            return;
        }
        trace!("request from {peer}: {} bytes", payload.len());
        let response = dispatch(methods, &payload);
        match &response {
            Response::Failed(failure) => {
                warn!("request from {peer} failed: {}", failure.message);
            }
            Response::Success { .. } => trace!("request from {peer} succeeded"),
        }
        let text = match serde_json::to_vec(&response) {
            Ok(text) => text,
            Err(e) => {
                warn!("response for {peer} did not encode: {e}");
                return;
            }
        };
        if let Err(e) = write_frame(&mut stream, &text) {
            debug!("send to {peer} failed: {e}");
            return;
        }
    }
}

/// Routes one request payload to its handler and produces the response.
///
/// Never panics and never fails: every outcome, including a handler
/// panic, becomes a response document.
fn dispatch(methods: &MethodRegistry, payload: &[u8]) -> Response {
    // 1. the payload must parse as an envelope document
    let doc: Value = match serde_json::from_slice(payload) {
        Ok(doc) => doc,
        Err(e) => {
            return Response::Failed(Failure {
                codec_error: Some(e.to_string()),
                ..Failure::new(FailureKind::InvalidRequest)
            })
        }
    };
    // 2. required fields: a string `id` and an array `args`
    let Some(id) = doc.get("id").and_then(Value::as_str) else {
        return Response::failure(FailureKind::InvalidMethodId);
    };
    let Some(args) = doc.get("args").and_then(Value::as_array) else {
        return Response::failure(FailureKind::InvalidArgument);
    };
    // 3. the method must exist
    let Some(method) = methods.get(id) else {
        return Response::failure(FailureKind::UnknownId);
    };
    // 4. the argument array must pair up and match the declared tags
    let refused = || {
        Response::Failed(Failure {
            expected_args: Some(method.expected_args().to_vec()),
            ..Failure::new(FailureKind::InvalidArgument)
        })
    };
    let Some(pairs) = envelope::pair_strings(args) else {
        return refused();
    };
    if !method.check_args(&pairs) {
        return refused();
    }
    // 5. the caller's expected return tag, when present, must match
    if let Some(expected) = doc.get("expected_ret") {
        if !expected.as_str().is_some_and(|tag| method.check_ret(tag)) {
            return Response::Failed(Failure {
                expected_ret: Some(method.expected_ret().to_owned()),
                ..Failure::new(FailureKind::InvalidExpectedRet)
            });
        }
    }
    // payloads become opaque byte strings only now, post-validation
    let values = match pairs
        .iter()
        .map(|(tag, payload)| Ok(TaggedValue::from_parts(*tag, hex::decode(payload)?)))
        .collect::<Result<Vec<_>, hex::FromHexError>>()
    {
        Ok(values) => values,
        Err(e) => {
            return Response::Failed(Failure {
                expected_args: Some(method.expected_args().to_vec()),
                codec_error: Some(e.to_string()),
                ..Failure::new(FailureKind::InvalidArgument)
            })
        }
    };
    // 6./7. invoke; a panicking handler must not take the worker down
    let outcome =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| method.call(values)));
    match outcome {
        Ok(Ok(ret)) => Response::success(&ret),
        Ok(Err(CallError::Handler(text))) => Response::Failed(Failure {
            handler_error: Some(text),
            ..Failure::new(FailureKind::InvokeError)
        }),
        Ok(Err(CallError::BadArgument(e))) => Response::Failed(Failure {
            expected_args: Some(method.expected_args().to_vec()),
            codec_error: Some(e.to_string()),
            ..Failure::new(FailureKind::InvalidArgument)
        }),
        Ok(Err(CallError::BadReturn(e))) => Response::Failed(Failure {
            handler_error: Some(e.to_string()),
            ..Failure::new(FailureKind::UnknownError)
        }),
        Err(panic) => Response::Failed(Failure {
            handler_error: Some(panic_text(&panic)),
            ..Failure::new(FailureKind::UnknownError)
        }),
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
