// (c) 2025 Ross Younger

//! Type-tagged remote procedure calls over framed TCP.
//!
//! `tagrpc` lets a server process register named handler functions of
//! arbitrary argument and return shapes, and a client process invoke them
//! over a TCP connection with strongly-typed results. The transport is
//! deliberately plain; the value is the type-checked dispatch pipeline.
//! Every argument and return value travels with a type tag, the server
//! validates an incoming call against the registered handler's signature
//! before anything runs, and the client validates the returned tag before
//! handing the value back.
//!
//! ## Overview
//!
//! - Handlers are plain closures over [`Serializable`] types, registered
//!   by name; mismatched calls are refused before the handler runs, with
//!   the expected signature reported back to the caller.
//! - One blocking TCP connection per client; a bounded worker-pool server
//!   (each connection pinned to one worker for its lifetime).
//! - Synchronous [`Client::call`] and thread-backed
//!   [`Client::async_call`]; concurrent calls on one client are
//!   serialised at the connection so frames never interleave.
//! - In-band error taxonomy: the server turns every recoverable failure
//!   into a failure response and keeps serving the connection.
//!
//! ## Getting started
//!
//! ```no_run
//! use tagrpc::{Client, Server, ServerConfig};
//!
//! // Server process:
//! let mut server = Server::new(ServerConfig::default());
//! let _ = server.register("add", |a: i64, b: i64| Ok(a + b));
//! std::thread::spawn(move || server.run());
//!
//! // Client process:
//! let client = Client::connect("127.0.0.1:8765").unwrap();
//! let sum: i64 = client.call("add", (1_i64, 2_i64)).unwrap();
//! assert_eq!(sum, 3);
//! ```
//!
//! Custom types implement [`Serializable`] by hand, or via
//! [`impl_serializable!`] for plain structs (field-by-field, no layout
//! sensitivity).
//!
//! ## Limitations
//!
//! - Calls on one connection are strictly serial; there is no streaming,
//!   multiplexing, cancellation, or authentication.
//! - There is no deadline on handler execution. A slow handler occupies
//!   its worker (reducing pool capacity) but does not block other
//!   connections up to the pool size.
//! - Type tags are compared by equality only: both peers must be built
//!   against the same type definitions.
//!
//! The wire format is documented in [protocol].

pub mod client;
pub mod config;
pub mod error;
pub mod method;
pub mod protocol;
pub mod serial;
pub mod server;

pub use client::{CallArgs, Client, PendingCall};
pub use config::ServerConfig;
pub use error::RpcError;
pub use method::{IntoMethod, Method, MethodRegistry};
pub use serial::{SerialError, Serializable, TaggedValue};
pub use server::Server;
