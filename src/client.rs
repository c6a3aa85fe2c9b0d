//! RPC client: a persistent connection with synchronous and asynchronous
//! call primitives
//!
//! A [`Client`] owns one framed TCP connection. [`Client::call`] blocks
//! for the round trip; [`Client::async_call`] runs the same exchange on a
//! background thread and hands back a [`PendingCall`] to wait on. Either
//! way the send-then-receive pair happens under the connection lock, so
//! concurrent calls on one client never interleave frames.
// (c) 2025 Ross Younger

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, trace};

use crate::error::RpcError;
use crate::protocol::envelope::{self, Failure, FailureKind, Request, Response};
use crate::protocol::frame::{read_frame, write_frame, DEFAULT_MAX_PAYLOAD, QUIT_SENTINEL};
use crate::serial::{SerialError, Serializable, TaggedValue, UNIT_TAG};

/// An argument list for a call: any tuple of up to eight [`Serializable`]
/// values, including the empty tuple.
pub trait CallArgs {
    /// Encodes the tuple into tagged values, in order
    fn into_values(self) -> Result<Vec<TaggedValue>, SerialError>;
}

impl CallArgs for () {
    fn into_values(self) -> Result<Vec<TaggedValue>, SerialError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_call_args {
    ($($idx:tt => $name:ident),+) => {
        impl<$($name: Serializable),+> CallArgs for ($($name,)+) {
            fn into_values(self) -> Result<Vec<TaggedValue>, SerialError> {
                Ok(vec![$(TaggedValue::encode(&self.$idx)?),+])
            }
        }
    };
}

impl_call_args!(0 => A1);
impl_call_args!(0 => A1, 1 => A2);
impl_call_args!(0 => A1, 1 => A2, 2 => A3);
impl_call_args!(0 => A1, 1 => A2, 2 => A3, 3 => A4);
impl_call_args!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5);
impl_call_args!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5, 5 => A6);
impl_call_args!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5, 5 => A6, 6 => A7);
impl_call_args!(0 => A1, 1 => A2, 2 => A3, 3 => A4, 4 => A5, 5 => A6, 6 => A7, 7 => A8);

/// The connection, shared between the client and any in-flight
/// asynchronous calls. The mutex makes the send/recv pair atomic with
/// respect to other calls on the same connection.
#[derive(Debug)]
struct Connection {
    stream: Mutex<TcpStream>,
    max_frame_size: u64,
}

impl Connection {
    fn exchange<R: Serializable>(
        &self,
        id: &str,
        values: Vec<TaggedValue>,
    ) -> Result<R, RpcError> {
        let request = Request {
            id: id.to_owned(),
            expected_ret: Some(R::type_tag().into_owned()),
            args: envelope::values_to_array(&values),
        };
        let text = serde_json::to_vec(&request).map_err(|e| RpcError::Encoding(e.to_string()))?;
        trace!("calling {id}: request of {} bytes", text.len());
        let payload = {
            let mut stream = self
                .stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            write_frame(&mut *stream, &text)?;
            read_frame(&mut *stream, self.max_frame_size)?
        };
        let response: Response =
            serde_json::from_slice(&payload).map_err(|e| RpcError::Encoding(e.to_string()))?;
        match response {
            Response::Success { ret } => decode_return::<R>(&ret),
            Response::Failed(failure) => Err(failure_to_error(id, failure)),
        }
    }
}

impl Drop for Connection {
    // Best-effort graceful close: tell the server we are done so its
    // worker can move on without waiting for a socket error.
    fn drop(&mut self) {
        let mut stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = write_frame(&mut *stream, QUIT_SENTINEL);
    }
}

/// Decodes the `return` array of a success response into the caller's
/// expected type.
fn decode_return<R: Serializable>(array: &[String]) -> Result<R, RpcError> {
    if array.is_empty() {
        if R::type_tag() == UNIT_TAG {
            return Ok(R::from_bytes(&[])?);
        }
        return Err(RpcError::TypeMismatch {
            expected_args: None,
            expected_ret: Some(R::type_tag().into_owned()),
        });
    }
    let values = envelope::array_to_values(array)?;
    let [value] = values.as_slice() else {
        return Err(RpcError::TypeMismatch {
            expected_args: None,
            expected_ret: Some(R::type_tag().into_owned()),
        });
    };
    value.decode::<R>().map_err(|e| match e {
        SerialError::TagMismatch { expected, .. } => RpcError::TypeMismatch {
            expected_args: None,
            expected_ret: Some(expected),
        },
        other => RpcError::Serializer(other),
    })
}

/// Maps an in-band failure response onto the error taxonomy.
fn failure_to_error(id: &str, failure: Failure) -> RpcError {
    let Failure {
        message,
        expected_args,
        expected_ret,
        codec_error,
        handler_error,
    } = failure;
    match message {
        FailureKind::UnknownId => RpcError::UnknownMethod { id: id.to_owned() },
        FailureKind::InvalidArgument if expected_args.is_some() => RpcError::TypeMismatch {
            expected_args,
            expected_ret: None,
        },
        FailureKind::InvalidExpectedRet => RpcError::TypeMismatch {
            expected_args: None,
            expected_ret,
        },
        FailureKind::InvokeError | FailureKind::UnknownError => {
            RpcError::HandlerFailure(handler_error.unwrap_or_else(|| message.to_string()))
        }
        FailureKind::InvalidRequest
        | FailureKind::InvalidMethodId
        | FailureKind::InvalidArgument => {
            RpcError::Encoding(codec_error.unwrap_or_else(|| message.to_string()))
        }
    }
}

/// A handle to a call running on a background thread.
///
/// Obtain one from [`Client::async_call`]; consume it with
/// [`wait`](PendingCall::wait).
pub struct PendingCall<R> {
    handle: JoinHandle<Result<R, RpcError>>,
}

impl<R> std::fmt::Debug for PendingCall<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("finished", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

impl<R> PendingCall<R> {
    /// Blocks until the call completes and yields its result.
    pub fn wait(self) -> Result<R, RpcError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(RpcError::from(std::io::Error::other(
                "background call thread panicked",
            ))),
        }
    }

    /// True once the call has completed (so [`wait`](PendingCall::wait)
    /// will not block).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// The RPC client. Connects at construction and holds the connection for
/// its whole lifetime; on drop it sends the graceful-close sentinel
/// best-effort.
///
/// ```no_run
/// use tagrpc::Client;
///
/// let client = Client::connect("127.0.0.1:8765").unwrap();
/// let sum: i64 = client.call("add", (1_i64, 2_i64)).unwrap();
/// assert_eq!(sum, 3);
/// ```
#[derive(Debug)]
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Connects to a server.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)?;
        debug!("connected to {}", peer_name(&stream));
        Ok(Self {
            conn: Arc::new(Connection {
                stream: Mutex::new(stream),
                max_frame_size: DEFAULT_MAX_PAYLOAD,
            }),
        })
    }

    /// Calls a method and blocks for its result.
    ///
    /// `args` is a tuple of the argument values; `R` is the expected
    /// return type, whose tag travels with the request so the server can
    /// refuse a mismatch before invoking anything.
    pub fn call<R, A>(&self, method_id: &str, args: A) -> Result<R, RpcError>
    where
        R: Serializable,
        A: CallArgs,
    {
        self.conn.exchange::<R>(method_id, args.into_values()?)
    }

    /// Starts a call on a background thread and returns immediately.
    ///
    /// The arguments are encoded on the calling thread, so encoding
    /// failures surface when the handle is waited on without the types
    /// needing to cross threads. Transmission is serialised with every
    /// other call on this client.
    pub fn async_call<R, A>(&self, method_id: &str, args: A) -> PendingCall<R>
    where
        R: Serializable + Send + 'static,
        A: CallArgs,
    {
        let values = args.into_values();
        let conn = Arc::clone(&self.conn);
        let id = method_id.to_owned();
        let handle = std::thread::spawn(move || {
            let values = values?;
            conn.exchange::<R>(&id, values)
        });
        PendingCall { handle }
    }
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map_or_else(|_| "<unknown peer>".to_string(), |a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tuples_encode_in_order() {
        let values = (1_i32, "two".to_string(), 3.0_f64).into_values().unwrap();
        let tags: Vec<&str> = values.iter().map(TaggedValue::tag).collect();
        assert_eq!(tags, ["i32", "str", "f64"]);
    }

    #[test]
    fn empty_tuple_encodes_empty() {
        assert!(().into_values().unwrap().is_empty());
    }

    #[test]
    fn decode_return_single_value() {
        let array = envelope::values_to_array(&[TaggedValue::encode(&7_i32).unwrap()]);
        assert_eq!(decode_return::<i32>(&array).unwrap(), 7);
    }

    #[test]
    fn decode_return_unit() {
        decode_return::<()>(&[]).unwrap();
        let err = decode_return::<i32>(&[]).unwrap_err();
        assert!(matches!(err, RpcError::TypeMismatch { .. }));
    }

    #[test]
    fn decode_return_wrong_tag_is_a_type_mismatch() {
        let array = envelope::values_to_array(&[TaggedValue::encode(&7_i32).unwrap()]);
        let err = decode_return::<String>(&array).unwrap_err();
        let RpcError::TypeMismatch { expected_ret, .. } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(expected_ret, Some("str".to_string()));
    }

    #[test]
    fn failure_mapping() {
        let err = failure_to_error("f", Failure::new(FailureKind::UnknownId));
        assert!(matches!(err, RpcError::UnknownMethod { id } if id == "f"));

        let err = failure_to_error(
            "f",
            Failure {
                expected_args: Some(vec!["i32".into()]),
                ..Failure::new(FailureKind::InvalidArgument)
            },
        );
        assert!(matches!(err, RpcError::TypeMismatch { .. }));

        let err = failure_to_error("f", Failure::new(FailureKind::InvalidArgument));
        assert!(matches!(err, RpcError::Encoding(_)));

        let err = failure_to_error(
            "f",
            Failure {
                handler_error: Some("broke".into()),
                ..Failure::new(FailureKind::InvokeError)
            },
        );
        assert!(matches!(err, RpcError::HandlerFailure(text) if text == "broke"));

        let err = failure_to_error("f", Failure::new(FailureKind::InvalidRequest));
        assert!(matches!(err, RpcError::Encoding(text) if text == "invalid_request"));
    }
}
