//! The error taxonomy observed by library callers
// (c) 2025 Ross Younger

use crate::protocol::frame::FrameError;
use crate::serial::SerialError;

/// Everything that can go wrong with a call, from either side's point of
/// view.
///
/// On the server every recoverable failure is converted into a failure
/// envelope and the connection keeps serving; these variants are what the
/// *client* observes, whether the failure was local (transport, encoding)
/// or reported in-band by the server.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    /// Socket failure, framing failure, or the connection closed
    /// unexpectedly
    #[error("transport failure: {0}")]
    Transport(#[from] FrameError),

    /// An envelope failed to parse, or a required field was missing or
    /// ill-typed
    #[error("encoding failure: {0}")]
    Encoding(String),

    /// The argument or return tags did not match the handler's signature;
    /// carries whichever side data the server reported
    #[error("type mismatch (expected arguments {expected_args:?}, expected return {expected_ret:?})")]
    TypeMismatch {
        /// the handler's declared argument tags, when reported
        expected_args: Option<Vec<String>>,
        /// the handler's declared return tag, when reported
        expected_ret: Option<String>,
    },

    /// No handler is registered under the requested name
    #[error("unknown method {id:?}")]
    UnknownMethod {
        /// the name that was called
        id: String,
    },

    /// The handler raised; carries the handler's own message
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    /// A value refused to serialize or deserialize
    #[error("serializer failure: {0}")]
    Serializer(#[from] SerialError),
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(FrameError::Io(e))
    }
}
