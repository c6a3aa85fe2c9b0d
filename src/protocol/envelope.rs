//! Request and response envelope documents
//!
//! The payload of every frame is a textual envelope: a named tree with
//! typed leaves, for which we use JSON. A request names the method, the
//! expected return tag, and an argument array; a response is either
//! `success` with a return array or `failed` with one of the
//! [`FailureKind`] constants and optional side data.
//!
//! # Tagged values in arrays
//!
//! Each [`TaggedValue`] contributes exactly two consecutive string
//! elements to an array: the type tag, then the payload hex-encoded (the
//! payload may be arbitrary bytes; hex keeps it representable as a JSON
//! string). An N-argument call therefore has a 2N-element array, and a
//! return array has zero or two elements.
// (c) 2025 Ross Younger

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serial::{SerialError, TaggedValue};

/// The error kind constants carried in a failure response's `message`
/// field
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The envelope text failed to parse
    InvalidRequest,
    /// `id` was missing or not a string
    InvalidMethodId,
    /// `args` was missing or ill-typed, or the argument tags were refused
    InvalidArgument,
    /// `expected_ret` was ill-typed or refused
    InvalidExpectedRet,
    /// No handler is registered under `id`
    UnknownId,
    /// The handler raised
    InvokeError,
    /// An otherwise-unclassified failure, e.g. a handler panic
    UnknownError,
}

/// A call request as placed on the wire by the client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method name
    pub id: String,
    /// Tag of the return type the caller expects; the server refuses the
    /// call if it does not match the handler's declared return
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_ret: Option<String>,
    /// Tagged-value encoding of the argument list
    pub args: Vec<String>,
}

/// The failure half of a [`Response`]: an error kind plus whatever side
/// data the failure produced
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Which kind of failure this is
    pub message: FailureKind,
    /// The argument tags the handler wanted (populated when the call's
    /// tags were refused and the method is known)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_args: Option<Vec<String>>,
    /// The handler's declared return tag (populated when `expected_ret`
    /// was refused)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_ret: Option<String>,
    /// Detail from the envelope or payload codec
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub codec_error: Option<String>,
    /// Detail from the handler that raised
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub handler_error: Option<String>,
}

impl Failure {
    /// A failure with no side data
    #[must_use]
    pub fn new(message: FailureKind) -> Self {
        Self {
            message,
            expected_args: None,
            expected_ret: None,
            codec_error: None,
            handler_error: None,
        }
    }
}

/// A response as placed on the wire by the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// The call ran; `return` carries zero or one tagged values
    Success {
        /// Tagged-value encoding of the return list
        #[serde(rename = "return")]
        ret: Vec<String>,
    },
    /// The call was refused or the handler raised
    Failed(Failure),
}

impl Response {
    /// A success response wrapping the given return values
    #[must_use]
    pub fn success(values: &[TaggedValue]) -> Self {
        Self::Success {
            ret: values_to_array(values),
        }
    }

    /// A failure response with no side data
    #[must_use]
    pub fn failure(message: FailureKind) -> Self {
        Self::Failed(Failure::new(message))
    }
}

/// Flattens tagged values into the two-strings-per-value array form.
#[must_use]
pub fn values_to_array(values: &[TaggedValue]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| [v.tag().to_owned(), hex::encode(v.payload())])
        .collect()
}

/// Rebuilds tagged values from an array of `[tag, hex payload, ...]`
/// pairs.
pub fn array_to_values(array: &[String]) -> Result<Vec<TaggedValue>, SerialError> {
    if array.len() % 2 != 0 {
        return Err(SerialError::Custom(
            "tagged-value array has a dangling element".into(),
        ));
    }
    array
        .chunks_exact(2)
        .map(|pair| Ok(TaggedValue::from_parts(&*pair[0], hex::decode(&pair[1])?)))
        .collect()
}

/// Views a raw envelope array as `(tag, payload)` string pairs.
///
/// Returns `None` if the array has odd length or any element is not a
/// string; the caller reports that as an argument failure.
#[must_use]
pub fn pair_strings(args: &[Value]) -> Option<Vec<(&str, &str)>> {
    if args.len() % 2 != 0 {
        return None;
    }
    args.chunks_exact(2)
        .map(|pair| match (pair[0].as_str(), pair[1].as_str()) {
            (Some(tag), Some(payload)) => Some((tag, payload)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_document_shape() {
        let request = Request {
            id: "add".to_string(),
            expected_ret: Some("i32".to_string()),
            args: vec!["i32".into(), "01000000".into()],
        };
        let doc: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            doc,
            json!({"id": "add", "expected_ret": "i32", "args": ["i32", "01000000"]})
        );
        let back: Request = serde_json::from_value(doc).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn expected_ret_is_optional() {
        let request = Request {
            id: "f".to_string(),
            expected_ret: None,
            args: vec![],
        };
        let text = serde_json::to_string(&request).unwrap();
        assert!(!text.contains("expected_ret"));
        let back: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn success_document_shape() {
        let response = Response::Success {
            ret: vec!["i32".into(), "02000000".into()],
        };
        let doc: Value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            doc,
            json!({"status": "success", "return": ["i32", "02000000"]})
        );
    }

    #[test]
    fn failure_document_omits_empty_side_data() {
        let doc: Value = serde_json::to_value(Response::failure(FailureKind::UnknownId)).unwrap();
        assert_eq!(doc, json!({"status": "failed", "message": "unknown_id"}));
    }

    #[test]
    fn failure_document_carries_side_data() {
        let response = Response::Failed(Failure {
            expected_args: Some(vec!["i32".into(), "i32".into()]),
            ..Failure::new(FailureKind::InvalidArgument)
        });
        let doc: Value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            doc,
            json!({
                "status": "failed",
                "message": "invalid_argument",
                "expected_args": ["i32", "i32"],
            })
        );
        let back: Response = serde_json::from_value(doc).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn failure_kind_constants() {
        assert_eq!(FailureKind::InvalidRequest.to_string(), "invalid_request");
        assert_eq!(FailureKind::InvalidMethodId.to_string(), "invalid_method_id");
        assert_eq!(FailureKind::InvalidArgument.to_string(), "invalid_argument");
        assert_eq!(
            FailureKind::InvalidExpectedRet.to_string(),
            "invalid_expected_ret"
        );
        assert_eq!(FailureKind::UnknownId.to_string(), "unknown_id");
        assert_eq!(FailureKind::InvokeError.to_string(), "invoke_error");
        assert_eq!(FailureKind::UnknownError.to_string(), "unknown_error");
    }

    #[test]
    fn value_array_roundtrip() {
        let values = vec![
            TaggedValue::from_parts("i32", vec![1, 0, 0, 0]),
            TaggedValue::from_parts("str", b"hi".to_vec()),
        ];
        let array = values_to_array(&values);
        assert_eq!(array, vec!["i32", "01000000", "str", "6869"]);
        assert_eq!(array_to_values(&array).unwrap(), values);
    }

    #[test]
    fn odd_array_is_refused() {
        let array = vec!["i32".to_string()];
        assert!(array_to_values(&array).is_err());
        assert_eq!(pair_strings(&[json!("i32")]), None);
    }

    #[test]
    fn non_string_elements_are_refused() {
        assert_eq!(pair_strings(&[json!("i32"), json!(1)]), None);
        assert_eq!(
            pair_strings(&[json!("i32"), json!("00000000")]),
            Some(vec![("i32", "00000000")])
        );
    }

    #[test]
    fn bad_hex_is_refused() {
        let array = vec!["i32".to_string(), "zz".to_string()];
        assert!(matches!(
            array_to_values(&array),
            Err(SerialError::Hex(_))
        ));
    }
}
