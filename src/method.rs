//! Registered handlers: signature checking and type-erased invocation
//!
//! A [`Method`] wraps a user handler together with the wire tags of its
//! argument and return types. The server validates an incoming call's tags
//! against the descriptor before anything is deserialized; only a call
//! that matches element-wise reaches the handler.
//!
//! Handlers are plain closures taking up to eight [`Serializable`]
//! arguments and returning `anyhow::Result<R>`. An `Err` is reported to
//! the caller in-band as an invoke failure carrying the error text.
// (c) 2025 Ross Younger

use std::collections::HashMap;

use crate::serial::{SerialError, Serializable, TaggedValue, UNIT_TAG};

/// What went wrong while invoking a method
#[derive(thiserror::Error, Debug)]
pub enum CallError {
    /// An argument payload did not decode as its declared type
    #[error("argument did not decode: {0}")]
    BadArgument(#[source] SerialError),
    /// The handler returned an error; carries its display chain
    #[error("{0}")]
    Handler(String),
    /// The handler's return value refused to encode
    #[error("return value did not encode: {0}")]
    BadReturn(#[source] SerialError),
}

type Invoker = Box<dyn Fn(Vec<TaggedValue>) -> Result<Vec<TaggedValue>, CallError> + Send + Sync>;

/// A registered handler plus its declared signature tags.
///
/// Immutable once constructed; lives in the registry for the server's
/// lifetime.
pub struct Method {
    arg_tags: Vec<String>,
    ret_tag: String,
    invoke: Invoker,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("arg_tags", &self.arg_tags)
            .field("ret_tag", &self.ret_tag)
            .finish_non_exhaustive()
    }
}

impl Method {
    /// Wraps a handler, reflecting its signature into wire tags.
    pub fn new<F, Args, R>(handler: F) -> Self
    where
        F: IntoMethod<Args, R>,
    {
        handler.into_method()
    }

    /// Checks an incoming argument list against the declared signature:
    /// the count must match and every tag must equal the corresponding
    /// declared tag. Payloads are opaque here.
    #[must_use]
    pub fn check_args(&self, pairs: &[(&str, &str)]) -> bool {
        pairs.len() == self.arg_tags.len()
            && pairs
                .iter()
                .zip(self.arg_tags.iter())
                .all(|(pair, expected)| pair.0 == expected.as_str())
    }

    /// Checks the caller's expected return tag against the declared one.
    #[must_use]
    pub fn check_ret(&self, expected: &str) -> bool {
        expected == self.ret_tag
    }

    /// Invokes the handler.
    ///
    /// Precondition: [`check_args`](Self::check_args) passed for the tags
    /// of `args`. The return list is empty for a unit-returning handler
    /// and a single value otherwise.
    pub fn call(&self, args: Vec<TaggedValue>) -> Result<Vec<TaggedValue>, CallError> {
        (self.invoke)(args)
    }

    /// The declared argument tags, for error reports
    #[must_use]
    pub fn expected_args(&self) -> &[String] {
        &self.arg_tags
    }

    /// The declared return tag, for error reports
    #[must_use]
    pub fn expected_ret(&self) -> &str {
        &self.ret_tag
    }
}

fn encode_return<R: Serializable>(value: &R) -> Result<Vec<TaggedValue>, CallError> {
    if R::type_tag() == UNIT_TAG {
        return Ok(Vec::new());
    }
    Ok(vec![TaggedValue::encode(value).map_err(CallError::BadReturn)?])
}

/// Conversion of a handler closure into a [`Method`].
///
/// Implemented for `Fn(A1, .., An) -> anyhow::Result<R>` for arities 0
/// through 8, where every argument type and the return type are
/// [`Serializable`]. A type without a `Serializable` impl fails to compile
/// at the registration site.
pub trait IntoMethod<Args, R> {
    /// Performs the conversion
    fn into_method(self) -> Method;
}

macro_rules! into_method_tuples {
    ($($arg:ident),*) => {
        impl<F, R $(, $arg)*> IntoMethod<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> anyhow::Result<R> + Send + Sync + 'static,
            R: Serializable,
            $($arg: Serializable,)*
        {
            fn into_method(self) -> Method {
                let arg_tags = vec![$(<$arg>::type_tag().into_owned()),*];
                let ret_tag = R::type_tag().into_owned();
                let invoke: Invoker = Box::new(
                    move |values: Vec<TaggedValue>| -> Result<Vec<TaggedValue>, CallError> {
                        #[allow(unused_variables, unused_mut)]
                        let mut values = values.into_iter();
                        $(
                            #[allow(non_snake_case)]
                            let $arg = values
                                .next()
                                .ok_or_else(|| CallError::BadArgument(SerialError::Custom(
                                    "argument list shorter than the declared arity".into(),
                                )))?
                                .decode::<$arg>()
                                .map_err(CallError::BadArgument)?;
                        )*
                        let ret = (self)($($arg),*)
                            .map_err(|e| CallError::Handler(format!("{e:#}")))?;
                        encode_return(&ret)
                    },
                );
                Method { arg_tags, ret_tag, invoke }
            }
        }
    };
}

into_method_tuples!();
into_method_tuples!(A1);
into_method_tuples!(A1, A2);
into_method_tuples!(A1, A2, A3);
into_method_tuples!(A1, A2, A3, A4);
into_method_tuples!(A1, A2, A3, A4, A5);
into_method_tuples!(A1, A2, A3, A4, A5, A6);
into_method_tuples!(A1, A2, A3, A4, A5, A6, A7);
into_method_tuples!(A1, A2, A3, A4, A5, A6, A7, A8);

/// The server's name-to-method mapping.
///
/// Populated before serving begins, read-only afterwards.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method under a name. Registering the same name again
    /// replaces the previous entry.
    pub fn insert(&mut self, name: impl Into<String>, method: Method) {
        let _ = self.methods.insert(name.into(), method);
    }

    /// Looks up a method by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Number of registered methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
