//! Requests, responses and the argument lists they carry.
//!
//! Values crossing the wire are [`serde_json::Value`]s regardless of the
//! serializer in use, so a worker sees the same shapes from a JSON client as
//! from a MessagePack one.

use serde_json::{Map, Value};

use crate::error::{RadicalError, Result};

/// Positional and keyword arguments for a call.
///
/// # Example
///
/// ```
/// use radical::Arguments;
/// use serde_json::json;
///
/// let args = Arguments::new().arg(1300).arg(37).kwarg("round", true);
/// assert_eq!(args.args(), &[json!(1300), json!(37)]);
/// assert_eq!(args.kwargs().get("round"), Some(&json!(true)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl Arguments {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any previous value for `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }
}

impl From<()> for Arguments {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

impl From<(Vec<Value>, Map<String, Value>)> for Arguments {
    fn from((args, kwargs): (Vec<Value>, Map<String, Value>)) -> Self {
        Self { args, kwargs }
    }
}

/// A method name together with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl Signature {
    pub fn new(method: impl Into<String>, arguments: impl Into<Arguments>) -> Self {
        let arguments = arguments.into();
        Self {
            method: method.into(),
            args: arguments.args,
            kwargs: arguments.kwargs,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Clone out the arguments for an invocation.
    pub fn arguments(&self) -> Arguments {
        Arguments {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }
}

/// A call as it travels through the queue.
///
/// Without a `reply_to` token the call is fire-and-forget and the worker
/// never publishes a response for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    signature: Signature,
    reply_to: Option<String>,
}

impl Request {
    pub fn new(signature: Signature, reply_to: Option<String>) -> Self {
        // An empty token cannot name a channel; treat it as "no reply".
        let reply_to = reply_to.filter(|token| !token.is_empty());
        Self {
            signature,
            reply_to,
        }
    }

    /// A request that expects no reply.
    pub fn fire_and_forget(signature: Signature) -> Self {
        Self::new(signature, None)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn method(&self) -> &str {
        self.signature.method()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }
}

/// Outcome of one request.
///
/// `request` is only known on the worker side; it never crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    request: Option<Request>,
    result: Value,
    error: Option<String>,
}

impl Response {
    pub fn new(request: Option<Request>, result: Value, error: Option<String>) -> Self {
        Self {
            request,
            result,
            error: error.filter(|message| !message.is_empty()),
        }
    }

    /// A successful response to `request`.
    pub fn success(request: Request, result: Value) -> Self {
        Self::new(Some(request), result, None)
    }

    /// A failed response to `request`.
    pub fn failure(request: Request, error: impl Into<String>) -> Self {
        Self::new(Some(request), Value::Null, Some(error.into()))
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Reply token of the originating request, if any.
    pub fn reply_to(&self) -> Option<&str> {
        self.request.as_ref().and_then(Request::reply_to)
    }

    /// Convert into the caller-facing result. The error takes precedence.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(message) => Err(RadicalError::Remote { message }),
            None => Ok(self.result),
        }
    }
}
