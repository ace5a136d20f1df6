// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The logical-to-physical compiler met a SPARQL feature outside the
    /// pipeline's scope (an aggregate, a federation clause, a negated
    /// reverse-property set, ...).
    ///
    /// Surfaced to the caller as a 4xx-equivalent; the query never starts.
    UnsupportedSparql,

    /// The storage adapter failed mid-quantum.
    ///
    /// The backend transaction for the quantum is aborted and no
    /// continuation is returned; only the results produced before the
    /// failure are handed back.
    StorageError,

    /// The control-tuples buffer (see [`crate::query::operators::closure`])
    /// exceeded its configured cap.
    ///
    /// Partial results are returned, no continuation is returned, and the
    /// backend transaction is aborted.
    TooManyResults,

    /// A FILTER or BIND expression failed to evaluate for one input
    /// mapping.
    ///
    /// Not fatal: per spec, the row is dropped and the scheduler keeps
    /// going. Callers that construct an `Error` of this kind are expected
    /// to log it and continue, never propagate it out of an operator.
    ExpressionEvalError,

    /// A term read from storage could not be decoded as N3.
    ///
    /// Not fatal: the offending triple is skipped.
    TermEncodingError,

    /// A continuation token referenced a stateful plan ID the session
    /// manager has never issued, or one it already deleted after
    /// `done=true`.
    UnknownPlanId,

    /// A continuation token's bytes didn't decode into a valid frame
    /// tree (wrong tag, truncated, or a shape the codec doesn't
    /// recognize).
    MalformedContinuation,

    /// An internal invariant of the engine was violated.
    ///
    /// Not recoverable; indicates a bug in this crate.
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::UnsupportedSparql => write!(f, "unsupported SPARQL construct"),
            ErrorKind::StorageError => write!(f, "storage adapter error"),
            ErrorKind::TooManyResults => write!(f, "too many control tuples"),
            ErrorKind::ExpressionEvalError => write!(f, "expression evaluation error"),
            ErrorKind::TermEncodingError => write!(f, "malformed RDF term"),
            ErrorKind::UnknownPlanId => write!(f, "unknown continuation plan id"),
            ErrorKind::MalformedContinuation => write!(f, "malformed continuation token"),
            ErrorKind::InternalError => write!(f, "internal query engine error"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The `abort_reason` string surfaced to the session manager (spec.md
    /// §7): `"storage:<detail>"` for storage errors, `"too_many_paths"`
    /// for a control-tuples overflow.
    pub fn abort_reason(&self) -> String {
        match self.kind {
            ErrorKind::StorageError => format!("storage:{self}"),
            ErrorKind::TooManyResults => "too_many_paths".to_string(),
            other => other.to_string(),
        }
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}
