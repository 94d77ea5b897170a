//! Error types and result definitions for the ETL runtime.
//!
//! Every fallible operation in the runtime returns [`EtlResult`]. An [`EtlError`] carries an
//! [`ErrorKind`] used by retry judges and the write pipeline to classify failures, a static
//! description, optional dynamic detail, an optional source and the callsite that created it.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use etl_config::shared::ValidationError;

/// Result type for ETL runtime operations.
pub type EtlResult<T> = Result<T, EtlError>;

/// Payload of a single [`EtlError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the ETL runtime.
///
/// Cloning is cheap: sources and backtraces are reference counted, which lets schedulers hand the
/// same latched error to several observers.
#[derive(Debug, Clone)]
pub struct EtlError {
    payload: ErrorPayload,
}

/// Categories of failures produced or observed by the runtime.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Scheduling
    SchedulerClosed,
    OperationCanceled,
    TaskFailed,
    PostProcessFailed,
    WorkerPanic,

    // Record source
    ReceiverEmpty,
    ReceiverTerminated,
    SourceError,

    // Destination
    DestinationError,
    DestinationWriteFailed,

    // Shared resources
    ResourceCloseFailed,

    // Configuration
    ConfigError,
}

impl ErrorKind {
    /// Returns `true` for kinds that mark a normal end of processing rather than a failure.
    ///
    /// The write pipeline treats caller cancellation and an exhausted record source as success.
    pub fn is_graceful_stop(&self) -> bool {
        matches!(
            self,
            ErrorKind::OperationCanceled | ErrorKind::ReceiverTerminated
        )
    }
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.payload.backtrace
    }

    /// Attaches a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        write!(
            f,
            "[{:?}] {} @ {}:{}",
            payload.kind,
            payload.description,
            payload.location.file(),
            payload.location.line(),
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<ValidationError> for EtlError {
    #[track_caller]
    fn from(err: ValidationError) -> EtlError {
        let detail = err.to_string();
        EtlError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
