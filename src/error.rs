//! Error types for guise.
//!
//! Every failure is a variant of [`Error`]. Variants map onto a flat
//! [`ErrorKind`], and each kind knows its ancestor [`Category`] chain so
//! callers can match broadly (`Category::Transport`) or narrowly
//! (`ErrorKind::ConnectTimeout`).

use std::fmt;
use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HTTP operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect timeout (DNS + TCP + proxy + TLS/QUIC handshake).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Gap between response bytes exceeded the read timeout.
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// Gap while sending the request exceeded the write timeout.
    #[error("Write timeout after {0:?}")]
    WriteTimeout(Duration),

    /// No pooled connection slot became free in time.
    #[error("Pool acquire timeout after {0:?} - no connections available")]
    PoolTimeout(Duration),

    /// Failed to establish a connection (DNS, TCP, TLS, QUIC).
    #[error("Connection error: {0}")]
    Connect(String),

    /// Failed while receiving data.
    #[error("Read error: {0}")]
    Read(String),

    /// Failed while sending data.
    #[error("Write error: {0}")]
    Write(String),

    /// Failed while closing a connection.
    #[error("Close error: {0}")]
    Close(String),

    /// We were about to send something that violates the protocol.
    #[error("Local protocol error: {0}")]
    LocalProtocol(String),

    /// The peer sent something that violates the protocol.
    #[error("Remote protocol error: {0}")]
    RemoteProtocol(String),

    /// Proxy tunnel or handshake failed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Scheme or protocol combination we cannot speak.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Body, text or JSON decoding failed.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Redirect limit exceeded.
    #[error("Exceeded maximum allowed redirects ({count})")]
    TooManyRedirects { count: usize },

    /// Non-success status, raised on demand by `raise_for_status`.
    #[error("HTTP {status} {reason} for url {url}")]
    HttpStatus {
        status: u16,
        reason: String,
        url: String,
    },

    /// Malformed URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// More than one cookie matched a lookup that expects one.
    #[error("Cookie conflict: {0}")]
    CookieConflict(String),

    /// Body was already consumed by iteration or a buffered read.
    #[error("Attempted to read or stream content, but the content has already been consumed")]
    StreamConsumed,

    /// Body was closed explicitly.
    #[error("Attempted to read or stream content, but the stream has been closed")]
    StreamClosed,

    /// Content accessed before the body was read.
    #[error("Attempted to access content without having called `read()`")]
    ResponseNotRead,

    /// Request content accessed before it was read.
    #[error("Attempted to access request content without having read it")]
    RequestNotRead,

    /// Invalid client configuration (unknown browser, bad proxy URL, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid combination of call arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Leaf classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectTimeout,
    ReadTimeout,
    WriteTimeout,
    PoolTimeout,
    ConnectError,
    ReadError,
    WriteError,
    CloseError,
    LocalProtocolError,
    RemoteProtocolError,
    ProxyError,
    UnsupportedProtocol,
    DecodingError,
    TooManyRedirects,
    HttpStatusError,
    InvalidUrl,
    CookieConflict,
    StreamConsumed,
    StreamClosed,
    ResponseNotRead,
    RequestNotRead,
    ConfigurationError,
    InvalidArgument,
}

/// Ancestor groups of the error hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Root of everything raised while issuing or inspecting a request.
    Http,
    /// Request lifecycle failures.
    Request,
    /// Connection-level failures.
    Transport,
    /// Any of the four timeout classes.
    Timeout,
    /// Socket-level failures.
    Network,
    /// Framing or protocol violations.
    Protocol,
    /// Illegal body access.
    Stream,
}

use Category::{Http, Network, Protocol, Request, Stream, Timeout, Transport};

const TIMEOUT_CHAIN: &[Category] = &[Timeout, Transport, Request, Http];
const NETWORK_CHAIN: &[Category] = &[Network, Transport, Request, Http];
const PROTOCOL_CHAIN: &[Category] = &[Protocol, Transport, Request, Http];
const TRANSPORT_CHAIN: &[Category] = &[Transport, Request, Http];
const REQUEST_CHAIN: &[Category] = &[Request, Http];
const HTTP_CHAIN: &[Category] = &[Http];
const STREAM_CHAIN: &[Category] = &[Stream];

impl ErrorKind {
    /// Ancestor categories, nearest first.
    pub fn categories(self) -> &'static [Category] {
        match self {
            Self::ConnectTimeout | Self::ReadTimeout | Self::WriteTimeout | Self::PoolTimeout => {
                TIMEOUT_CHAIN
            }
            Self::ConnectError | Self::ReadError | Self::WriteError | Self::CloseError => {
                NETWORK_CHAIN
            }
            Self::LocalProtocolError | Self::RemoteProtocolError => PROTOCOL_CHAIN,
            Self::ProxyError | Self::UnsupportedProtocol => TRANSPORT_CHAIN,
            Self::DecodingError | Self::TooManyRedirects => REQUEST_CHAIN,
            Self::HttpStatusError => HTTP_CHAIN,
            Self::StreamConsumed
            | Self::StreamClosed
            | Self::ResponseNotRead
            | Self::RequestNotRead => STREAM_CHAIN,
            Self::InvalidUrl
            | Self::CookieConflict
            | Self::ConfigurationError
            | Self::InvalidArgument => &[],
        }
    }

    /// Nearest ancestor category, if any.
    pub fn category(self) -> Option<Category> {
        self.categories().first().copied()
    }

    pub fn is_timeout(self) -> bool {
        self.categories().contains(&Category::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// Leaf kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            Self::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Self::WriteTimeout(_) => ErrorKind::WriteTimeout,
            Self::PoolTimeout(_) => ErrorKind::PoolTimeout,
            Self::Connect(_) => ErrorKind::ConnectError,
            Self::Read(_) => ErrorKind::ReadError,
            Self::Write(_) => ErrorKind::WriteError,
            Self::Close(_) => ErrorKind::CloseError,
            Self::LocalProtocol(_) => ErrorKind::LocalProtocolError,
            Self::RemoteProtocol(_) => ErrorKind::RemoteProtocolError,
            Self::Proxy(_) => ErrorKind::ProxyError,
            Self::UnsupportedProtocol(_) => ErrorKind::UnsupportedProtocol,
            Self::Decoding(_) => ErrorKind::DecodingError,
            Self::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Self::HttpStatus { .. } => ErrorKind::HttpStatusError,
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::CookieConflict(_) => ErrorKind::CookieConflict,
            Self::StreamConsumed => ErrorKind::StreamConsumed,
            Self::StreamClosed => ErrorKind::StreamClosed,
            Self::ResponseNotRead => ErrorKind::ResponseNotRead,
            Self::RequestNotRead => ErrorKind::RequestNotRead,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Ancestor categories of this error, nearest first.
    pub fn categories(&self) -> &'static [Category] {
        self.kind().categories()
    }

    /// Check membership in a category anywhere up the chain.
    pub fn is(&self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind().is_timeout()
    }

    /// Whether a connection that produced this error must not be reused.
    pub(crate) fn poisons_connection(&self) -> bool {
        self.is(Category::Transport)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::Read(message.into())
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }

    pub fn local_protocol(message: impl Into<String>) -> Self {
        Self::LocalProtocol(message.into())
    }

    pub fn remote_protocol(message: impl Into<String>) -> Self {
        Self::RemoteProtocol(message.into())
    }

    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Map an I/O error hit while reading.
    pub(crate) fn from_read_io(e: &io::Error) -> Self {
        Self::Read(e.to_string())
    }

    /// Map an I/O error hit while writing.
    pub(crate) fn from_write_io(e: &io::Error) -> Self {
        Self::Write(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decoding(format!("JSON: {}", e))
    }
}
