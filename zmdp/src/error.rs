//! Error types for the zmdp client

use thiserror::Error;

/// Main error type for broker client operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection establishment errors
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport layer errors (socket send/recv)
    #[error("Transport layer error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Broker rejected the ready announcement
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    /// Broker-reported failure of a remote call
    #[error("Remote call failed on service '{service}': {message}")]
    Remote { service: String, message: String },

    /// Serialization and deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed or unexpected wire frames
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        expected: Option<String>,
        received: Option<String>,
    },

    /// Service lookup errors
    #[error("Service '{name}' not found")]
    ServiceNotFound { name: String },

    /// Method lookup errors
    #[error("Method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },

    /// An in-flight call was evicted by message-id wraparound
    #[error("Call superseded: message id {id} reused for service '{service}'")]
    Superseded { id: u8, service: String },

    /// The client was stopped or reconnected while the call was in flight
    #[error("Client shut down with call still pending")]
    Shutdown,

    /// Synchronous calls are refused while the receive loop owns the socket
    #[error("Receive loop is running; use call_async")]
    LoopRunning,

    /// Asynchronous calls require the receive loop to resolve them
    #[error("Receive loop is not running; use call or start the loop")]
    LoopNotRunning,

    /// Internal channel closed unexpectedly
    #[error("Internal channel closed: {context}")]
    ChannelClosed { context: String },
}

impl Error {
    /// Create a connection error with source
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without source
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error without source
    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handshake failure carrying the broker-supplied text
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a remote call failure carrying the broker-supplied text
    pub fn remote(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error with source
    pub fn serialization<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(
        message: impl Into<String>,
        expected: Option<String>,
        received: Option<String>,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            expected,
            received,
        }
    }

    /// Create a service not found error
    pub fn service_not_found(name: impl Into<String>) -> Self {
        Self::ServiceNotFound { name: name.into() }
    }

    /// Create a method not found error
    pub fn method_not_found(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::Transport { .. } => true,
            Error::Shutdown => true,
            Error::Superseded { .. } => true,
            Error::ChannelClosed { .. } => true,
            Error::Handshake { .. } => false,
            Error::Remote { .. } => false,
            Error::Serialization { .. } => false,
            Error::Protocol { .. } => false,
            Error::ServiceNotFound { .. } => false,
            Error::MethodNotFound { .. } => false,
            Error::LoopRunning => false,
            Error::LoopNotRunning => false,
        }
    }

    /// Get error category for debugging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection",
            Error::Transport { .. } => "transport",
            Error::Handshake { .. } => "handshake",
            Error::Remote { .. } => "remote",
            Error::Serialization { .. } => "serialization",
            Error::Protocol { .. } => "protocol",
            Error::ServiceNotFound { .. } => "service_discovery",
            Error::MethodNotFound { .. } => "method_resolution",
            Error::Superseded { .. } => "correlation",
            Error::Shutdown => "lifecycle",
            Error::LoopRunning | Error::LoopNotRunning => "mode",
            Error::ChannelClosed { .. } => "runtime",
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::serialization("Bincode serialization failed", err)
    }
}

impl From<zeromq::ZmqError> for Error {
    fn from(err: zeromq::ZmqError) -> Self {
        Error::transport("ZeroMQ socket error", err)
    }
}

/// Result type for broker client operations
pub type Result<T> = std::result::Result<T, Error>;
