//! Remote service proxies built from the broker's handshake catalog

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::ClientCore;
use crate::pending::PendingReply;
use crate::protocol::CatalogEntry;
use crate::{Error, Result};

/// One remote method as announced by the broker.
///
/// An explicit tagged wrapper rather than a bare callable: the proxy's method
/// table is exactly the set of these, so enumeration never has to distinguish
/// remote-backed entries from anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMethod {
    name: String,
    doc: String,
}

impl RemoteMethod {
    /// The method name as announced by the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The docstring announced alongside the method.
    pub fn doc(&self) -> &str {
        &self.doc
    }
}

/// Local proxy for one broker-announced service.
///
/// The method table is fixed at construction and exactly mirrors the catalog
/// entry the proxy was built from; only a reconnect and re-handshake replaces
/// it. The proxy holds a shared handle to the owning client's core purely to
/// reach its send path.
pub struct RemoteService {
    name: String,
    address: Vec<u8>,
    methods: Vec<RemoteMethod>,
    core: Arc<ClientCore>,
}

impl RemoteService {
    pub(crate) fn from_catalog(entry: CatalogEntry, core: Arc<ClientCore>) -> Self {
        let methods = entry
            .methods
            .into_iter()
            .map(|(name, doc)| RemoteMethod { name, doc })
            .collect();
        Self {
            name: entry.name,
            address: entry.address,
            methods,
            core,
        }
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker's opaque routing token for this service.
    pub fn address(&self) -> &[u8] {
        &self.address
    }

    /// All methods this service announced, in catalog order.
    pub fn methods(&self) -> impl Iterator<Item = &RemoteMethod> {
        self.methods.iter()
    }

    /// Look up one announced method by name.
    pub fn method(&self, name: &str) -> Option<&RemoteMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Call a remote method and wait inline for its reply.
    ///
    /// Refused with [`Error::LoopRunning`] while the receive loop is active,
    /// since the loop owns socket receive; use [`call_async`] then. There is
    /// no timeout on the reply wait: a non-responding broker stalls the
    /// caller until the transport fails (wrap in `tokio::time::timeout` if
    /// that matters).
    ///
    /// [`call_async`]: RemoteService::call_async
    pub async fn call<T, R>(&self, method: &str, args: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.require_method(method)?;
        // Serialization happens before any I/O so failures surface here.
        let args = bincode::serialize(args)?;
        let payload = self.core.dispatch_sync(&self.name, method, args).await?;
        Ok(bincode::deserialize(&payload)?)
    }

    /// Dispatch a remote method call and return a future for its reply.
    ///
    /// Requires the receive loop to be running (the loop is what resolves
    /// the returned [`PendingReply`]); refused with
    /// [`Error::LoopNotRunning`] otherwise. A failed call surfaces only when
    /// the returned future is awaited.
    pub async fn call_async<T, R>(&self, method: &str, args: &T) -> Result<PendingReply<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.require_method(method)?;
        let args = bincode::serialize(args)?;
        let rx = self.core.dispatch_async(&self.name, method, args).await?;
        Ok(PendingReply::new(rx))
    }

    /// Fire-and-forget dispatch: send the framed request and return without
    /// waiting for any reply.
    ///
    /// Works in both loop states. If the broker does reply, the reply has no
    /// matching in-flight call and is dropped by the correlation-miss policy.
    pub async fn notify<T>(&self, method: &str, args: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.require_method(method)?;
        let args = bincode::serialize(args)?;
        self.core.dispatch_notify(&self.name, method, args).await
    }

    fn require_method(&self, method: &str) -> Result<()> {
        if self.method(method).is_none() {
            return Err(Error::method_not_found(&self.name, method));
        }
        Ok(())
    }
}

impl fmt::Display for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, method) in self.methods.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", method.name)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteService")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
