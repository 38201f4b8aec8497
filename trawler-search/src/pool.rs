//! Multi-host connection pooling.

use crate::error::{Result, SearchError};
use opensearch::http::{
    transport::{Connection, ConnectionPool},
    Url,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out connections to every configured host in turn.
///
/// Each request takes the next host, so a host that stops answering fails
/// only the calls routed to it and the following call moves on. Clones share
/// the rotation.
#[derive(Debug, Clone)]
pub struct RoundRobinConnectionPool {
    connections: Vec<Connection>,
    next: Arc<AtomicUsize>,
}

impl RoundRobinConnectionPool {
    /// Pool over `urls`, starting with the first.
    pub fn new(urls: Vec<Url>) -> Result<Self> {
        if urls.is_empty() {
            return Err(SearchError::InvalidConfig(
                "connection pool needs at least one host".to_string(),
            ));
        }

        Ok(Self {
            connections: urls.into_iter().map(Connection::new).collect(),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of hosts in the rotation.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false; an empty pool cannot be built.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl ConnectionPool for RoundRobinConnectionPool {
    fn next(&self) -> Connection {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.connections[index % self.connections.len()].clone()
    }
}
