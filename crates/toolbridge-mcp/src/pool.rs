//! Registry of live connections, at most one per server name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use toolbridge_core::BridgeError;

use crate::connection::Connection;
use crate::lock::lock;

/// Live connections by server name.
///
/// Map access takes a short `std::sync::Mutex`; nothing here awaits while
/// holding it. Callers that may create a connection first take the
/// per-name [`startup_lock`](Self::startup_lock), re-check
/// [`acquire`](Self::acquire), and only then start a server, so concurrent
/// first use produces exactly one start.
#[derive(Debug)]
pub struct ConnectionPool {
    max_connections: usize,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    startup_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connections: Mutex::new(HashMap::new()),
            startup_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The live connection for `name`. A closed connection is evicted and
    /// `None` returned.
    pub fn acquire(&self, name: &str) -> Option<Arc<Connection>> {
        let mut connections = lock(&self.connections);
        match connections.get(name) {
            Some(conn) if conn.is_closed() => {
                tracing::debug!(server_name = %name, "Evicting closed connection");
                connections.remove(name);
                None
            }
            Some(conn) => Some(Arc::clone(conn)),
            None => None,
        }
    }

    /// The pooled entry for `name`, closed or not.
    pub fn peek(&self, name: &str) -> Option<Arc<Connection>> {
        lock(&self.connections).get(name).cloned()
    }

    /// Per-name async mutex serializing connection startup.
    pub fn startup_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.startup_locks)
                .entry(name.to_string())
                .or_default(),
        )
    }

    /// Register a new connection.
    ///
    /// # Errors
    ///
    /// `Connection` when a live connection for the same server already
    /// exists or the pool is at `max_connections`.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<(), BridgeError> {
        let mut connections = lock(&self.connections);
        connections.retain(|_, conn| !conn.is_closed());

        let name = connection.server().to_string();
        if connections.contains_key(&name) {
            return Err(BridgeError::connection(format!(
                "server '{name}' is already connected"
            )));
        }
        if connections.len() >= self.max_connections {
            return Err(BridgeError::connection(format!(
                "connection limit of {} reached",
                self.max_connections
            )));
        }

        connections.insert(name, connection);
        Ok(())
    }

    /// Remove `connection` if it is still the pooled entry for its server.
    ///
    /// Returns `false` when a different connection has replaced it.
    pub fn release(&self, connection: &Arc<Connection>) -> bool {
        let mut connections = lock(&self.connections);
        let name = connection.server();
        if connections
            .get(name)
            .is_some_and(|pooled| Arc::ptr_eq(pooled, connection))
        {
            connections.remove(name);
            true
        } else {
            false
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        lock(&self.connections).remove(name)
    }

    /// Take every connection out of the pool.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).drain().map(|(_, conn)| conn).collect()
    }

    /// Names of pooled servers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.connections).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_acquire() {
        let pool = ConnectionPool::new(4);
        pool.insert(Connection::detached("fs")).unwrap();

        assert!(pool.acquire("fs").is_some());
        assert!(pool.acquire("git").is_none());
        assert_eq!(pool.names(), vec!["fs"]);
    }

    #[test]
    fn test_one_connection_per_name() {
        let pool = ConnectionPool::new(4);
        pool.insert(Connection::detached("fs")).unwrap();
        let err = pool.insert(Connection::detached("fs")).unwrap_err();
        assert!(matches!(err, BridgeError::Connection(_)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_closed_connection_is_evicted() {
        let pool = ConnectionPool::new(4);
        let conn = Connection::detached("fs");
        pool.insert(Arc::clone(&conn)).unwrap();

        conn.close_for_test();

        assert!(pool.acquire("fs").is_none());
        assert!(pool.is_empty());
        // A replacement can now be registered.
        pool.insert(Connection::detached("fs")).unwrap();
    }

    #[test]
    fn test_max_connections() {
        let pool = ConnectionPool::new(2);
        pool.insert(Connection::detached("a")).unwrap();
        pool.insert(Connection::detached("b")).unwrap();
        assert!(pool.insert(Connection::detached("c")).is_err());

        // Closed entries do not count against the limit.
        pool.acquire("a").unwrap().close_for_test();
        pool.insert(Connection::detached("c")).unwrap();
    }

    #[test]
    fn test_release_only_removes_same_connection() {
        let pool = ConnectionPool::new(4);
        let old = Connection::detached("fs");
        pool.insert(Arc::clone(&old)).unwrap();
        pool.remove("fs");
        let new = Connection::detached("fs");
        pool.insert(Arc::clone(&new)).unwrap();

        assert!(!pool.release(&old));
        assert_eq!(pool.len(), 1);
        assert!(pool.release(&new));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_drain_empties_pool() {
        let pool = ConnectionPool::new(4);
        pool.insert(Connection::detached("a")).unwrap();
        pool.insert(Connection::detached("b")).unwrap();
        assert_eq!(pool.drain().len(), 2);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_startup_lock_is_shared_per_name() {
        let pool = ConnectionPool::new(4);
        let a = pool.startup_lock("fs");
        let b = pool.startup_lock("fs");
        let other = pool.startup_lock("git");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(other.try_lock().is_ok());
    }
}
