//! Fixed-size connection pool.
//!
//! Each in-flight request borrows its own connection so readers proceed in
//! parallel under WAL. Writers still serialize on SQLite's write lock, which
//! [`crate::immediate`] takes at the start of every mutating unit.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use rusqlite::Connection;

use crate::{DbError, Result};

/// A pool of open connections to one database.
pub struct Pool {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    size: usize,
}

/// A connection checked out of a [`Pool`]; returned on drop.
pub struct PooledConnection {
    pool: Arc<Pool>,
    conn: Option<Connection>,
}

impl Pool {
    /// Open `size` connections to the database at `path`.
    ///
    /// The first connection runs migrations; the rest only configure pragmas.
    pub fn open(path: &Path, size: usize) -> Result<Arc<Self>> {
        let size = size.max(1);
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            conns.push(crate::open(path)?);
        }
        tracing::debug!(size, path = %path.display(), "connection pool opened");
        Ok(Arc::new(Self {
            idle: Mutex::new(conns),
            available: Condvar::new(),
            size,
        }))
    }

    /// Single-connection pool over an in-memory database (for testing).
    pub fn open_memory() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            idle: Mutex::new(vec![crate::open_memory()?]),
            available: Condvar::new(),
            size: 1,
        }))
    }

    /// Number of connections owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrow a connection, blocking until one is idle.
    pub fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        let mut idle = self
            .idle
            .lock()
            .map_err(|_| DbError::Busy("connection pool poisoned".into()))?;
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(conn),
                });
            }
            idle = self
                .available
                .wait(idle)
                .map_err(|_| DbError::Busy("connection pool poisoned".into()))?;
        }
    }

    fn put_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
            self.available.notify_one();
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // `conn` is only taken in `drop`.
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
