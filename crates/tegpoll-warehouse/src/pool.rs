//! Shared `DuckDB` instance with recycled connections.
//!
//! The database file is opened once; every further connection is a clone of
//! that instance, so a batch committed by one connection is visible to all.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct Shared {
    db_path: PathBuf,
    capacity: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Open `db_path` and keep at most `capacity` idle connections around.
    pub fn open(db_path: impl Into<PathBuf>, capacity: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = db_path.into();
        let root = Connection::open(&db_path)?;
        root.execute_batch("PRAGMA disable_progress_bar;")?;

        Ok(Self {
            shared: Arc::new(Shared {
                db_path,
                capacity: capacity.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn acquire(&self) -> Result<Lease, ::duckdb::Error> {
        let recycled = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle pool poisoned")
            .pop();

        let connection = match recycled {
            Some(connection) => connection,
            None => self
                .shared
                .root
                .lock()
                .expect("duckdb root connection poisoned")
                .try_clone()?,
        };

        Ok(Lease {
            shared: Arc::clone(&self.shared),
            connection: Some(connection),
        })
    }

    pub fn db_path(&self) -> &Path {
        self.shared.db_path.as_path()
    }

    pub fn idle_count(&self) -> usize {
        self.shared
            .idle
            .lock()
            .expect("duckdb idle pool poisoned")
            .len()
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct Lease {
    shared: Arc<Shared>,
    connection: Option<Connection>,
}

impl Deref for Lease {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("leased connection already returned")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let mut idle = self.shared.idle.lock().expect("duckdb idle pool poisoned");
        if idle.len() < self.shared.capacity {
            idle.push(connection);
        }
    }
}
