//! Ownership of the single live result cursor of a row set.
//!
//! Access goes through a [`Lease`]; the cursor is reopened on demand when it
//! was refreshed, timed out or closed. An idle reaper thread releases the
//! cursor and its connection once no lease has been taken for a while.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionProvider, DbError, Interrupt, ResultCursor};
use crate::error::{Result, RowSetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderStatus {
    NeverStarted,
    Open,
    Closed,
}

struct HolderInner {
    status: HolderStatus,
    conn: Option<Box<dyn Connection>>,
    cursor: ResultCursor,
    cursor_valid: bool,
    use_count: usize,
    idle_timeout: Option<Duration>,
    deadline: Option<Instant>,
    reaper_running: bool,
    shutdown: bool,
}

struct HolderShared {
    provider: Arc<dyn ConnectionProvider>,
    inner: Mutex<HolderInner>,
    wake: Condvar,
    // Kept apart from `inner` so a query running under a lease can be interrupted.
    interrupter: Mutex<Option<Arc<dyn Interrupt>>>,
}

pub struct ResultSetHolder {
    shared: Arc<HolderShared>,
}

impl ResultSetHolder {
    pub fn new(provider: Arc<dyn ConnectionProvider>, idle_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(HolderShared {
                provider,
                inner: Mutex::new(HolderInner {
                    status: HolderStatus::NeverStarted,
                    conn: None,
                    cursor: ResultCursor::default(),
                    cursor_valid: false,
                    use_count: 0,
                    idle_timeout,
                    deadline: None,
                    reaper_running: false,
                    shutdown: false,
                }),
                wake: Condvar::new(),
                interrupter: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> HolderStatus {
        self.shared.inner.lock().status
    }

    /// Checks out the live cursor, calling `open` first when there is none.
    ///
    /// `open` receives the holder's connection and must return the cursor for
    /// the batch the caller is interested in. A closed connection is replaced
    /// and `open` retried once.
    pub fn lease<F>(&self, open: F) -> Result<Lease<'_>>
    where
        F: FnMut(&mut dyn Connection) -> Result<ResultCursor>,
    {
        let mut inner = self.shared.inner.lock();
        inner.deadline = None;
        if !inner.cursor_valid {
            let cursor = self.open_cursor(&mut inner, open)?;
            debug!(rows = cursor.len(), "live cursor opened");
            inner.cursor = cursor;
            inner.cursor_valid = true;
            inner.status = HolderStatus::Open;
        }
        inner.use_count += 1;
        debug_assert_eq!(inner.use_count, 1, "only one lease may be active");
        trace!("lease acquired");
        Ok(Lease {
            guard: inner,
            shared: &self.shared,
        })
    }

    fn open_cursor<F>(&self, inner: &mut HolderInner, mut open: F) -> Result<ResultCursor>
    where
        F: FnMut(&mut dyn Connection) -> Result<ResultCursor>,
    {
        let mut conn = self.checkout_connection(inner)?;
        match open(conn.as_mut()) {
            Ok(cursor) => {
                inner.conn = Some(conn);
                Ok(cursor)
            }
            Err(RowSetError::Database(DbError::Closed)) => {
                warn!("live cursor connection was closed, reconnecting");
                self.shared.provider.release_connection(conn);
                let mut conn = self.checkout_connection(inner)?;
                let cursor = open(conn.as_mut());
                inner.conn = Some(conn);
                cursor
            }
            Err(err) => {
                inner.conn = Some(conn);
                Err(err)
            }
        }
    }

    fn checkout_connection(&self, inner: &mut HolderInner) -> Result<Box<dyn Connection>> {
        let conn = match inner.conn.take() {
            Some(conn) if !conn.is_closed() => conn,
            stale => {
                if let Some(conn) = stale {
                    self.shared.provider.release_connection(conn);
                }
                self.shared.provider.acquire_connection()?
            }
        };
        *self.shared.interrupter.lock() = conn.interrupter();
        Ok(conn)
    }

    /// Drops the current cursor so the next lease reopens it for a new batch.
    /// The connection is kept.
    pub fn refresh(&self) {
        let mut inner = self.shared.inner.lock();
        inner.cursor_valid = false;
        inner.cursor = ResultCursor::default();
        if inner.status == HolderStatus::Open {
            inner.status = HolderStatus::Closed;
        }
    }

    /// Releases the cursor and its connection now.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        inner.deadline = None;
        close_locked(&self.shared, &mut inner);
    }

    /// Releases the cursor after `delay` unless a lease is taken meanwhile.
    pub fn delayed_close(&self, delay: Duration) {
        if delay.is_zero() {
            self.close();
            return;
        }
        let mut inner = self.shared.inner.lock();
        inner.deadline = Some(Instant::now() + delay);
        ensure_reaper(&self.shared, &mut inner);
        self.shared.wake.notify_all();
    }

    /// Interrupts the query currently running on the holder's connection.
    pub fn cancel(&self) {
        if let Some(interrupter) = self.shared.interrupter.lock().as_ref() {
            debug!("interrupting live cursor query");
            interrupter.interrupt();
        }
    }

    /// Interrupt hook usable from another thread while a lease is open.
    pub fn canceller(&self) -> impl Fn() + Send + Sync + 'static {
        let shared = Arc::clone(&self.shared);
        move || {
            if let Some(interrupter) = shared.interrupter.lock().as_ref() {
                interrupter.interrupt();
            }
        }
    }
}

impl Drop for ResultSetHolder {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.shutdown = true;
        close_locked(&self.shared, &mut inner);
        self.shared.wake.notify_all();
    }
}

fn close_locked(shared: &HolderShared, inner: &mut HolderInner) {
    inner.cursor_valid = false;
    inner.cursor = ResultCursor::default();
    if let Some(conn) = inner.conn.take() {
        shared.provider.release_connection(conn);
    }
    *shared.interrupter.lock() = None;
    if inner.status != HolderStatus::NeverStarted {
        if inner.status == HolderStatus::Open {
            debug!("live cursor closed");
        }
        inner.status = HolderStatus::Closed;
    }
}

fn ensure_reaper(shared: &Arc<HolderShared>, inner: &mut HolderInner) {
    if inner.reaper_running || inner.shutdown {
        return;
    }
    let reaper_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("rowset-cursor-reaper".to_string())
        .spawn(move || reap(reaper_shared));
    match spawned {
        Ok(_) => inner.reaper_running = true,
        Err(err) => warn!(error = %err, "cannot start idle cursor reaper"),
    }
}

fn reap(shared: Arc<HolderShared>) {
    let mut inner = shared.inner.lock();
    while !inner.shutdown {
        match inner.deadline {
            None => shared.wake.wait(&mut inner),
            Some(deadline) if Instant::now() >= deadline => {
                inner.deadline = None;
                if inner.use_count == 0 {
                    close_locked(&shared, &mut inner);
                }
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut inner, deadline);
            }
        }
    }
    inner.reaper_running = false;
}

/// Scoped access to the live cursor. Only one lease exists at a time; the
/// idle timer restarts when it is dropped.
pub struct Lease<'a> {
    guard: MutexGuard<'a, HolderInner>,
    shared: &'a Arc<HolderShared>,
}

impl Deref for Lease<'_> {
    type Target = ResultCursor;

    fn deref(&self) -> &ResultCursor {
        &self.guard.cursor
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut ResultCursor {
        &mut self.guard.cursor
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.guard.use_count -= 1;
        trace!("lease released");
        if self.guard.use_count == 0 {
            if let Some(timeout) = self.guard.idle_timeout {
                self.guard.deadline = Some(Instant::now() + timeout);
                ensure_reaper(self.shared, &mut self.guard);
                self.shared.wake.notify_all();
            }
        }
    }
}
