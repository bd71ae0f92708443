//! Time-rotated JSON-lines session files.
//!
//! `RotWriter` owns the single open session file of the process. Records are
//! appended under a mutex; the same mutex guards the rotation check, so a record
//! is never split across two files and never lost between closing one file and
//! opening the next.
//!
//! A file is opened as soon as the writer is created, and `submit` re-opens one
//! on demand, so there is no window in which a record has nowhere to go. The
//! background task started by [`RotWriter::spawn_rotation`] only makes sure
//! files are switched on schedule even when no traffic arrives.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::data_capture::storage::Storage;
use crate::error_handling::types::StorageError;

use super::clock::{Clock, SystemClock};
use super::path_template::PathTemplate;
use super::rotation::RotationPolicy;

/// Polling period of the background rotation task.
pub const ROTATION_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct WriterState {
    file: Option<File>,
    path: Option<PathBuf>,
    /// Unix second at which the current file was opened.
    opened_at: i64,
    /// Sessions written to the current file.
    sessions: u64,
    closed: bool,
}

pub struct RotWriter {
    template: PathTemplate,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<WriterState>,
}

impl RotWriter {
    /// Creates the writer and opens its first file.
    ///
    /// Errors
    /// - [`StorageError::CreateDirFailed`] / [`StorageError::OpenFailed`] if the
    ///   first file cannot be created.
    pub fn new(template: PathTemplate, policy: RotationPolicy) -> Result<Self, StorageError> {
        Self::with_clock(template, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        template: PathTemplate,
        policy: RotationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let writer = Self {
            template,
            policy,
            clock,
            state: Mutex::new(WriterState::default()),
        };
        {
            let mut state = writer.lock();
            writer.rotate_locked(&mut state)?;
        }
        Ok(writer)
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    pub fn sessions_in_current_file(&self) -> u64 {
        self.lock().sessions
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Runs one rotation check: closes the file if a boundary was crossed and
    /// makes sure a file is open. No-op once the writer is closed.
    pub fn rotate(&self) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        self.rotate_locked(&mut state)
    }

    /// Closes the current file. Subsequent submissions fail with
    /// [`StorageError::Closed`] and the rotation task stops on its next tick.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let result = match state.file.as_mut() {
            Some(file) => file.flush().and_then(|_| file.sync_all()),
            None => Ok(()),
        };
        Self::close_file(&mut state);
        info!("Session writer closed");
        result.map_err(StorageError::WriteFailed)
    }

    /// Background rotation clock.
    ///
    /// Ends with `Ok(())` when the writer is closed or `shutdown` is cancelled,
    /// and with the error when a new file cannot be opened. Callers must treat
    /// that error as fatal.
    pub async fn run_rotation(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), StorageError> {
        let mut ticker = tokio::time::interval(ROTATION_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_closed() {
                        break;
                    }
                    if let Err(e) = self.rotate() {
                        error!("Session file rotation failed: {}", e);
                        return Err(e);
                    }
                }
            }
        }
        debug!("Rotation task stopped");
        Ok(())
    }

    /// Spawns [`run_rotation`](Self::run_rotation) on the current runtime.
    pub fn spawn_rotation(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> JoinHandle<Result<(), StorageError>> {
        tokio::spawn(Arc::clone(self).run_rotation(shutdown))
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rotate_locked(&self, state: &mut WriterState) -> Result<(), StorageError> {
        let now = self.clock.now();
        let secs = now.timestamp();

        if state.file.is_some() && self.policy.is_due(state.opened_at, secs) {
            debug!("Rotation boundary reached at {}", now.to_rfc3339());
            Self::close_file(state);
        }

        if state.file.is_none() {
            let path = self.template.find_free_path(now)?;
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                if !dir.exists() {
                    fs::create_dir_all(dir).map_err(|e| {
                        StorageError::CreateDirFailed(dir.display().to_string(), e)
                    })?;
                    info!("Create directories: {}", dir.display());
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StorageError::OpenFailed(path.display().to_string(), e))?;
            info!("Created a session file: {}", path.display());

            state.file = Some(file);
            state.path = Some(path);
            state.opened_at = secs;
            state.sessions = 0;
        }
        Ok(())
    }

    fn close_file(state: &mut WriterState) {
        if let Some(file) = state.file.take() {
            drop(file);
            let path = state.path.take().unwrap_or_default();
            info!(
                "Wrote {} session data to {}",
                state.sessions,
                path.display()
            );
        }
    }
}

impl Storage for RotWriter {
    fn submit(&self, record: &[u8]) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StorageError::Closed);
        }
        self.rotate_locked(&mut state)?;

        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(b'\n');

        let Some(file) = state.file.as_mut() else {
            return Err(StorageError::Closed);
        };
        file.write_all(&line).map_err(StorageError::WriteFailed)?;
        state.sessions += 1;
        Ok(())
    }
}
