//! # Session
//!
//! Every run of an executable is a session. A session owns a directory named after the executable
//! and the wall-clock time it started at, which holds the run's log file. The start time is also
//! the epoch log lines and telemetry are stamped against.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal imports
use crate::{host, time};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// chrono `strftime` format of the start time in session directory names.
const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Session {
    /// Directory holding everything this run produces
    pub session_root: PathBuf,

    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{} is not set, cannot locate the sessions directory", host::SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("Could not create the session directory: {0}")]
    CannotCreateDir(std::io::Error),

    #[error("A session was already started in this process ({0})")]
    CannotInitEpoch(conquer_once::TryInitError),

    #[error("The session epoch is not available")]
    CannotGetEpoch,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the process's session in `$MECH_SW_ROOT/{sessions_dir}/{exec_name}_{timestamp}`.
    ///
    /// Only one session may be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let root = host::get_sw_root().map_err(|_| SessionError::SwRootNotSet)?;

        Self::new_in(exec_name, root.join(sessions_dir))
    }

    /// Same as [`Session::new`] but under an explicit sessions directory.
    pub fn new_in<P: AsRef<Path>>(exec_name: &str, sessions_dir: P) -> Result<Self, SessionError> {
        SESSION_EPOCH
            .try_init_once(Utc::now)
            .map_err(SessionError::CannotInitEpoch)?;
        let epoch = SESSION_EPOCH.get().ok_or(SessionError::CannotGetEpoch)?;

        let session_root = sessions_dir.as_ref().join(dir_name(exec_name, epoch));
        fs::create_dir_all(&session_root).map_err(SessionError::CannotCreateDir)?;

        let log_file_path = session_root.join(format!("{}.log", exec_name));

        Ok(Session {
            session_root,
            log_file_path,
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds elapsed since the session started, `0.0` before any session exists.
pub fn get_elapsed_seconds() -> f64 {
    match SESSION_EPOCH.get() {
        Some(e) => time::duration_to_seconds(Utc::now() - *e).unwrap_or(std::f64::NAN),
        None => 0.0,
    }
}

/// Wall-clock start time of the session, if one was started.
pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    SESSION_EPOCH.get()
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn dir_name(exec_name: &str, epoch: &DateTime<Utc>) -> String {
    format!("{}_{}", exec_name, epoch.format(DIR_TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dir_name() {
        let epoch = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(dir_name("mech_exec", &epoch), "mech_exec_20210304_050607");
    }

    #[test]
    fn test_session() {
        let dir = tempfile::tempdir().unwrap();

        let session = Session::new_in("mech_exec", dir.path()).unwrap();
        assert!(session.session_root.is_dir());
        assert!(session.session_root.starts_with(dir.path()));
        assert_eq!(session.log_file_path.parent(), Some(session.session_root.as_path()));
        assert!(session.log_file_path.ends_with("mech_exec.log"));

        assert!(get_epoch().is_some());
        assert!(get_elapsed_seconds() >= 0.0);

        // A process only ever has one session
        assert!(matches!(
            Session::new_in("mech_exec", dir.path()),
            Err(SessionError::CannotInitEpoch(_))
        ));
    }
}
