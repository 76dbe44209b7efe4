//! # Demand script interpreter module
//!
//! This module provides an interpreter for timed demand scripts, allowing actuator demands to be
//! replayed on the bench without a command surface. A script is a sequence of entries of the form
//!
//! ```text
//! <exec_time_s>: <json demand>;
//! ```
//!
//! where the JSON payload is deserialised into the caller's demand type.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::fs;
use regex::RegexBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A demand which is scripted to occur at a specific time.
struct Command<D> {
    /// The time the demand is supposed to execute at
    exec_time_s: f64,

    /// The demand to run
    dem: D
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use `.get_pending` to acquire a list of
/// demands that need executing.
pub struct ScriptInterpreter<D> {
    script_path: PathBuf,
    cmds: VecDeque<Command<D>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid demand at {0} s: {1}")]
    InvalidDemand(f64, serde_json::Error),

    #[error("Script entries must be in time order, found {0} s after {1} s")]
    OutOfOrder(f64, f64)
}

pub enum Pending<D> {
    None,
    Some(Vec<D>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<D> ScriptInterpreter<D>
where
    D: DeserializeOwned
{
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {

        let path = PathBuf::from(script_path.as_ref());

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path.display().to_string()));
        }

        let script = fs::read_to_string(&path).map_err(ScriptError::ScriptLoadError)?;

        let mut interp = Self::parse(&script)?;
        interp.script_path = path;

        Ok(interp)
    }

    /// Parse a script held in memory.
    pub fn parse(script: &str) -> Result<Self, ScriptError> {
        let mut cmds: VecDeque<Command<D>> = VecDeque::new();

        // Go through the script executing __the magic regex__.
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .map_err(|e| ScriptError::InvalidTimestamp(e.to_string()))?;

        for cap in re.captures_iter(script) {
            let time_str = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{} ({})", time_str, e)))?;

            if let Some(prev) = cmds.back() {
                if exec_time_s < prev.exec_time_s {
                    return Err(ScriptError::OutOfOrder(exec_time_s, prev.exec_time_s));
                }
            }

            let payload = cap.get(3).map(|m| m.as_str()).unwrap_or("");
            let dem = serde_json::from_str(payload)
                .map_err(|e| ScriptError::InvalidDemand(exec_time_s, e))?;

            cmds.push_back(Command { exec_time_s, dem });
        }

        if cmds.is_empty() {
            return Err(ScriptError::ScriptEmpty)
        }

        Ok(ScriptInterpreter {
            script_path: PathBuf::new(),
            cmds
        })
    }
}

impl<D> ScriptInterpreter<D> {
    /// Return the demands which are due at `current_time_s`.
    ///
    /// Demands are popped from the front of the queue while their exec time is not later than the
    /// given time.
    pub fn get_pending(&mut self, current_time_s: f64) -> Pending<D> {

        if self.cmds.is_empty() {
            return Pending::EndOfScript
        }

        let mut dems: Vec<D> = vec![];

        while let Some(front) = self.cmds.front() {
            if front.exec_time_s > current_time_s {
                break;
            }
            if let Some(cmd) = self.cmds.pop_front() {
                dems.push(cmd.dem);
            }
        }

        if dems.is_empty() {
            Pending::None
        }
        else {
            Pending::Some(dems)
        }
    }

    /// Path the script was loaded from (empty for in-memory scripts)
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Get the number of demands left in the script
    pub fn get_num_dems(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(tag = "type")]
    enum Dem {
        Home,
        Drive { speed: f64 },
    }

    const SCRIPT: &str = r#"
        0.0: {"type": "Home"};
        1.5: {"type": "Drive", "speed": 40.0};
        1.5: {"type": "Drive", "speed": 0.0};
    "#;

    #[test]
    fn test_pending() -> Result<(), ScriptError> {
        let mut interp: ScriptInterpreter<Dem> = ScriptInterpreter::parse(SCRIPT)?;

        assert_eq!(interp.get_num_dems(), 3);
        assert_eq!(interp.get_duration(), 1.5);

        match interp.get_pending(0.5) {
            Pending::Some(d) => assert_eq!(d, vec![Dem::Home]),
            _ => panic!("expected the home demand"),
        }
        assert!(matches!(interp.get_pending(1.0), Pending::None));
        match interp.get_pending(2.0) {
            Pending::Some(d) => assert_eq!(
                d,
                vec![Dem::Drive { speed: 40.0 }, Dem::Drive { speed: 0.0 }]
            ),
            _ => panic!("expected both drive demands"),
        }
        assert!(matches!(interp.get_pending(3.0), Pending::EndOfScript));

        Ok(())
    }

    #[test]
    fn test_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{}", SCRIPT)?;

        let interp: ScriptInterpreter<Dem> = ScriptInterpreter::new(file.path())?;
        assert_eq!(interp.get_num_dems(), 3);
        assert_eq!(interp.script_path(), file.path());

        Ok(())
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(
            ScriptInterpreter::<Dem>::parse("nothing to see here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::<Dem>::parse("0.0: {\"type\": \"Fly\"};"),
            Err(ScriptError::InvalidDemand(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::<Dem>::parse(
                "2.0: {\"type\": \"Home\"};\n1.0: {\"type\": \"Home\"};"
            ),
            Err(ScriptError::OutOfOrder(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::<Dem>::new("/definitely/not/a/script.txt"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }
}
