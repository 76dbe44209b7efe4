//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable ({}) is not set", crate::host::SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("Cannot load the parmeter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// The file path is relative to the "params" directory under the software root.
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    // Get the params dir
    let mut path = crate::host::get_sw_root()
        .map_err(|_| LoadError::SwRootNotSet)?;
    path.push("params");
    path.push(param_file_path);

    load_from_path(path)
}

/// Load a parameter file from an explicit path.
pub fn load_from_path<P, F>(path: F) -> Result<P, LoadError>
where
    P: DeserializeOwned,
    F: AsRef<Path>
{
    // Load the file into a string
    let params_str = read_to_string(path).map_err(LoadError::FileLoadError)?;

    from_str(&params_str)
}

/// Parse parameters from a TOML string.
pub fn from_str<P>(params_str: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    toml::from_str(params_str).map_err(LoadError::DeserialiseError)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Dummy {
        freq_hz: u16,
        #[serde(default)]
        bench_mode: bool,
    }

    #[test]
    fn test_load_from_path() -> Result<(), LoadError> {
        let mut file = tempfile::NamedTempFile::new().map_err(LoadError::FileLoadError)?;
        writeln!(file, "freq_hz = 50").map_err(LoadError::FileLoadError)?;

        let dummy: Dummy = load_from_path(file.path())?;
        assert_eq!(dummy, Dummy { freq_hz: 50, bench_mode: false });

        Ok(())
    }

    #[test]
    fn test_bad_params() {
        assert!(matches!(
            from_str::<Dummy>("freq_hz = \"fast\""),
            Err(LoadError::DeserialiseError(_))
        ));
        assert!(matches!(
            load_from_path::<Dummy, _>("/definitely/not/here.toml"),
            Err(LoadError::FileLoadError(_))
        ));
    }
}
