use std::fmt::{self, Debug, Display};
use std::io;

/// Provides `ContagionError` and maps to other errors to
/// convert to a `ContagionError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum ContagionError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    /// A configuration value is out of range or inconsistent. Raised at setup and fatal to the run.
    InvalidConfiguration(String),
    /// A spatial query was asked in a mode the population does not support.
    InvalidQuery(String),
    /// The age-risk curve cannot be fitted with the configured chances and ages.
    InvalidMortalityCurve(String),
    ReportError(String),
    ContagionError(String),
}

impl From<io::Error> for ContagionError {
    fn from(error: io::Error) -> Self {
        ContagionError::IoError(error)
    }
}

impl From<serde_json::Error> for ContagionError {
    fn from(error: serde_json::Error) -> Self {
        ContagionError::JsonError(error)
    }
}

impl From<csv::Error> for ContagionError {
    fn from(error: csv::Error) -> Self {
        ContagionError::CsvError(error)
    }
}

impl From<String> for ContagionError {
    fn from(error: String) -> Self {
        ContagionError::ContagionError(error)
    }
}

impl From<&str> for ContagionError {
    fn from(error: &str) -> Self {
        ContagionError::ContagionError(error.to_string())
    }
}

impl std::error::Error for ContagionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContagionError::IoError(error) => Some(error),
            ContagionError::JsonError(error) => Some(error),
            ContagionError::CsvError(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for ContagionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContagionError::InvalidConfiguration(msg) => {
                write!(f, "Error: invalid configuration: {msg}")
            }
            ContagionError::InvalidQuery(msg) => write!(f, "Error: invalid query: {msg}"),
            ContagionError::InvalidMortalityCurve(msg) => {
                write!(f, "Error: invalid mortality curve: {msg}")
            }
            _ => write!(f, "Error: {self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversions() {
        let error: ContagionError = "something broke".into();
        assert!(matches!(error, ContagionError::ContagionError(ref msg) if msg == "something broke"));

        let error: ContagionError = String::from("again").into();
        assert!(matches!(error, ContagionError::ContagionError(_)));
    }

    #[test]
    fn display_names_the_failure() {
        let error = ContagionError::InvalidConfiguration("pop_size must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "Error: invalid configuration: pop_size must be positive"
        );
    }

    #[test]
    fn io_error_has_source() {
        use std::error::Error;
        let error: ContagionError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(error.source().is_some());
    }
}
