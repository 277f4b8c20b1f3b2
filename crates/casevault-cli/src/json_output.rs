//! JSON output for the CaseVault CLI
//!
//! With `--json` every command prints exactly one [`ServiceResponse`] document.

use casevault_engine::ServiceResponse;
use casevault_types::Result as CoreResult;
use serde::Serialize;

/// How command results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Styled text for a terminal
    Human,
    /// One JSON document per command
    Json,
}

impl OutputMode {
    /// Pick the mode from the `--json` flag
    pub fn from_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Human
        }
    }

    /// Whether human output is requested
    pub fn is_human(self) -> bool {
        self == Self::Human
    }

    /// Emit a result; returns whether it was a success
    ///
    /// Human mode runs `show` on success and turns a failure into an error.
    pub fn emit<T, F>(self, result: CoreResult<T>, message: &str, show: F) -> anyhow::Result<bool>
    where
        T: Serialize,
        F: FnOnce(&T),
    {
        match self {
            Self::Human => {
                let data = result?;
                show(&data);
                Ok(true)
            }
            Self::Json => {
                let response = ServiceResponse::from_result(result, message);
                println!("{}", render(&response)?);
                Ok(response.success)
            }
        }
    }
}

/// Pretty JSON of a response
pub fn render<T: Serialize>(response: &ServiceResponse<T>) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(response)?)
}
