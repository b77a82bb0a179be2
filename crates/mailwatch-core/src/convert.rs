//! One-shot conversion of the credential cache into the googleapis-style
//! `token.json` consumed by the notification handlers.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::{CredentialCache, CredentialError};
use crate::gmail::oauth::{BEARER, Credential};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no credential found at {}", .0.display())]
    MissingInput(PathBuf),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("failed to encode converted token: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Vec<String>,
    pub token_type: String,
    pub expiry_date: Option<i64>,
}

impl From<&Credential> for ConvertedToken {
    fn from(credential: &Credential) -> Self {
        Self {
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            scope: credential.scopes.clone(),
            token_type: BEARER.to_string(),
            expiry_date: credential.expiry.map(epoch_millis_rounded),
        }
    }
}

/// Epoch milliseconds, rounded half-up at microsecond precision.
pub fn epoch_millis_rounded(instant: DateTime<Utc>) -> i64 {
    let micros = instant.timestamp_micros();
    let millis = micros.div_euclid(1000);
    if micros.rem_euclid(1000) >= 500 {
        millis + 1
    } else {
        millis
    }
}

/// Read the credential cache at `input` and write the converted record to
/// `output`.
pub fn convert_file(input: &Path, output: &Path) -> Result<ConvertedToken, ConvertError> {
    let credential = CredentialCache::new(input)
        .load()?
        .ok_or_else(|| ConvertError::MissingInput(input.to_path_buf()))?;

    let converted = ConvertedToken::from(&credential);
    let body = serde_json::to_string(&converted)?;
    fs::write(output, body).map_err(|source| ConvertError::Write {
        path: output.to_path_buf(),
        source,
    })?;

    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    #[test]
    fn null_refresh_and_expiry_convert_to_nulls() {
        let dir = TempDir::new().expect("temp dir");
        let input = dir.path().join("cache.json");
        let output = dir.path().join("token.json");
        fs::write(
            &input,
            json!({
                "token": "access",
                "refresh_token": null,
                "scopes": ["https://www.googleapis.com/auth/gmail.readonly"],
                "token_type": "weird",
                "expiry": null
            })
            .to_string(),
        )
        .expect("write input");

        let converted = convert_file(&input, &output).expect("conversion succeeds");
        assert_eq!(converted.expiry_date, None);
        assert_eq!(converted.token_type, "Bearer");

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&output).expect("read output"))
                .expect("output is json");
        assert_eq!(
            written,
            json!({
                "access_token": "access",
                "refresh_token": null,
                "scope": ["https://www.googleapis.com/auth/gmail.readonly"],
                "token_type": "Bearer",
                "expiry_date": null
            })
        );
    }

    #[test]
    fn expiry_is_written_as_epoch_millis() {
        let dir = TempDir::new().expect("temp dir");
        let input = dir.path().join("cache.json");
        let output = dir.path().join("token.json");
        fs::write(
            &input,
            r#"{"token":"a","refresh_token":"r","scopes":[],"expiry":"2023-11-14T22:13:20.000600Z"}"#,
        )
        .expect("write input");

        let converted = convert_file(&input, &output).expect("conversion succeeds");
        assert_eq!(converted.expiry_date, Some(1_700_000_000_001));
        assert_eq!(converted.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn millis_round_to_nearest() {
        let base = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(epoch_millis_rounded(base), 1_700_000_000_000);
        assert_eq!(
            epoch_millis_rounded(base + Duration::microseconds(499)),
            1_700_000_000_000
        );
        assert_eq!(
            epoch_millis_rounded(base + Duration::microseconds(500)),
            1_700_000_000_001
        );
        assert_eq!(
            epoch_millis_rounded(base - Duration::microseconds(400)),
            1_700_000_000_000
        );
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let err = convert_file(&dir.path().join("absent.json"), &dir.path().join("out.json"))
            .expect_err("no input");
        assert!(matches!(err, ConvertError::MissingInput(_)));
    }

    #[test]
    fn malformed_input_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let input = dir.path().join("cache.json");
        fs::write(&input, r#"{"token":"a","scopes":"gmail.send"}"#).expect("write input");

        let err = convert_file(&input, &dir.path().join("out.json")).expect_err("bad scopes");
        assert!(matches!(
            err,
            ConvertError::Credentials(CredentialError::Parse { .. })
        ));
    }
}
