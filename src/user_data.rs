//! Launch user data for build instances.
//!
//! A build carries at most one user-data payload, taken either from the
//! `user_data` setting or from the file named by `user_data_file`. The compute
//! API wants the payload base64 encoded in the instance metadata, which
//! [`encode_user_data`] takes care of.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Where a user-data payload came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UserDataOrigin {
    /// The `user_data` setting.
    Inline,
    /// The file named by `user_data_file`.
    File,
}

impl fmt::Display for UserDataOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("user_data"),
            Self::File => f.write_str("user_data_file"),
        }
    }
}

/// Errors raised while reading a build's user data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum UserDataError {
    /// Both `user_data` and `user_data_file` are set.
    #[error("set either user_data or user_data_file for the build instance, not both")]
    BothProvided,
    /// `user_data_file` is set to a blank path.
    #[error("user_data_file is set but names no file")]
    MissingPath,
    /// The payload would launch the instance with nothing to run.
    #[error("{origin} holds no launch script for the build instance")]
    Blank {
        /// Setting the blank payload came from.
        origin: UserDataOrigin,
    },
    /// The user-data file could not be read.
    #[error("cannot load build instance user data from {path}: {message}")]
    FileRead {
        /// Path after home-directory expansion.
        path: Utf8PathBuf,
        /// I/O error reported by the filesystem.
        message: String,
    },
}

/// Returns the raw user-data payload for a build, if any.
///
/// The payload is returned exactly as written; blankness is judged on the
/// trimmed text.
///
/// # Errors
///
/// Returns [`UserDataError`] when both settings are present, the chosen one is
/// blank, or the file cannot be read.
pub fn resolve_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, UserDataError> {
    let (origin, payload) = match (inline, file) {
        (None, None) => return Ok(None),
        (Some(_), Some(_)) => return Err(UserDataError::BothProvided),
        (Some(text), None) => (UserDataOrigin::Inline, text.to_owned()),
        (None, Some(path)) => (UserDataOrigin::File, read_payload(path)?),
    };

    if payload.trim().is_empty() {
        return Err(UserDataError::Blank { origin });
    }
    Ok(Some(payload))
}

/// Base64 encodes `payload` unless it already decodes as standard base64.
#[must_use]
pub fn encode_user_data(payload: &str) -> String {
    if STANDARD.decode(payload).is_ok() {
        return payload.to_owned();
    }
    tracing::debug!("base64 encoding user data");
    STANDARD.encode(payload)
}

fn read_payload(raw_path: &str) -> Result<String, UserDataError> {
    if raw_path.trim().is_empty() {
        return Err(UserDataError::MissingPath);
    }

    let path = expand_home(raw_path);
    let (dir, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        _ => (Utf8Path::new("."), path.as_str()),
    };

    Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|opened| opened.read_to_string(name))
        .map_err(|err| UserDataError::FileRead {
            path: path.clone(),
            message: err.to_string(),
        })
}

/// Expands a leading `~/` against `HOME`; other paths pass through.
fn expand_home(raw_path: &str) -> Utf8PathBuf {
    raw_path
        .strip_prefix("~/")
        .zip(std::env::var("HOME").ok())
        .map_or_else(
            || Utf8PathBuf::from(raw_path),
            |(rest, home)| Utf8PathBuf::from(home).join(rest),
        )
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    fn temp_file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap_or_else(|err| panic!("tempfile: {err}"));
        file.write_all(content.as_bytes())
            .unwrap_or_else(|err| panic!("write tempfile: {err}"));
        file
    }

    fn path_of(file: &NamedTempFile) -> String {
        file.path()
            .to_str()
            .unwrap_or_else(|| panic!("tempfile path should be utf-8"))
            .to_owned()
    }

    #[test]
    fn no_settings_means_no_user_data() {
        assert_eq!(resolve_user_data(None, None), Ok(None));
    }

    #[test]
    fn both_settings_are_refused() {
        assert_eq!(
            resolve_user_data(Some("#cloud-config"), Some("/tmp/x")),
            Err(UserDataError::BothProvided)
        );
    }

    #[rstest]
    #[case("")]
    #[case("   \n")]
    fn blank_inline_payload_names_its_setting(#[case] payload: &str) {
        let result = resolve_user_data(Some(payload), None);

        assert_eq!(
            result,
            Err(UserDataError::Blank {
                origin: UserDataOrigin::Inline
            })
        );
        let message = result.map_or_else(|err| err.to_string(), |_| String::new());
        assert!(message.starts_with("user_data holds"), "{message}");
    }

    #[rstest]
    #[case("")]
    #[case("  ")]
    fn blank_file_path_is_refused(#[case] path: &str) {
        assert_eq!(
            resolve_user_data(None, Some(path)),
            Err(UserDataError::MissingPath)
        );
    }

    #[test]
    fn file_payload_is_read_verbatim() {
        let file = temp_file_with("#cloud-config\npackages: [git]\n");
        let resolved = resolve_user_data(None, Some(&path_of(&file)));
        assert_eq!(
            resolved,
            Ok(Some(String::from("#cloud-config\npackages: [git]\n")))
        );
    }

    #[test]
    fn blank_file_names_its_setting() {
        let file = temp_file_with("  \n");
        assert_eq!(
            resolve_user_data(None, Some(&path_of(&file))),
            Err(UserDataError::Blank {
                origin: UserDataOrigin::File
            })
        );
    }

    #[test]
    fn unreadable_file_reports_expanded_path() {
        let result = resolve_user_data(None, Some("/definitely/not/here/user-data"));
        assert!(
            matches!(
                &result,
                Err(UserDataError::FileRead { path, .. })
                    if path.as_str() == "/definitely/not/here/user-data"
            ),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn plain_text_is_encoded() {
        assert_eq!(
            encode_user_data("#!/bin/sh\necho hi\n"),
            STANDARD.encode("#!/bin/sh\necho hi\n")
        );
    }

    #[test]
    fn already_encoded_payload_is_kept() {
        let encoded = STANDARD.encode("#cloud-config\n");
        assert_eq!(encode_user_data(&encoded), encoded);
    }
}
