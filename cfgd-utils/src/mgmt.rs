//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::path::Path;

/// Management error class, mirroring the NETCONF error-type leaf.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrType {
    Application,
    Protocol,
    Transport,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrSeverity {
    Error,
    Warning,
}

/// Machine token identifying the error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrTag {
    #[serde(rename = "unknown-element")]
    UnknownElement,
    #[serde(rename = "data-exists")]
    DataExists,
    #[serde(rename = "data-missing")]
    DataMissing,
    #[serde(rename = "invalid-value")]
    InvalidValue,
    #[serde(rename = "missing-element")]
    MissingElement,
    #[serde(rename = "missing-mandatory-node")]
    MissingMandatoryNode,
    #[serde(rename = "must-violation")]
    MustViolation,
    #[serde(rename = "unique-violation")]
    UniqueViolation,
    #[serde(rename = "access-denied")]
    AccessDenied,
    #[serde(rename = "operation-failed")]
    OperationFailed,
    #[serde(rename = "operation-not-supported")]
    OperationNotSupported,
    #[serde(rename = "malformed-message")]
    MalformedMessage,
    #[serde(rename = "path-ambiguous")]
    PathAmbiguous,
}

/// Auxiliary error information key/value pair (e.g. `bad-element`).
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct ErrInfo {
    pub name: String,
    pub value: String,
}

/// A single structured management error as carried on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MgmtError {
    #[serde(rename = "error-type")]
    pub typ: ErrType,
    #[serde(rename = "error-tag")]
    pub tag: ErrTag,
    #[serde(rename = "error-severity")]
    pub severity: ErrSeverity,
    #[serde(rename = "error-app-tag", skip_serializing_if = "Option::is_none")]
    pub app_tag: Option<String>,
    #[serde(rename = "error-path", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "error-message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "error-info", default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<ErrInfo>,
}

/// List of management errors, serialised as the `mgmterrorlist` wire field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(transparent)]
pub struct MgmtErrorList(pub Vec<MgmtError>);

// ===== impl ErrTag =====

impl ErrTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrTag::UnknownElement => "unknown-element",
            ErrTag::DataExists => "data-exists",
            ErrTag::DataMissing => "data-missing",
            ErrTag::InvalidValue => "invalid-value",
            ErrTag::MissingElement => "missing-element",
            ErrTag::MissingMandatoryNode => "missing-mandatory-node",
            ErrTag::MustViolation => "must-violation",
            ErrTag::UniqueViolation => "unique-violation",
            ErrTag::AccessDenied => "access-denied",
            ErrTag::OperationFailed => "operation-failed",
            ErrTag::OperationNotSupported => "operation-not-supported",
            ErrTag::MalformedMessage => "malformed-message",
            ErrTag::PathAmbiguous => "path-ambiguous",
        }
    }
}

// ===== impl MgmtError =====

impl MgmtError {
    fn app_error(tag: ErrTag) -> MgmtError {
        MgmtError {
            typ: ErrType::Application,
            tag,
            severity: ErrSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> MgmtError {
        self.path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> MgmtError {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_app_tag(mut self, app_tag: impl Into<String>) -> MgmtError {
        self.app_tag = Some(app_tag.into());
        self
    }

    #[must_use]
    pub fn with_info(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> MgmtError {
        self.info.push(ErrInfo::new(name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn as_warning(mut self) -> MgmtError {
        self.severity = ErrSeverity::Warning;
        self
    }

    pub fn unknown_element(
        path: &Path,
        bad_element: &str,
        message: impl Into<String>,
    ) -> MgmtError {
        MgmtError::app_error(ErrTag::UnknownElement)
            .with_path(path)
            .with_message(message)
            .with_info("bad-element", bad_element)
    }

    pub fn data_exists(path: &Path) -> MgmtError {
        MgmtError::app_error(ErrTag::DataExists)
            .with_path(path)
            .with_message("Node exists")
    }

    pub fn data_missing(path: &Path) -> MgmtError {
        MgmtError::app_error(ErrTag::DataMissing)
            .with_path(path)
            .with_message("Nothing to delete")
    }

    pub fn invalid_value(path: &Path, message: impl Into<String>) -> MgmtError {
        MgmtError::app_error(ErrTag::InvalidValue)
            .with_path(path)
            .with_message(message)
    }

    pub fn missing_element(path: &Path, bad_element: &str) -> MgmtError {
        MgmtError::app_error(ErrTag::MissingElement)
            .with_path(path)
            .with_message(format!("Missing required element '{bad_element}'"))
            .with_info("bad-element", bad_element)
    }

    pub fn missing_mandatory(path: &Path, name: &str) -> MgmtError {
        MgmtError::app_error(ErrTag::MissingMandatoryNode)
            .with_path(path)
            .with_message(format!("Missing mandatory node '{name}'"))
            .with_info("bad-element", name)
    }

    pub fn must_violation(
        path: &Path,
        xpath: &str,
        custom: Option<&str>,
    ) -> MgmtError {
        let message = match custom {
            Some(custom) => custom.to_owned(),
            None => format!("'must' condition is false: '{xpath}'"),
        };
        MgmtError::app_error(ErrTag::MustViolation)
            .with_path(path)
            .with_message(message)
    }

    pub fn unique_violation(path: &Path, entries: &[String]) -> MgmtError {
        let mut error = MgmtError::app_error(ErrTag::UniqueViolation)
            .with_path(path)
            .with_message(format!(
                "'unique' constraint violated by [{}]",
                entries.join(" ")
            ));
        for entry in entries {
            error = error.with_info("non-unique", entry);
        }
        error
    }

    pub fn access_denied() -> MgmtError {
        MgmtError::app_error(ErrTag::AccessDenied)
            .with_message("Access to the requested operation is denied")
    }

    pub fn operation_failed(message: impl Into<String>) -> MgmtError {
        MgmtError::app_error(ErrTag::OperationFailed).with_message(message)
    }

    pub fn exec_failed(path: &Path, message: impl Into<String>) -> MgmtError {
        MgmtError::app_error(ErrTag::OperationFailed)
            .with_path(path)
            .with_app_tag("exec-failed")
            .with_message(message)
    }

    pub fn operation_not_supported(message: impl Into<String>) -> MgmtError {
        MgmtError::app_error(ErrTag::OperationNotSupported)
            .with_message(message)
    }

    pub fn malformed_message(message: impl Into<String>) -> MgmtError {
        MgmtError {
            typ: ErrType::Protocol,
            ..MgmtError::app_error(ErrTag::MalformedMessage)
        }
        .with_message(message)
    }

    pub fn path_ambiguous(path: &Path, matches: &[String]) -> MgmtError {
        MgmtError::app_error(ErrTag::PathAmbiguous)
            .with_path(path)
            .with_message(format!(
                "Ambiguous path, could be one of: [{}]",
                matches.join(" ")
            ))
    }

    pub fn is_error(&self) -> bool {
        self.severity == ErrSeverity::Error
    }
}

impl fmt::Display for MgmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{path}: ")?;
        }
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.tag.as_str()),
        }
    }
}

impl std::error::Error for MgmtError {}

// ===== impl MgmtErrorList =====

impl MgmtErrorList {
    pub fn new() -> MgmtErrorList {
        MgmtErrorList(Vec::new())
    }

    pub fn push(&mut self, error: MgmtError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: MgmtErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MgmtError> {
        self.0.iter()
    }

    /// True when at least one entry has error severity (as opposed to a
    /// list that only carries warnings).
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(MgmtError::is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &MgmtError> {
        self.0.iter().filter(|error| !error.is_error())
    }
}

impl From<MgmtError> for MgmtErrorList {
    fn from(error: MgmtError) -> MgmtErrorList {
        MgmtErrorList(vec![error])
    }
}

impl IntoIterator for MgmtErrorList {
    type Item = MgmtError;
    type IntoIter = std::vec::IntoIter<MgmtError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for MgmtErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MgmtErrorList {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_tokens() {
        let error = MgmtError::invalid_value(
            &Path::from(["x", "1001"]),
            "Must have value between 1 and 1000",
        );
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["error-tag"], "invalid-value");
        assert_eq!(json["error-type"], "application");
        assert_eq!(json["error-path"], "/x/1001");
    }

    #[test]
    fn list_severity() {
        let mut list = MgmtErrorList::new();
        list.push(MgmtError::data_missing(&Path::from(["a"])).as_warning());
        assert!(!list.has_errors());
        list.push(MgmtError::access_denied());
        assert!(list.has_errors());
        assert_eq!(list.warnings().count(), 1);
    }
}
