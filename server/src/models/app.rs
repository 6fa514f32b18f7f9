//! Application names

use std::fmt;

use crate::errors::StormError;

/// Longest name accepted as a Kubernetes object name (DNS-1123 label)
pub const MAX_APP_NAME_LEN: usize = 63;

/// Suffix of the per-application build directory
const BUILD_DIR_SUFFIX: &str = "Build";

/// Lower-cased application name, valid as a Kubernetes object name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppName(String);

impl AppName {
    /// Lower-case `raw` and check it is a DNS-1123 label
    pub fn parse(raw: &str) -> Result<Self, StormError> {
        if raw.is_empty() {
            return Err(StormError::Validation(
                "bad request: app name is missing".to_string(),
            ));
        }

        let name = raw.to_lowercase();
        let invalid = |reason: &str| {
            StormError::Validation(format!("bad request: invalid app name {:?}: {}", raw, reason))
        };
        if name.len() > MAX_APP_NAME_LEN {
            return Err(invalid("longer than 63 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("only letters, digits and '-' are allowed"));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(invalid("must start and end with a letter or digit"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build directory key, `{name}Build`
    pub fn build_dir(&self) -> String {
        format!("{}{}", self.0, BUILD_DIR_SUFFIX)
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
