//! Build identification printed by `mdrepo version`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildVersion {
    /// Crate version, e.g. "0.9.0"
    pub version: String,
    /// `git describe` of the source tree, absent when built outside a checkout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_describe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
    pub target: String,
}

impl BuildVersion {
    /// Values captured at compile time by `build.rs`.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("MDREPO_GIT_DESCRIBE").map(String::from),
            git_hash: option_env!("MDREPO_GIT_HASH").map(String::from),
            target: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// ```
    /// use common::version::BuildVersion;
    ///
    /// let v = BuildVersion {
    ///     version: "0.9.0".to_string(),
    ///     git_describe: Some("v0.8.2-3-g1a2b3c4".to_string()),
    ///     git_hash: None,
    ///     target: "linux/x86_64".to_string(),
    /// };
    /// assert_eq!(v.display(), "0.9.0 (v0.8.2-3-g1a2b3c4)");
    /// ```
    pub fn display(&self) -> String {
        match &self.git_describe {
            Some(describe) => format!("{} ({})", self.version, describe),
            None => self.version.clone(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow::anyhow!("failed to serialize version: {:#}", e))
    }
}

impl std::fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
