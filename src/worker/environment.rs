use serde::{Deserialize, Serialize};

/// Hardware and OS description a benchmarker reports when it registers.
///
/// The dispatcher stores and reports it but never schedules on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEnvironment {
    #[serde(default)]
    pub computer_name: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub processor: String,
    #[serde(default)]
    pub cores: u32,
    /// In GiB.
    #[serde(default)]
    pub ram: u64,
}
