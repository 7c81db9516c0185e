use serde::Deserialize;
use std::str::FromStr;

/// What happens to a command whose worker stopped sending heartbeats.
///
/// - `Fail`: the owning instance enters `error` with a "worker lost" message
///   (default behaviour).
/// - `Requeue`: the command goes back on the command queue with its priority
///   modifier bumped, so another worker can pick it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LostCommandPolicy {
    #[default]
    Fail,
    Requeue,
}

impl FromStr for LostCommandPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(LostCommandPolicy::Fail),
            "requeue" => Ok(LostCommandPolicy::Requeue),
            other => Err(format!(
                "invalid lost_command_policy: {other} (expected \"fail\" or \"requeue\")"
            )),
        }
    }
}
