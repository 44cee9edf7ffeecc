//! Profiles command implementation.

use bandsync_protocol::{default_registry, CheckpointPolicy, MatchRule};
use serde::Serialize;

/// A registry entry for output.
#[derive(Debug, Serialize)]
pub struct ProfileInfo {
    /// Match priority, starting at 1.
    pub priority: usize,
    /// Device family.
    pub family: String,
    /// Human-readable match rule.
    pub rule: String,
    /// Control channel UUID.
    pub control_channel: String,
    /// Data channel UUID.
    pub data_channel: String,
    /// Maximum data chunk size in bytes.
    pub chunk_size: usize,
    /// Checkpoint policy.
    pub checkpoint: String,
}

/// Runs the profiles command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let profiles: Vec<ProfileInfo> = default_registry()
        .iter()
        .enumerate()
        .map(|(i, (rule, profile))| ProfileInfo {
            priority: i + 1,
            family: profile.family.to_string(),
            rule: describe_rule(rule),
            control_channel: profile.control_channel.to_string(),
            data_channel: profile.data_channel.to_string(),
            chunk_size: profile.chunk_size,
            checkpoint: describe_policy(&profile.checkpoint_policy),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }
        _ => {
            for p in &profiles {
                println!("{}. {:<14} {}", p.priority, p.family, p.rule);
                println!("   control {}  data {}", p.control_channel, p.data_channel);
                println!("   chunk {} bytes, checkpoint {}", p.chunk_size, p.checkpoint);
            }
        }
    }

    Ok(())
}

fn describe_rule(rule: &MatchRule) -> String {
    match rule {
        MatchRule::NameEquals(name) => format!("name = {name:?}"),
        MatchRule::NamePrefix(prefix) => format!("name starts with {prefix:?}"),
        MatchRule::AddressPrefix(prefix) => format!("address starts with {prefix:?}"),
    }
}

fn describe_policy(policy: &CheckpointPolicy) -> String {
    match policy {
        CheckpointPolicy::RangeStart => "range start".to_string(),
        CheckpointPolicy::PerSample {
            sample_size,
            interval_secs,
        } => format!("{sample_size}-byte samples, {interval_secs}s each"),
    }
}
