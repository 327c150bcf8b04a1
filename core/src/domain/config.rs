// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! YAML node configuration loaded at startup.
//!
//! An unreadable or malformed file is a construction failure; the process
//! aborts with a non-zero exit before any component starts.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// LLM backends, keyed by model name in the provider registry.
    #[serde(default)]
    pub llm: Vec<LlmConfig>,

    /// Optional SQLite persistence; absent means fully in-memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<DbConfig>,

    /// The fixed agent roster.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// File stem; the store opens `<name>.db`.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Tie-breaker rank; higher numbers denote more junior, front-line roles.
    #[serde(default)]
    pub hierarchy: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_dir: Option<String>,
    /// Self-task-generation cadence, e.g. "30m". Defaults to 30 minutes.
    #[serde(default, with = "humantime_serde")]
    pub task_gen_interval: Option<Duration>,
    /// Concurrent-task cap. Defaults to 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tasks: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch poll interval, e.g. "5s". Defaults to 5 seconds.
    #[serde(default, with = "humantime_serde")]
    pub tick_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jobs: Vec<TimerJobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerJobConfig {
    pub name: String,
    /// Firing interval, e.g. "30m", "1h", "24h". The engine checks on a
    /// fixed 30-second tick, so sub-minute precision is not available.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub target_agent: String,
    pub task: TimerTaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerTaskConfig {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashMap::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                anyhow::bail!("agent with empty name in config");
            }
            if seen.insert(agent.name.clone(), ()).is_some() {
                anyhow::bail!("duplicate agent name '{}' in config", agent.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
llm:
  - model: qwen-max
    base_url: https://example.invalid/v1
    api_key: sk-test
db:
  name: cadre
agents:
  - name: ceo
    desc: chief executive
    model: qwen-max
    hierarchy: 1
    task_gen_interval: 30m
    max_tasks: 3
  - name: rd
    desc: engineer
    model: qwen-max
    hierarchy: 5
scheduler:
  tick_interval: 5s
timer:
  enabled: true
  jobs:
    - name: daily-report
      interval: 24h
      target_agent: ceo
      task:
        title: Daily report
        description: Summarize the day
        priority: medium
"#;

    #[test]
    fn parses_full_document() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm.len(), 1);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].task_gen_interval, Some(Duration::from_secs(30 * 60)));
        assert_eq!(config.agents[1].max_tasks, None);
        assert_eq!(
            config.scheduler.unwrap().tick_interval,
            Some(Duration::from_secs(5))
        );
        let timer = config.timer.unwrap();
        assert!(timer.enabled);
        assert_eq!(timer.jobs[0].interval, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn duplicate_agent_names_are_rejected() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let clone = config.agents[0].clone();
        config.agents.push(clone);
        assert!(config.validate().is_err());
    }
}
