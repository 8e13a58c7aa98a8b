//! `DsoConfig`: the process-wide configuration surface from SPEC_FULL.md §6,
//! loaded once at startup and handed down by `Arc`, never read from a global.
//!
//! Grounded on `common/config`'s `AppConfig`/`AIConfig` (tempdir, debugger
//! image, resource caps, AI provider kind/key/base/model), expressed as a
//! `serde`+`toml` struct the way the teacher loads its own workspace/kernel
//! settings.

use std::path::Path;
use std::time::Duration;

use dso_analyzer::AiProviderConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DsoConfig {
    pub temp_dir: String,
    pub debugger_image: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub port_range_start: u16,
    pub port_range_end: u16,
    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_debug_timeout_secs")]
    pub debug_timeout_secs: u64,
    pub ai_provider: AiProviderSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiProviderSection {
    pub kind: String,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_sec: u64,
}

fn default_compile_timeout_secs() -> u64 {
    30
}

fn default_op_timeout_secs() -> u64 {
    2
}

fn default_debug_timeout_secs() -> u64 {
    600
}

fn default_ai_timeout_secs() -> u64 {
    30
}

impl DsoConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn debug_timeout(&self) -> Duration {
        Duration::from_secs(self.debug_timeout_secs)
    }

    pub fn ai_provider_config(&self) -> AiProviderConfig {
        AiProviderConfig {
            kind: self.ai_provider.kind.clone(),
            api_key: self.ai_provider.api_key.clone(),
            api_base: self.ai_provider.api_base.clone(),
            model: self.ai_provider.model.clone(),
            timeout_sec: self.ai_provider.timeout_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            temp_dir = "/tmp/dso"
            debugger_image = "debuggers/go"
            memory_bytes = 1073741824
            cpu_quota = 300000
            port_range_start = 30000
            port_range_end = 31000

            [ai_provider]
            kind = "openai"
            api_key = "sk-test"
            api_base = "https://api.openai.com/v1"
            model = "gpt-4o-mini"
        "#;
        let config: DsoConfig = toml::from_str(toml).expect("valid config");
        assert_eq!(config.compile_timeout_secs, 30);
        assert_eq!(config.op_timeout(), Duration::from_secs(2));
        assert_eq!(config.ai_provider.kind, "openai");
    }
}
