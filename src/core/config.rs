use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;
use crate::services::tts::TtsConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data")]
    pub data_folder: String,

    /// Skip the interactive confirmation between chapters.
    #[serde(default)]
    pub unattended: bool,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_style")]
    pub style_preset: String,

    pub llm: LlmConfig,

    pub tts: TtsConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_data() -> String {
    "data".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_style() -> String {
    "pixar_disney".to_string()
}
fn default_fps() -> u32 {
    24
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        Ok(())
    }
}
