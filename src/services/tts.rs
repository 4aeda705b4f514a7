use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Narration-synthesis collaborator: narration text in, audio plus a WEBVTT
/// subtitle track out. Model, voice and network concerns live behind the
/// implementation.
#[async_trait]
pub trait NarrationSynth: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<NarrationAsset>;

    /// Bounded concurrency for the per-scene synthesis loop.
    fn max_concurrency(&self) -> usize {
        4
    }
}

pub struct NarrationAsset {
    pub audio: Vec<u8>,
    pub subtitle: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    pub provider: String,
    pub openai: Option<OpenAiTtsConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiTtsConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub base_url: Option<String>,
}

pub fn create_synth(config: &TtsConfig) -> Result<Box<dyn NarrationSynth>> {
    match config.provider.as_str() {
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI TTS config missing")?;
            Ok(Box::new(OpenAiSynth::new(cfg)))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}

/// OpenAI-compatible `audio/speech` endpoint.
pub struct OpenAiSynth {
    cfg: OpenAiTtsConfig,
    client: reqwest::Client,
}

impl OpenAiSynth {
    pub fn new(cfg: &OpenAiTtsConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl NarrationSynth for OpenAiSynth {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<NarrationAsset> {
        let base = self
            .cfg
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let resp = self
            .client
            .post(format!("{base}/audio/speech"))
            .bearer_auth(&self.cfg.api_key)
            .json(&SpeechRequest {
                model: &self.cfg.model,
                voice: &self.cfg.voice,
                input: text,
                response_format: "mp3",
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("TTS request failed: {}", resp.status()));
        }
        let audio = resp.bytes().await?.to_vec();
        Ok(NarrationAsset {
            subtitle: single_cue_vtt(text),
            audio,
        })
    }
}

/// Rough reading speed used to size the single subtitle cue when the
/// synthesizer reports no timing information.
const WORDS_PER_SECOND: f64 = 2.5;

/// WEBVTT track with one cue spanning the estimated read time.
pub fn single_cue_vtt(text: &str) -> String {
    let words = text.split_whitespace().count();
    let secs = (words as f64 / WORDS_PER_SECOND).max(1.0);
    format!(
        "WEBVTT\n\n00:00:00.000 --> {}\n{}\n",
        vtt_stamp(secs),
        text.trim()
    )
}

fn vtt_stamp(secs: f64) -> String {
    let whole = secs.floor() as u64;
    let millis = ((secs - whole as f64) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        whole / 3600,
        (whole % 3600) / 60,
        whole % 60,
        millis
    )
}

/// Strip markup the synthesizer would read aloud and collapse whitespace.
pub fn preprocess_narration(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut in_bracket = false;
    for c in text.chars() {
        match c {
            '[' | '(' => in_bracket = true,
            ']' | ')' => in_bracket = false,
            '*' | '#' | '_' => {}
            _ if !in_bracket => cleaned.push(c),
            _ => {}
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_drops_markers_and_asides() {
        assert_eq!(
            preprocess_narration("David  *rises* (softly) and [beat] speaks."),
            "David rises and speaks."
        );
    }

    #[test]
    fn preprocess_keeps_plain_text() {
        assert_eq!(preprocess_narration("A plain line."), "A plain line.");
    }

    #[test]
    fn vtt_cue_spans_the_estimated_read_time() {
        let vtt = single_cue_vtt("one two three four five");
        assert!(vtt.starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:02.000\n"));
        assert!(vtt.ends_with("one two three four five\n"));
    }
}
