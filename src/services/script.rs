use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::core::state::{Chapter, Project, Scene, Script, MAX_NARRATION_WORDS, MAX_SCENE_SECS};
use crate::services::llm::LlmClient;
use crate::services::timeline::EraPhase;
use crate::utils::text::extract_keywords;

/// Script-generation collaborator: given chapter context, returns the
/// ordered scene list plus one video-generation prompt per scene.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn generate(&self, project: &Project, chapter: &Chapter) -> Result<GeneratedScript>;

    /// One-paragraph visual description of a character in a given life
    /// phase, reused verbatim in every prompt that features them. The
    /// default derives a plain description from the first appearance.
    async fn describe_character(
        &self,
        character: &str,
        era: EraPhase,
        context: &str,
    ) -> Result<String> {
        Ok(format!("{character}, {} phase. {context}", era.as_str()))
    }
}

pub struct GeneratedScript {
    pub script: Script,
    /// Full generation-prompt text per scene, same order as the scenes.
    pub scene_prompts: Vec<String>,
}

pub struct LlmScriptSource {
    llm: Box<dyn LlmClient>,
    style_preset: String,
}

impl LlmScriptSource {
    pub fn new(llm: Box<dyn LlmClient>, style_preset: &str) -> Self {
        Self {
            llm,
            style_preset: style_preset.to_string(),
        }
    }

    fn system_prompt(&self) -> String {
        "You are a screenwriter for short-form episodic animation. \
         Return only valid JSON, no markdown fences."
            .to_string()
    }

    fn user_prompt(&self, project: &Project, chapter: &Chapter) -> String {
        format!(
            "Write the scene-by-scene script for one chapter of an animated episode.\n\
             \n\
             Project: {title}\n\
             Source reference: {scripture}\n\
             Chapter {index} of {total}: {chapter_title}\n\
             Key events for this chapter: {key_events}\n\
             Reference range: {range}\n\
             Target duration: {target:.0}s\n\
             Visual style preset: {style}\n\
             \n\
             Rules:\n\
             - Each scene runs at most {max_secs:.0} seconds.\n\
             - Each scene's narration is at most {max_words} words.\n\
             - List every character visible in the scene by a stable UPPERCASE id.\n\
             - `video_prompt` describes objects, action and atmosphere for a \
               video generation model.\n\
             \n\
             Return only a JSON object:\n\
             {{ \"scenes\": [ {{ \"index\": 1, \"narration\": \"...\", \
             \"duration_secs\": 6.0, \"characters\": [\"...\"], \
             \"video_prompt\": \"...\" }} ] }}",
            title = project.title,
            scripture = project.scripture_ref,
            index = chapter.index,
            total = project.chapters.len(),
            chapter_title = chapter.title,
            key_events = chapter.key_events,
            range = chapter.scripture_range,
            target = chapter.duration_target_secs,
            style = self.style_preset,
            max_secs = MAX_SCENE_SECS,
            max_words = MAX_NARRATION_WORDS,
        )
    }

    pub fn parse_response(&self, response: &str) -> Result<GeneratedScript> {
        #[derive(Deserialize)]
        struct RawScript {
            scenes: Vec<RawScene>,
        }
        #[derive(Deserialize)]
        struct RawScene {
            index: usize,
            narration: String,
            #[serde(default)]
            duration_secs: f64,
            #[serde(default)]
            characters: Vec<String>,
            #[serde(default)]
            video_prompt: String,
        }

        let clean = strip_code_blocks(response);
        let raw: RawScript = serde_json::from_str(&clean)
            .with_context(|| format!("Failed to parse script JSON: {clean}"))?;

        let mut scenes = Vec::with_capacity(raw.scenes.len());
        let mut prompts = Vec::with_capacity(raw.scenes.len());
        for s in raw.scenes {
            let keyword_text = format!("{} {}", s.video_prompt, s.narration);
            scenes.push(Scene {
                index: s.index,
                narration: s.narration,
                duration_secs: s.duration_secs,
                characters: s.characters,
                prompt_keywords: extract_keywords(&keyword_text).into_iter().collect(),
                audio_priority: None,
                skip_tts: false,
            });
            prompts.push(s.video_prompt);
        }

        Ok(GeneratedScript {
            script: Script {
                schema_version: crate::core::state::SCHEMA_VERSION,
                scenes,
            },
            scene_prompts: prompts,
        })
    }
}

#[async_trait]
impl ScriptSource for LlmScriptSource {
    async fn generate(&self, project: &Project, chapter: &Chapter) -> Result<GeneratedScript> {
        let response = self
            .llm
            .chat(&self.system_prompt(), &self.user_prompt(project, chapter))
            .await?;
        self.parse_response(&response)
    }

    async fn describe_character(
        &self,
        character: &str,
        era: EraPhase,
        context: &str,
    ) -> Result<String> {
        let user = format!(
            "Describe the physical appearance of the character {character} in the \
             {} phase of their life, for a {} animated film. Scene context: {context}. \
             One paragraph, appearance only: face, build, hair, clothing, distinguishing \
             marks. No actions, no story.",
            era.as_str(),
            self.style_preset,
        );
        let response = self
            .llm
            .chat(
                "You write compact, reusable character sheets for animation prompts.",
                &user,
            )
            .await?;
        Ok(response.trim().to_string())
    }
}

/// One block per scene, for hand-off to whoever produces the actual video.
pub fn format_scene_prompts(generated: &GeneratedScript) -> String {
    let mut out = String::new();
    for (scene, prompt) in generated.script.scenes.iter().zip(&generated.scene_prompts) {
        out.push_str(&format!(
            "Scene {:03} ({:.1}s)\n{}\n\n",
            scene.index, scene.duration_secs, prompt
        ));
    }
    out
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
