use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the persisted project/script documents. Bumped when a field
/// changes meaning; older documents are migrated on load.
pub const SCHEMA_VERSION: u32 = 2;

/// Hard limits enforced at the script-generation boundary.
pub const MAX_SCENE_SECS: f64 = 8.0;
pub const MAX_NARRATION_WORDS: usize = 20;

/// Fixed blend mix: original-track level vs narration-track level.
/// A pipeline-wide constant, not configurable per call.
pub const BLEND_ORIGINAL_LEVEL: f64 = 0.8;
pub const BLEND_NARRATION_LEVEL: f64 = 0.2;

/// Chapter duration totals outside this fraction of the target raise a
/// warning (targets are planning estimates, not contracts).
pub const DURATION_TOLERANCE: f64 = 0.10;

/// Production stage of a chapter, strictly ordered. `AutoAssembled` only
/// occurs for the derived intro chapter (index 0), where the matcher
/// substitutes for manually supplied video.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Uninitialized,
    ScriptGenerated,
    AssetsGenerated,
    AwaitingExternalVideo,
    AutoAssembled,
    ScenesNormalized,
    Rendered,
    Merged,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Uninitialized => "uninitialized",
            StageStatus::ScriptGenerated => "script_generated",
            StageStatus::AssetsGenerated => "assets_generated",
            StageStatus::AwaitingExternalVideo => "awaiting_external_video",
            StageStatus::AutoAssembled => "auto_assembled",
            StageStatus::ScenesNormalized => "scenes_normalized",
            StageStatus::Rendered => "rendered",
            StageStatus::Merged => "merged",
        }
    }
}

/// Which audio source the render step uses for a scene.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Synthesized narration audio (the default).
    #[default]
    Narration,
    /// The originally produced video audio track.
    Original,
    /// Fixed 80/20 mix of original and narration.
    Blend,
}

/// The single versioned project state document. Loaded fully, mutated in
/// memory, written back atomically on every transition.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Project {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub scripture_ref: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub style_preset: String,
    #[serde(default)]
    pub created_at: String,
    /// Global target duration for the whole production, seconds.
    #[serde(default)]
    pub target_duration_secs: f64,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub status: String,
}

fn legacy_schema_version() -> u32 {
    1
}

fn default_language() -> String {
    "en".to_string()
}

impl Project {
    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.index == index)
    }

    pub fn chapter_mut(&mut self, index: usize) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.index == index)
    }

    /// Next chapter to produce. The intro (index 0) is produced last because
    /// it reuses highlight scenes from the completed content chapters.
    pub fn next_pending(&self) -> Option<usize> {
        let mut intro = None;
        for ch in &self.chapters {
            if ch.status != StageStatus::Uninitialized {
                continue;
            }
            if ch.index == 0 {
                intro = Some(ch.index);
                continue;
            }
            return Some(ch.index);
        }
        intro
    }
}

/// One narrative unit. Index 0 is the derived intro, assembled from other
/// chapters rather than independently produced.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub key_events: String,
    #[serde(default)]
    pub scripture_range: String,
    /// Planning estimate, seconds.
    #[serde(default)]
    pub duration_target_secs: f64,
    #[serde(default)]
    pub status: StageStatus,
    /// Per-scene audio policy overrides, scene ordinal -> mode.
    #[serde(default)]
    pub audio_priority: BTreeMap<usize, AudioMode>,
}

impl Chapter {
    pub fn is_intro(&self) -> bool {
        self.index == 0
    }
}

/// Per-chapter script document: the ordered scene list produced by the
/// script-generation collaborator. This is the source of truth; timeline
/// and anchor documents are caches rebuilt from it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Script {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    pub scenes: Vec<Scene>,
}

impl Script {
    /// Pure load-time migration. The legacy `skip_tts` flag reads as mode
    /// `original`; it is never written back, so the on-disk format converges
    /// to the new schema over successive runs.
    pub fn migrate(mut self) -> Self {
        for scene in &mut self.scenes {
            if scene.skip_tts && scene.audio_priority.is_none() {
                scene.audio_priority = Some(AudioMode::Original);
            }
            scene.skip_tts = false;
        }
        self.schema_version = SCHEMA_VERSION;
        self
    }
}

/// The smallest production unit: narration, a short clip and optional
/// subtitles. `index` is 1-based and matches the canonical media filenames.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Scene {
    pub index: usize,
    pub narration: String,
    /// Intended duration, seconds. Authoritative once media exists.
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub characters: Vec<String>,
    /// Keyword tokens derived from the scene's generation prompt.
    #[serde(default)]
    pub prompt_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_priority: Option<AudioMode>,
    /// Legacy flag meaning "skip narration". Read-only: migrated to
    /// `audio_priority = original` on load, never serialized again.
    #[serde(default, skip_serializing)]
    pub skip_tts: bool,
}

/// Manual scene-assignment overrides for the intro assembly,
/// target scene ordinal -> explicit source reference.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ManualAssignmentMap {
    #[serde(default)]
    pub entries: BTreeMap<usize, ManualAssignment>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ManualAssignment {
    pub source_chapter: usize,
    pub source_scene: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_strict() {
        assert!(StageStatus::Uninitialized < StageStatus::ScriptGenerated);
        assert!(StageStatus::ScriptGenerated < StageStatus::AssetsGenerated);
        assert!(StageStatus::AssetsGenerated < StageStatus::AwaitingExternalVideo);
        assert!(StageStatus::AwaitingExternalVideo < StageStatus::AutoAssembled);
        assert!(StageStatus::AutoAssembled < StageStatus::ScenesNormalized);
        assert!(StageStatus::ScenesNormalized < StageStatus::Rendered);
        assert!(StageStatus::Rendered < StageStatus::Merged);
    }

    #[test]
    fn skip_tts_migrates_to_original_mode() {
        let json = r#"{
            "scenes": [
                { "index": 1, "narration": "a", "skip_tts": true },
                { "index": 2, "narration": "b", "skip_tts": true, "audio_priority": "blend" },
                { "index": 3, "narration": "c" }
            ]
        }"#;
        let script: Script = serde_json::from_str(json).unwrap();
        let script = script.migrate();

        assert_eq!(script.scenes[0].audio_priority, Some(AudioMode::Original));
        // An explicit mode always wins over the legacy flag.
        assert_eq!(script.scenes[1].audio_priority, Some(AudioMode::Blend));
        assert_eq!(script.scenes[2].audio_priority, None);
        assert_eq!(script.schema_version, SCHEMA_VERSION);

        // The flag must not survive a round-trip to disk.
        let out = serde_json::to_string(&script).unwrap();
        assert!(!out.contains("skip_tts"));
    }

    #[test]
    fn intro_is_scheduled_last() {
        let mk = |index: usize, status: StageStatus| Chapter {
            index,
            title: format!("ch{index}"),
            slug: format!("ch{index}"),
            key_events: String::new(),
            scripture_range: String::new(),
            duration_target_secs: 0.0,
            status,
            audio_priority: BTreeMap::new(),
        };
        let mut project = Project {
            schema_version: SCHEMA_VERSION,
            slug: "p".into(),
            title: "P".into(),
            scripture_ref: String::new(),
            language: "en".into(),
            style_preset: String::new(),
            created_at: String::new(),
            target_duration_secs: 0.0,
            chapters: vec![
                mk(0, StageStatus::Uninitialized),
                mk(1, StageStatus::Uninitialized),
                mk(2, StageStatus::Uninitialized),
            ],
            status: String::new(),
        };

        assert_eq!(project.next_pending(), Some(1));
        project.chapter_mut(1).unwrap().status = StageStatus::Merged;
        assert_eq!(project.next_pending(), Some(2));
        project.chapter_mut(2).unwrap().status = StageStatus::Merged;
        assert_eq!(project.next_pending(), Some(0));
    }
}
