use anyhow::{bail, Result};

use crate::core::state::{AudioMode, Chapter, Scene, Script};

/// Which scenes a priority change applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SceneSelector {
    One(usize),
    Many(Vec<usize>),
    All,
}

impl SceneSelector {
    /// Parse "3", "1,4,7" or "all". Ordinals are 1-based.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("all") {
            return Ok(SceneSelector::All);
        }
        let mut ordinals = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            match part.parse::<usize>() {
                Ok(n) if n > 0 => ordinals.push(n),
                _ => bail!("invalid scene selector {raw:?}; expected e.g. \"3\", \"1,4,7\" or \"all\""),
            }
        }
        if ordinals.len() == 1 {
            Ok(SceneSelector::One(ordinals[0]))
        } else {
            Ok(SceneSelector::Many(ordinals))
        }
    }

    fn matches(&self, ordinal: usize) -> bool {
        match self {
            SceneSelector::One(n) => *n == ordinal,
            SceneSelector::Many(ns) => ns.contains(&ordinal),
            SceneSelector::All => true,
        }
    }
}

/// Decides the audio source for each rendered scene.
///
/// Precedence, highest first: the chapter-level override map, the mode
/// stored on the scene itself, then the narration default. The legacy
/// `skip_tts` flag never reaches this code; script loading migrates it.
pub struct AudioPriorityResolver;

impl AudioPriorityResolver {
    pub fn resolve(chapter: &Chapter, scene: &Scene) -> AudioMode {
        if let Some(mode) = chapter.audio_priority.get(&scene.index) {
            return *mode;
        }
        scene.audio_priority.unwrap_or_default()
    }

    /// Apply a mode to the selected scenes of a chapter. Re-applying the
    /// same selector and mode is a no-op; returns the ordinals changed.
    pub fn apply(
        chapter: &mut Chapter,
        script: &Script,
        selector: &SceneSelector,
        mode: AudioMode,
    ) -> Vec<usize> {
        let mut changed = Vec::new();
        for scene in &script.scenes {
            if !selector.matches(scene.index) {
                continue;
            }
            let prev = chapter.audio_priority.insert(scene.index, mode);
            if prev != Some(mode) {
                changed.push(scene.index);
            }
        }
        changed
    }
}
