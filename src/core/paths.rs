use std::path::{Path, PathBuf};

/// Canonical on-disk layout for a project:
///
/// ```text
/// {data}/projects/{slug}/
///   project.json
///   character_timeline.json
///   character_visual_anchors.json
///   ch00_introduction/
///     script.json
///     scene_prompts.txt
///     intro_manual_map.json      (intro only)
///     intro_assembly_map.json    (intro only)
///     assets/   narration audio + subtitles
///     scenes/   externally supplied scene videos
///     clips/    rendered clips
///     chapter.mp4
///   ch01_.../
///   final/
///     master_{slug}.mp4
///     validation_report.json
/// ```
#[derive(Clone, Debug)]
pub struct ProjectPaths {
    pub slug: String,
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(base_dir: &str, slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            root: Path::new(base_dir).join("projects").join(slug),
        }
    }

    pub fn root(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    pub fn project_file(&self) -> String {
        self.join("project.json")
    }

    pub fn lock_file(&self) -> String {
        self.join("project.lock")
    }

    pub fn timeline_file(&self) -> String {
        self.join("character_timeline.json")
    }

    pub fn anchors_file(&self) -> String {
        self.join("character_visual_anchors.json")
    }

    pub fn final_dir(&self) -> String {
        self.join("final")
    }

    pub fn master_video(&self) -> String {
        self.path(&["final", &format!("master_{}.mp4", self.slug)])
    }

    pub fn report_file(&self) -> String {
        self.path(&["final", "validation_report.json"])
    }

    pub fn chapter(&self, index: usize, slug: &str) -> ChapterPaths {
        ChapterPaths {
            index,
            root: self.root.join(format!("ch{index:02}_{slug}")),
        }
    }

    fn join(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().to_string()
    }

    fn path(&self, parts: &[&str]) -> String {
        let mut p = self.root.clone();
        for part in parts {
            p = p.join(part);
        }
        p.to_string_lossy().to_string()
    }
}

#[derive(Clone, Debug)]
pub struct ChapterPaths {
    pub index: usize,
    root: PathBuf,
}

impl ChapterPaths {
    pub fn root(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    pub fn script_file(&self) -> String {
        self.join(&["script.json"])
    }

    pub fn prompts_file(&self) -> String {
        self.join(&["scene_prompts.txt"])
    }

    pub fn manual_map_file(&self) -> String {
        self.join(&["intro_manual_map.json"])
    }

    pub fn assembly_map_file(&self) -> String {
        self.join(&["intro_assembly_map.json"])
    }

    pub fn assets_dir(&self) -> String {
        self.join(&["assets"])
    }

    pub fn scenes_dir(&self) -> String {
        self.join(&["scenes"])
    }

    pub fn clips_dir(&self) -> String {
        self.join(&["clips"])
    }

    /// Narration audio for a scene, 1-based ordinal.
    pub fn audio_file(&self, scene: usize) -> String {
        self.join(&["assets", &format!("audio_{scene:03}.mp3")])
    }

    pub fn subtitle_file(&self, scene: usize) -> String {
        self.join(&["assets", &format!("audio_{scene:03}.vtt")])
    }

    /// Externally supplied (or assembled) scene video, canonical name.
    pub fn scene_video(&self, scene: usize) -> String {
        self.join(&["scenes", &format!("scene_{scene:03}.mp4")])
    }

    pub fn clip_file(&self, scene: usize) -> String {
        self.join(&["clips", &format!("clip_{scene:03}.mp4")])
    }

    pub fn chapter_video(&self) -> String {
        self.join(&["chapter.mp4"])
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut p = self.root.clone();
        for part in parts {
            p = p.join(part);
        }
        p.to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_layout_uses_zero_padded_names() {
        let proj = ProjectPaths::new("data", "david");
        let ch = proj.chapter(3, "the_anointing");

        assert!(ch.root().ends_with("ch03_the_anointing"));
        assert!(ch.scene_video(7).ends_with("scenes/scene_007.mp4"));
        assert!(ch.audio_file(12).ends_with("assets/audio_012.mp3"));
        assert!(ch.clip_file(1).ends_with("clips/clip_001.mp4"));
        assert!(proj.master_video().ends_with("final/master_david.mp4"));
    }
}
