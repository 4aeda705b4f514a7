use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::paths::ProjectPaths;
use crate::core::state::{
    AudioMode, Project, Script, StageStatus, DURATION_TOLERANCE, MAX_NARRATION_WORDS,
    MAX_SCENE_SECS,
};
use crate::services::audio::AudioPriorityResolver;
use crate::services::timeline::CharacterTimeline;
use crate::utils::text::word_count;

/// Two character ids at least this similar (and not equal) are flagged as a
/// probable misspelling of one character.
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.93;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FileIntegrity,
    Duration,
    Continuity,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<usize>,
    pub message: String,
}

/// Always recomputed from the current chapter and scene data, never carried
/// over from a previous report on disk.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AggregateStats {
    pub chapters_checked: usize,
    pub scenes_checked: usize,
    pub errors: usize,
    pub warnings: usize,
    pub over_duration_scenes: usize,
    pub missing_files: usize,
    pub scripted_duration_secs: f64,
    /// Scripted duration per chapter, seconds.
    pub chapter_durations: BTreeMap<usize, f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub stats: AggregateStats,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.stats.errors == 0
    }

    pub fn first_error(&self) -> Option<&Finding> {
        self.findings.iter().find(|f| f.severity == Severity::Error)
    }

    fn push(
        &mut self,
        severity: Severity,
        category: Category,
        chapter: Option<usize>,
        scene: Option<usize>,
        message: String,
    ) {
        match severity {
            Severity::Error => self.stats.errors += 1,
            Severity::Warning => self.stats.warnings += 1,
        }
        self.findings.push(Finding {
            severity,
            category,
            chapter,
            scene,
            message,
        });
    }
}

/// Project-wide quality gate run before rendering and before the final
/// merge. File checks adapt to each chapter's stage: a chapter that has not
/// generated assets yet is not faulted for missing audio.
pub struct Validator {
    storage: Arc<dyn Storage>,
}

impl Validator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn validate_project(
        &self,
        project: &Project,
        paths: &ProjectPaths,
        scripts: &BTreeMap<usize, Script>,
        timeline: &CharacterTimeline,
    ) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();

        for chapter in &project.chapters {
            let Some(script) = scripts.get(&chapter.index) else {
                continue;
            };
            report.stats.chapters_checked += 1;
            report.stats.scenes_checked += script.scenes.len();

            self.check_durations(&mut report, chapter, script);
            if chapter.status >= StageStatus::AssetsGenerated {
                self.check_assets(&mut report, chapter, script, paths).await?;
            }
            if chapter.status >= StageStatus::ScenesNormalized {
                self.check_scene_videos(&mut report, chapter, script, paths)
                    .await?;
            }
        }

        self.check_continuity(&mut report, scripts, timeline);
        log::info!(
            "Validation: {} errors, {} warnings across {} chapters",
            report.stats.errors,
            report.stats.warnings,
            report.stats.chapters_checked
        );
        Ok(report)
    }

    fn check_durations(
        &self,
        report: &mut ValidationReport,
        chapter: &crate::core::state::Chapter,
        script: &Script,
    ) {
        let mut total = 0.0;
        for scene in &script.scenes {
            total += scene.duration_secs;
            // Strictly greater: a scene at exactly the limit is fine.
            if scene.duration_secs > MAX_SCENE_SECS {
                report.stats.over_duration_scenes += 1;
                report.push(
                    Severity::Error,
                    Category::Duration,
                    Some(chapter.index),
                    Some(scene.index),
                    format!(
                        "scene duration {:.2}s exceeds the {MAX_SCENE_SECS:.0}s limit",
                        scene.duration_secs
                    ),
                );
            }
            let words = word_count(&scene.narration);
            if words > MAX_NARRATION_WORDS {
                report.push(
                    Severity::Error,
                    Category::Duration,
                    Some(chapter.index),
                    Some(scene.index),
                    format!("narration has {words} words, limit is {MAX_NARRATION_WORDS}"),
                );
            }
        }
        report.stats.scripted_duration_secs += total;
        report.stats.chapter_durations.insert(chapter.index, total);

        if chapter.duration_target_secs > 0.0 {
            let deviation = (total - chapter.duration_target_secs).abs()
                / chapter.duration_target_secs;
            if deviation > DURATION_TOLERANCE {
                report.push(
                    Severity::Warning,
                    Category::Duration,
                    Some(chapter.index),
                    None,
                    format!(
                        "scripted {:.1}s vs target {:.1}s ({:.0}% off)",
                        total,
                        chapter.duration_target_secs,
                        deviation * 100.0
                    ),
                );
            }
        }
    }

    async fn check_assets(
        &self,
        report: &mut ValidationReport,
        chapter: &crate::core::state::Chapter,
        script: &Script,
        paths: &ProjectPaths,
    ) -> Result<()> {
        let ch_paths = paths.chapter(chapter.index, &chapter.slug);
        let mut narrated = 0usize;
        for scene in &script.scenes {
            // Original-audio scenes never had narration synthesized.
            if AudioPriorityResolver::resolve(chapter, scene) == AudioMode::Original {
                continue;
            }
            narrated += 1;
            let audio = ch_paths.audio_file(scene.index);
            if !self.storage.exists(&audio).await? {
                report.stats.missing_files += 1;
                report.push(
                    Severity::Error,
                    Category::FileIntegrity,
                    Some(chapter.index),
                    Some(scene.index),
                    format!("narration audio missing: {audio}"),
                );
            } else if self.storage.size(&audio).await? == 0 {
                report.push(
                    Severity::Error,
                    Category::FileIntegrity,
                    Some(chapter.index),
                    Some(scene.index),
                    format!("narration audio is empty: {audio}"),
                );
            }
            let subtitle = ch_paths.subtitle_file(scene.index);
            if !self.storage.exists(&subtitle).await? {
                report.stats.missing_files += 1;
                report.push(
                    Severity::Error,
                    Category::FileIntegrity,
                    Some(chapter.index),
                    Some(scene.index),
                    format!("subtitle file missing: {subtitle}"),
                );
            }
        }

        // Stray files matter too: one audio and one subtitle per narrated
        // scene, no more and no less.
        let listed = self.storage.list(&ch_paths.assets_dir()).await.unwrap_or_default();
        let audio_files = listed.iter().filter(|n| n.ends_with(".mp3")).count();
        let subtitle_files = listed.iter().filter(|n| n.ends_with(".vtt")).count();
        if audio_files != narrated || subtitle_files != narrated {
            report.push(
                Severity::Error,
                Category::FileIntegrity,
                Some(chapter.index),
                None,
                format!(
                    "{narrated} narrated scenes but {audio_files} audio and {subtitle_files} subtitle files on disk"
                ),
            );
        }
        Ok(())
    }

    async fn check_scene_videos(
        &self,
        report: &mut ValidationReport,
        chapter: &crate::core::state::Chapter,
        script: &Script,
        paths: &ProjectPaths,
    ) -> Result<()> {
        let ch_paths = paths.chapter(chapter.index, &chapter.slug);
        for scene in &script.scenes {
            let video = ch_paths.scene_video(scene.index);
            if !self.storage.exists(&video).await? {
                report.stats.missing_files += 1;
                report.push(
                    Severity::Error,
                    Category::FileIntegrity,
                    Some(chapter.index),
                    Some(scene.index),
                    format!("scene video missing: {video}"),
                );
            }
        }

        let listed = self.storage.list(&ch_paths.scenes_dir()).await.unwrap_or_default();
        let videos = listed.iter().filter(|n| n.ends_with(".mp4")).count();
        if videos != script.scenes.len() {
            report.push(
                Severity::Error,
                Category::FileIntegrity,
                Some(chapter.index),
                None,
                format!(
                    "{} scene videos on disk but the script has {} scenes",
                    videos,
                    script.scenes.len()
                ),
            );
        }
        Ok(())
    }

    /// Cross-chapter character checks: probable id misspellings and
    /// appearances after a recorded death. A posthumous appearance is
    /// allowed when the scene is framed as a flashback, dream, vision or
    /// resurrection.
    fn check_continuity(
        &self,
        report: &mut ValidationReport,
        scripts: &BTreeMap<usize, Script>,
        timeline: &CharacterTimeline,
    ) {
        let ids: Vec<&String> = timeline.characters.keys().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let similarity = strsim::jaro_winkler(a, b);
                if similarity >= NEAR_DUPLICATE_THRESHOLD {
                    report.push(
                        Severity::Warning,
                        Category::Continuity,
                        None,
                        None,
                        format!(
                            "character ids {a:?} and {b:?} are {similarity:.2} similar; probable misspelling"
                        ),
                    );
                }
            }
        }

        for (id, span) in &timeline.characters {
            let Some(death) = span.dies_in_chapter else {
                continue;
            };
            for appearance in &span.appearances {
                if appearance.chapter <= death {
                    continue;
                }
                let exempt = scripts
                    .get(&appearance.chapter)
                    .and_then(|s| s.scenes.iter().find(|sc| sc.index == appearance.scene))
                    .map(|sc| {
                        let upper = sc.narration.to_uppercase();
                        // RESURRECT also matches "resurrected" and
                        // "resurrection".
                        ["FLASHBACK", "VISION", "DREAM", "RESURRECT"]
                            .iter()
                            .any(|m| upper.contains(m))
                    })
                    .unwrap_or(false);
                if !exempt {
                    report.push(
                        Severity::Warning,
                        Category::Continuity,
                        Some(appearance.chapter),
                        Some(appearance.scene),
                        format!("{id} appears after dying in chapter {death}"),
                    );
                }
            }
        }
    }
}
