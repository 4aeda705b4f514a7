use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::state::{AudioMode, Script, StageStatus};
use crate::services::audio::AudioPriorityResolver;
use crate::services::matcher::{Assignment, SceneAssemblyMatcher, SourceScene, TargetScene};
use crate::services::normalize::SceneNormalizer;
use crate::services::render::{MediaProbe, Merger, RenderRequest, Renderer};
use crate::services::script::{format_scene_prompts, ScriptSource};
use crate::services::store::ProjectStateStore;
use crate::services::timeline::{CharacterTimeline, EraPhase, VisualAnchorStore};
use crate::services::tts::{preprocess_narration, NarrationSynth};
use crate::services::validate::{ValidationReport, Validator};
use crate::utils::text::extract_keywords;

/// External collaborators the pipeline drives. Everything that talks to a
/// network or spawns a process sits behind one of these.
pub struct Collaborators {
    pub script: Arc<dyn ScriptSource>,
    pub tts: Arc<dyn NarrationSynth>,
    pub renderer: Arc<dyn Renderer>,
    pub merger: Arc<dyn Merger>,
    pub probe: Arc<dyn MediaProbe>,
}

/// What `process_chapter` achieved for one chapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// The chapter reached `merged`.
    Completed,
    /// Progress stopped on an external input; the reason says which.
    Waiting(String),
}

/// Persisted record of how the intro was assembled, one entry per intro
/// scene with the scoring that picked its footage.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IntroAssemblyMap {
    pub assignments: Vec<Assignment>,
}

/// Drives one chapter at a time through the stage ladder, persisting status
/// only after the stage's artifacts are safely on disk. Every step is
/// re-runnable: finished work is detected and skipped, so a crashed or
/// interrupted run continues from the last confirmed stage.
pub struct ChapterPipeline {
    store: ProjectStateStore,
    collab: Collaborators,
    force: bool,
}

impl ChapterPipeline {
    pub fn new(store: ProjectStateStore, collab: Collaborators) -> Self {
        Self {
            store,
            collab,
            force: false,
        }
    }

    /// Regenerate artifacts even when they already exist on disk.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn store(&self) -> &ProjectStateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProjectStateStore {
        &mut self.store
    }

    /// Chapters in production order: content chapters ascending, the
    /// derived intro last.
    pub fn chapter_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .store
            .project()
            .chapters
            .iter()
            .map(|c| c.index)
            .filter(|i| *i != 0)
            .collect();
        order.sort_unstable();
        if self.store.project().chapter(0).is_some() {
            order.push(0);
        }
        order
    }

    /// Advance one chapter as far as its inputs allow.
    pub async fn process_chapter(&mut self, index: usize) -> Result<ChapterOutcome> {
        loop {
            let status = self.store.chapter(index)?.status;
            match status {
                StageStatus::Uninitialized => self.advance_script(index).await?,
                StageStatus::ScriptGenerated => self.advance_assets(index).await?,
                StageStatus::AssetsGenerated => {
                    self.store
                        .set_status(index, StageStatus::AwaitingExternalVideo)
                        .await?;
                }
                StageStatus::AwaitingExternalVideo => {
                    if self.scene_videos_delivered(index).await? {
                        // Hand-delivered footage wins over auto-assembly.
                        self.normalize_scenes(index).await?;
                    } else if self.store.chapter(index)?.is_intro() {
                        if let Some(unmerged) = self.first_unmerged_content_chapter() {
                            return Ok(ChapterOutcome::Waiting(format!(
                                "intro assembly needs every content chapter merged; \
                                 chapter {unmerged} is not"
                            )));
                        }
                        self.assemble_intro(index).await?;
                    } else {
                        return Ok(ChapterOutcome::Waiting(
                            "no scene videos delivered yet".to_string(),
                        ));
                    }
                }
                StageStatus::AutoAssembled => self.normalize_scenes(index).await?,
                StageStatus::ScenesNormalized => {
                    self.quality_gate(index).await?;
                    self.render_chapter(index).await?;
                }
                StageStatus::Rendered => self.merge_chapter(index).await?,
                StageStatus::Merged => return Ok(ChapterOutcome::Completed),
            }
        }
    }

    /// Generate the chapter script and scene prompts, then refresh the
    /// character timeline and visual anchors that depend on it.
    pub async fn advance_script(&mut self, index: usize) -> Result<()> {
        if !self.force && self.store.script_exists(index).await? {
            log::info!("Chapter {index}: script already exists, skipping generation");
            self.store
                .set_status(index, StageStatus::ScriptGenerated)
                .await?;
            return Ok(());
        }

        let (project, chapter) = (self.store.project().clone(), self.store.chapter(index)?.clone());
        let generated = self
            .collab
            .script
            .generate(&project, &chapter)
            .await
            .with_context(|| format!("script generation failed for chapter {index}"))?;

        let paths = self.store.chapter_paths(index)?;
        self.store.save_script(index, &generated.script).await?;
        self.store
            .storage()
            .write_atomic(
                &paths.prompts_file(),
                format_scene_prompts(&generated).as_bytes(),
            )
            .await?;

        self.refresh_character_docs().await?;
        self.store
            .set_status(index, StageStatus::ScriptGenerated)
            .await
    }

    /// Synthesize narration audio and subtitles for every scene that needs
    /// them, with bounded concurrency. Scenes whose audio mode is
    /// `original` are skipped entirely.
    pub async fn advance_assets(&mut self, index: usize) -> Result<()> {
        let chapter = self.store.chapter(index)?.clone();
        let script = self.store.load_script(index).await?;
        let paths = self.store.chapter_paths(index)?;
        let language = self.store.project().language.clone();

        let mut jobs = Vec::new();
        for scene in &script.scenes {
            if AudioPriorityResolver::resolve(&chapter, scene) == AudioMode::Original {
                continue;
            }
            let audio_path = paths.audio_file(scene.index);
            if !self.force && self.store.storage().exists(&audio_path).await? {
                continue;
            }
            jobs.push((scene.index, scene.narration.clone()));
        }

        if !jobs.is_empty() {
            let pb = progress_bar(jobs.len() as u64, &format!("narration ch{index:02}"));
            let tts = Arc::clone(&self.collab.tts);
            let concurrency = tts.max_concurrency();
            let mut stream = futures_util::stream::iter(jobs.into_iter().map(|(ordinal, text)| {
                let tts = Arc::clone(&tts);
                let language = language.clone();
                async move {
                    let asset = tts
                        .synthesize(&preprocess_narration(&text), &language)
                        .await
                        .with_context(|| format!("narration synthesis failed for scene {ordinal}"))?;
                    Ok::<_, anyhow::Error>((ordinal, asset))
                }
            }))
            .buffer_unordered(concurrency);

            while let Some(result) = stream.next().await {
                let (ordinal, asset) = result?;
                self.store
                    .storage()
                    .write_atomic(&paths.audio_file(ordinal), &asset.audio)
                    .await?;
                self.store
                    .storage()
                    .write_atomic(&paths.subtitle_file(ordinal), asset.subtitle.as_bytes())
                    .await?;
                pb.inc(1);
            }
            pb.finish_and_clear();
        }

        self.store
            .set_status(index, StageStatus::AssetsGenerated)
            .await
    }

    async fn scene_videos_delivered(&self, index: usize) -> Result<bool> {
        let paths = self.store.chapter_paths(index)?;
        let dir = paths.scenes_dir();
        if !self.store.storage().exists(&dir).await? {
            return Ok(false);
        }
        let names = self.store.storage().list(&dir).await?;
        Ok(names.iter().any(|n| n.to_lowercase().ends_with(".mp4")))
    }

    /// Canonicalize delivered filenames, then take measured durations from
    /// the footage itself. Script durations were planning estimates until
    /// real media existed.
    pub async fn normalize_scenes(&mut self, index: usize) -> Result<()> {
        let paths = self.store.chapter_paths(index)?;
        let normalizer = SceneNormalizer::new(Arc::clone(self.store.storage()));
        normalizer.normalize_dir(&paths.scenes_dir()).await?;

        let mut script = self.store.load_script(index).await?;
        for scene in &mut script.scenes {
            let video = paths.scene_video(scene.index);
            if self.store.storage().exists(&video).await? {
                scene.duration_secs = self.collab.probe.duration_secs(&video).await?;
            }
        }
        self.store.save_script(index, &script).await?;

        self.store
            .set_status(index, StageStatus::ScenesNormalized)
            .await
    }

    /// Run the validator across the whole project and persist the report.
    /// Errors anywhere stop the run; a broken earlier chapter must not be
    /// baked into the final master.
    pub async fn quality_gate(&self, index: usize) -> Result<ValidationReport> {
        let report = self.validate_project().await?;
        self.store
            .write_json(&self.store.paths().report_file(), &report)
            .await?;
        if let Some(first) = report.first_error() {
            return Err(PipelineError::ValidationFailure {
                chapter: first.chapter.unwrap_or(index),
                count: report.stats.errors,
                first: first.message.clone(),
            }
            .into());
        }
        Ok(report)
    }

    pub async fn validate_project(&self) -> Result<ValidationReport> {
        let scripts = self.load_available_scripts().await?;
        let pairs = self.chapter_script_pairs(&scripts);
        let timeline = CharacterTimeline::build(&pairs, self.store.project().chapters.len());
        Validator::new(Arc::clone(self.store.storage()))
            .validate_project(self.store.project(), self.store.paths(), &scripts, &timeline)
            .await
    }

    /// Composite every scene's footage, narration and subtitles into clips.
    pub async fn render_chapter(&mut self, index: usize) -> Result<()> {
        let chapter = self.store.chapter(index)?.clone();
        let script = self.store.load_script(index).await?;
        let paths = self.store.chapter_paths(index)?;

        let pb = progress_bar(script.scenes.len() as u64, &format!("render ch{index:02}"));
        for scene in &script.scenes {
            let clip = paths.clip_file(scene.index);
            if !self.force && self.store.storage().exists(&clip).await? {
                pb.inc(1);
                continue;
            }
            let mode = AudioPriorityResolver::resolve(&chapter, scene);
            let request = RenderRequest {
                scene_video: paths.scene_video(scene.index),
                narration_audio: match mode {
                    AudioMode::Original => None,
                    _ => Some(paths.audio_file(scene.index)),
                },
                subtitle: match mode {
                    AudioMode::Original => None,
                    _ => Some(paths.subtitle_file(scene.index)),
                },
                output: clip,
                mode,
            };
            self.collab
                .renderer
                .render_scene(&request)
                .await
                .with_context(|| format!("render failed for chapter {index} scene {}", scene.index))?;
            pb.inc(1);
        }
        pb.finish_and_clear();

        self.store.set_status(index, StageStatus::Rendered).await
    }

    /// Concatenate the chapter's clips into `chapter.mp4`.
    pub async fn merge_chapter(&mut self, index: usize) -> Result<()> {
        let script = self.store.load_script(index).await?;
        let paths = self.store.chapter_paths(index)?;

        let clips: Vec<String> = script
            .scenes
            .iter()
            .map(|s| paths.clip_file(s.index))
            .collect();
        if clips.is_empty() {
            bail!("chapter {index} has no clips to merge");
        }
        self.collab
            .merger
            .concat(&clips, &paths.chapter_video())
            .await?;

        self.store.set_status(index, StageStatus::Merged).await
    }

    fn first_unmerged_content_chapter(&self) -> Option<usize> {
        self.store
            .project()
            .chapters
            .iter()
            .filter(|c| !c.is_intro() && !c.slug.contains("outro"))
            .find(|c| c.status != StageStatus::Merged)
            .map(|c| c.index)
    }

    /// Fill the intro's scene slots with the best-matching footage from the
    /// merged content chapters, manual overrides first. Winning footage is
    /// copied under the canonical scene name and the scored assignment map
    /// is persisted for review.
    pub async fn assemble_intro(&mut self, index: usize) -> Result<()> {
        let intro_script = self.store.load_script(index).await?;
        let targets: Vec<TargetScene> = intro_script
            .scenes
            .iter()
            .map(with_keyword_fallback)
            .map(|s| TargetScene::from_scene(&s))
            .collect();

        let mut sources = Vec::new();
        for chapter in &self.store.project().chapters {
            if chapter.is_intro() || chapter.slug.contains("outro") {
                continue;
            }
            let script = self.store.load_script(chapter.index).await?;
            let ch_paths = self.store.chapter_paths(chapter.index)?;
            for scene in &script.scenes {
                let scene = with_keyword_fallback(scene);
                let footage = ch_paths.scene_video(scene.index);
                sources.push(SourceScene::from_scene(chapter.index, &scene, footage));
            }
        }
        if sources.is_empty() {
            bail!("no source scenes available for intro assembly");
        }

        let manual = self.store.load_manual_map(index).await?;
        let assignments = SceneAssemblyMatcher::new(&sources).resolve(&targets, &manual);
        if assignments.len() != targets.len() {
            let assigned: Vec<usize> = assignments.iter().map(|a| a.target_ordinal).collect();
            let missing = targets
                .iter()
                .map(|t| t.ordinal)
                .find(|o| !assigned.contains(o));
            bail!(
                "intro assembly left scene {:?} unassigned; check the manual map",
                missing
            );
        }

        let paths = self.store.chapter_paths(index)?;
        for assignment in &assignments {
            let source = sources
                .iter()
                .find(|s| {
                    s.chapter == assignment.source_chapter
                        && s.ordinal == assignment.source_ordinal
                })
                .with_context(|| {
                    format!(
                        "manual map points at chapter {} scene {} which has no footage",
                        assignment.source_chapter, assignment.source_ordinal
                    )
                })?;
            self.store
                .storage()
                .copy(&source.clip_path, &paths.scene_video(assignment.target_ordinal))
                .await?;
        }

        self.store
            .write_json(
                &paths.assembly_map_file(),
                &IntroAssemblyMap {
                    assignments: assignments.clone(),
                },
            )
            .await?;
        log::info!(
            "Intro assembled: {} scenes, {} manual",
            assignments.len(),
            assignments.iter().filter(|a| a.manual).count()
        );

        self.store
            .set_status(index, StageStatus::AutoAssembled)
            .await
    }

    /// Concatenate all chapter videos, intro first, into the master.
    pub async fn merge_project(&mut self) -> Result<String> {
        let project = self.store.project().clone();
        for chapter in &project.chapters {
            if chapter.status != StageStatus::Merged {
                bail!(
                    "chapter {} is '{}', not merged; cannot build the master",
                    chapter.index,
                    chapter.status.as_str()
                );
            }
        }

        let mut indices: Vec<usize> = project.chapters.iter().map(|c| c.index).collect();
        indices.sort_unstable();
        let mut videos = Vec::with_capacity(indices.len());
        for index in indices {
            videos.push(self.store.chapter_paths(index)?.chapter_video());
        }

        let master = self.store.paths().master_video();
        self.collab.merger.concat(&videos, &master).await?;

        let duration = self.collab.probe.duration_secs(&master).await?;
        log::info!(
            "Master video: {master} ({duration:.1}s, target {:.1}s)",
            project.target_duration_secs
        );

        self.store.set_project_status("complete").await?;
        Ok(master)
    }

    /// Check each chapter's recorded status against the artifacts that
    /// status implies. A status ahead of the disk is fatal.
    pub async fn verify_statuses(&self) -> Result<()> {
        for chapter in &self.store.project().chapters {
            let index = chapter.index;
            let status = chapter.status;
            let paths = self.store.chapter_paths(index)?;
            let mut required: Vec<String> = Vec::new();

            if status >= StageStatus::ScriptGenerated {
                required.push(paths.script_file());
            }
            if status >= StageStatus::AssetsGenerated && self.store.script_exists(index).await? {
                let script = self.store.load_script(index).await?;
                for scene in &script.scenes {
                    if AudioPriorityResolver::resolve(chapter, scene) != AudioMode::Original {
                        required.push(paths.audio_file(scene.index));
                    }
                }
                if status >= StageStatus::ScenesNormalized
                    || status == StageStatus::AutoAssembled
                {
                    for scene in &script.scenes {
                        required.push(paths.scene_video(scene.index));
                    }
                }
                if status >= StageStatus::Rendered {
                    for scene in &script.scenes {
                        required.push(paths.clip_file(scene.index));
                    }
                }
            }
            if status >= StageStatus::Merged {
                required.push(paths.chapter_video());
            }

            for path in required {
                if !self.store.storage().exists(&path).await? {
                    return Err(PipelineError::StateInconsistency {
                        chapter: index,
                        status: status.as_str().to_string(),
                        missing: path,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Rebuild the character timeline from all available scripts and
    /// generate visual anchors for characters that lack one. Existing
    /// anchors are never rewritten.
    async fn refresh_character_docs(&mut self) -> Result<()> {
        let scripts = self.load_available_scripts().await?;
        let pairs = self.chapter_script_pairs(&scripts);
        let timeline = CharacterTimeline::build(&pairs, self.store.project().chapters.len());
        self.store
            .write_json(&self.store.paths().timeline_file(), &timeline)
            .await?;

        let anchors_path = self.store.paths().anchors_file();
        let mut anchors: VisualAnchorStore =
            if self.store.storage().exists(&anchors_path).await? {
                self.store.read_json(&anchors_path).await?
            } else {
                VisualAnchorStore::default()
            };

        let total = self.store.project().chapters.len();
        let mut changed = false;
        for (chapter, script) in &pairs {
            let era = EraPhase::for_chapter(chapter.index, total);
            for scene in &script.scenes {
                for raw in &scene.characters {
                    if anchors.get(raw, era).is_some() {
                        continue;
                    }
                    let description = self
                        .collab
                        .script
                        .describe_character(raw, era, &scene.narration)
                        .await?;
                    changed |= anchors.ensure(raw, era, description);
                }
            }
        }
        if changed {
            self.store.write_json(&anchors_path, &anchors).await?;
        }
        Ok(())
    }

    async fn load_available_scripts(&self) -> Result<BTreeMap<usize, Script>> {
        let mut scripts = BTreeMap::new();
        for chapter in &self.store.project().chapters {
            if self.store.script_exists(chapter.index).await? {
                scripts.insert(chapter.index, self.store.load_script(chapter.index).await?);
            }
        }
        Ok(scripts)
    }

    fn chapter_script_pairs(
        &self,
        scripts: &BTreeMap<usize, Script>,
    ) -> Vec<(crate::core::state::Chapter, Script)> {
        self.store
            .project()
            .chapters
            .iter()
            .filter_map(|c| scripts.get(&c.index).map(|s| (c.clone(), s.clone())))
            .collect()
    }
}

fn with_keyword_fallback(scene: &crate::core::state::Scene) -> crate::core::state::Scene {
    let mut scene = scene.clone();
    if scene.prompt_keywords.is_empty() {
        scene.prompt_keywords = extract_keywords(&scene.narration).into_iter().collect();
    }
    scene
}

fn progress_bar(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(message.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{NativeStorage, Storage};
    use crate::core::state::{Chapter, Project, Scene};
    use crate::services::script::GeneratedScript;
    use crate::services::store::ChapterPlan;
    use crate::services::tts::NarrationAsset;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockScript {
        calls: AtomicUsize,
    }

    impl MockScript {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScriptSource for MockScript {
        async fn generate(&self, _: &Project, chapter: &Chapter) -> Result<GeneratedScript> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scene = |index: usize, narration: &str, kw: &[&str]| Scene {
                index,
                narration: narration.to_string(),
                duration_secs: 5.0,
                characters: vec!["DAVID".to_string()],
                prompt_keywords: kw.iter().map(|s| s.to_string()).collect(),
                ..Scene::default()
            };
            let scenes = if chapter.is_intro() {
                vec![
                    scene(1, "A shepherd in the hills", &["shepherd", "hills"]),
                    scene(2, "A giant in the valley", &["giant", "valley"]),
                ]
            } else {
                vec![
                    scene(1, "The shepherd watches the hills", &["shepherd", "hills"]),
                    scene(2, "The giant roars in the valley", &["giant", "valley"]),
                ]
            };
            Ok(GeneratedScript {
                script: Script {
                    schema_version: crate::core::state::SCHEMA_VERSION,
                    scenes,
                },
                scene_prompts: vec!["first prompt".into(), "second prompt".into()],
            })
        }
    }

    struct MockSynth;

    #[async_trait]
    impl NarrationSynth for MockSynth {
        async fn synthesize(&self, _: &str, _: &str) -> Result<NarrationAsset> {
            Ok(NarrationAsset {
                audio: b"mp3".to_vec(),
                subtitle: "WEBVTT\n".to_string(),
            })
        }
    }

    fn touch(path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    struct FileRenderer;

    #[async_trait]
    impl Renderer for FileRenderer {
        async fn render_scene(&self, request: &RenderRequest) -> Result<()> {
            touch(&request.output, b"clip")
        }
    }

    struct FileMerger;

    #[async_trait]
    impl Merger for FileMerger {
        async fn concat(&self, clips: &[String], output: &str) -> Result<()> {
            touch(output, format!("{} parts", clips.len()).as_bytes())
        }
    }

    struct FixedProbe(f64);

    #[async_trait]
    impl MediaProbe for FixedProbe {
        async fn duration_secs(&self, _: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn plan(title: &str) -> ChapterPlan {
        ChapterPlan {
            title: title.to_string(),
            slug: None,
            key_events: String::new(),
            scripture_range: String::new(),
            duration_target_secs: 0.0,
        }
    }

    async fn pipeline(base: &str) -> Result<(ChapterPipeline, Arc<MockScript>)> {
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let store = ProjectStateStore::create(
            storage,
            base,
            "Shepherd King",
            "",
            "en",
            "pixar_disney",
            vec![plan("Introduction"), plan("The Valley")],
        )
        .await?;
        let script = MockScript::new();
        let collab = Collaborators {
            script: script.clone(),
            tts: Arc::new(MockSynth),
            renderer: Arc::new(FileRenderer),
            merger: Arc::new(FileMerger),
            probe: Arc::new(FixedProbe(5.0)),
        };
        Ok((ChapterPipeline::new(store, collab), script))
    }

    #[tokio::test]
    async fn content_chapter_runs_to_merged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let (mut pipe, _) = pipeline(&base).await?;

        // Stops waiting for delivered footage.
        let outcome = pipe.process_chapter(1).await?;
        assert!(matches!(outcome, ChapterOutcome::Waiting(_)));
        assert_eq!(
            pipe.store().chapter(1)?.status,
            StageStatus::AwaitingExternalVideo
        );
        let paths = pipe.store().chapter_paths(1)?;
        assert!(Path::new(&paths.audio_file(1)).exists());
        assert!(Path::new(&paths.subtitle_file(2)).exists());

        // Deliver messy filenames; the run should finish the chapter.
        touch(&format!("{}/Valley_Scene_1_4k.mp4", paths.scenes_dir()), b"v1")?;
        touch(&format!("{}/scene 2 final.mp4", paths.scenes_dir()), b"v2")?;

        let outcome = pipe.process_chapter(1).await?;
        assert_eq!(outcome, ChapterOutcome::Completed);
        assert!(Path::new(&paths.scene_video(1)).exists());
        assert!(Path::new(&paths.clip_file(2)).exists());
        assert!(Path::new(&paths.chapter_video()).exists());

        // Normalization replaced planning estimates with probed durations.
        let script = pipe.store().load_script(1).await?;
        assert!((script.scenes[0].duration_secs - 5.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn intro_waits_then_assembles_from_merged_chapters() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let (mut pipe, _) = pipeline(&base).await?;

        // The intro waits at the delivery gap until the content chapter is
        // merged.
        let outcome = pipe.process_chapter(0).await?;
        assert!(matches!(outcome, ChapterOutcome::Waiting(_)));
        assert_eq!(
            pipe.store().chapter(0)?.status,
            StageStatus::AwaitingExternalVideo
        );

        pipe.process_chapter(1).await?;
        let ch1 = pipe.store().chapter_paths(1)?;
        touch(&format!("{}/scene_001.mp4", ch1.scenes_dir()), b"v1")?;
        touch(&format!("{}/scene_002.mp4", ch1.scenes_dir()), b"v2")?;
        assert_eq!(pipe.process_chapter(1).await?, ChapterOutcome::Completed);

        assert_eq!(pipe.process_chapter(0).await?, ChapterOutcome::Completed);
        let intro = pipe.store().chapter_paths(0)?;
        assert!(Path::new(&intro.scene_video(1)).exists());
        assert!(Path::new(&intro.chapter_video()).exists());

        // The assembly map records a scored assignment per intro scene.
        let map: IntroAssemblyMap = pipe.store().read_json(&intro.assembly_map_file()).await?;
        assert_eq!(map.assignments.len(), 2);
        // Matching narrations and keywords line the scenes up one to one.
        assert_eq!(map.assignments[0].source_ordinal, 1);
        assert_eq!(map.assignments[1].source_ordinal, 2);

        let master = pipe.merge_project().await?;
        assert!(Path::new(&master).exists());
        assert_eq!(pipe.store().project().status, "complete");
        Ok(())
    }

    #[tokio::test]
    async fn delivered_intro_footage_preempts_assembly() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let (mut pipe, _) = pipeline(&base).await?;

        let outcome = pipe.process_chapter(0).await?;
        assert!(matches!(outcome, ChapterOutcome::Waiting(_)));

        // Hand-delivered intro footage is used as-is, even though the
        // content chapter is not merged and assembly is unavailable.
        let intro = pipe.store().chapter_paths(0)?;
        touch(&format!("{}/scene_001.mp4", intro.scenes_dir()), b"v1")?;
        touch(&format!("{}/scene_002.mp4", intro.scenes_dir()), b"v2")?;

        assert_eq!(pipe.process_chapter(0).await?, ChapterOutcome::Completed);
        assert!(Path::new(&intro.chapter_video()).exists());
        assert!(!Path::new(&intro.assembly_map_file()).exists());
        assert_eq!(std::fs::read(intro.scene_video(1))?, b"v1");
        Ok(())
    }

    #[tokio::test]
    async fn script_generation_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let (mut pipe, script) = pipeline(&base).await?;

        pipe.process_chapter(1).await?;
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);

        // A reset status finds the existing script and does not regenerate.
        pipe.store_mut()
            .set_status(1, StageStatus::Uninitialized)
            .await?;
        pipe.process_chapter(1).await?;
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn status_ahead_of_disk_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let (mut pipe, _) = pipeline(&base).await?;

        pipe.store_mut().set_status(1, StageStatus::Rendered).await?;
        let err = pipe.verify_statuses().await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::StateInconsistency { chapter, missing, .. }) => {
                assert_eq!(*chapter, 1);
                assert!(missing.ends_with("script.json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
