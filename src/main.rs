use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::sync::Arc;

use storyreel::core::config::Config;
use storyreel::core::io::{NativeStorage, Storage};
use storyreel::core::state::{AudioMode, StageStatus};
use storyreel::services::audio::{AudioPriorityResolver, SceneSelector};
use storyreel::services::llm::create_llm;
use storyreel::services::pipeline::{ChapterOutcome, ChapterPipeline, Collaborators};
use storyreel::services::render::FfmpegRenderer;
use storyreel::services::script::LlmScriptSource;
use storyreel::services::store::{ChapterPlan, ProjectStateStore};
use storyreel::services::tts::create_synth;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM and TTS settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create") => {
            let plan = args.get(1).ok_or_else(|| anyhow!("usage: {USAGE}"))?;
            create_project(&config, plan).await
        }
        Some("run") => {
            let slug = args.get(1).ok_or_else(|| anyhow!("usage: {USAGE}"))?;
            let force = args.iter().any(|a| a == "--force");
            run_project(&config, slug, force, false).await
        }
        Some("resume") => {
            let slug = args.get(1).ok_or_else(|| anyhow!("usage: {USAGE}"))?;
            run_project(&config, slug, false, true).await
        }
        Some("validate") => {
            let slug = args.get(1).ok_or_else(|| anyhow!("usage: {USAGE}"))?;
            validate_project(&config, slug).await
        }
        Some("audio") => set_audio_priority(&config, &args[1..]).await,
        _ => {
            eprintln!("usage: {USAGE}");
            Ok(())
        }
    }
}

const USAGE: &str = "storyreel <create plan.yml | run <slug> [--force] | resume <slug> | \
                     validate <slug> | audio <slug> <chapter> <scenes> <mode>>";

#[derive(Deserialize)]
struct ProjectPlan {
    title: String,
    #[serde(default)]
    scripture_ref: String,
    chapters: Vec<PlanChapter>,
}

#[derive(Deserialize)]
struct PlanChapter {
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    key_events: String,
    #[serde(default)]
    scripture_range: String,
    #[serde(default)]
    duration_target_secs: f64,
}

async fn create_project(config: &Config, plan_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(plan_path)?;
    let plan: ProjectPlan = serde_yaml_ng::from_str(&content)?;
    if plan.chapters.is_empty() {
        bail!("the plan has no chapters");
    }

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let store = ProjectStateStore::create(
        storage,
        &config.data_folder,
        &plan.title,
        &plan.scripture_ref,
        &config.language,
        &config.style_preset,
        plan.chapters
            .into_iter()
            .map(|c| ChapterPlan {
                title: c.title,
                slug: c.slug,
                key_events: c.key_events,
                scripture_range: c.scripture_range,
                duration_target_secs: c.duration_target_secs,
            })
            .collect(),
    )
    .await?;
    println!(
        "Created project '{}' with {} chapters",
        store.project().slug,
        store.project().chapters.len()
    );
    Ok(())
}

async fn build_pipeline(config: &Config, slug: &str, force: bool) -> Result<ChapterPipeline> {
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let store = ProjectStateStore::open(storage, &config.data_folder, slug).await?;

    let llm = create_llm(&config.llm)?;
    let ffmpeg = Arc::new(FfmpegRenderer::new(config.render.clone()));
    let collab = Collaborators {
        script: Arc::new(LlmScriptSource::new(llm, &config.style_preset)),
        tts: Arc::from(create_synth(&config.tts)?),
        renderer: ffmpeg.clone(),
        merger: ffmpeg.clone(),
        probe: Arc::new(storyreel::services::render::FfprobeProbe),
    };
    Ok(ChapterPipeline::new(store, collab).with_force(force))
}

async fn run_project(config: &Config, slug: &str, force: bool, resume: bool) -> Result<()> {
    let mut pipe = build_pipeline(config, slug, force).await?;
    if resume {
        pipe.verify_statuses().await?;
    }

    for index in pipe.chapter_order() {
        match pipe.process_chapter(index).await? {
            ChapterOutcome::Completed => {
                println!("Chapter {index}: merged");
            }
            ChapterOutcome::Waiting(reason) => {
                println!("Chapter {index}: waiting ({reason})");
                continue;
            }
        }

        if !config.unattended {
            let proceed = inquire::Confirm::new("Continue with the next chapter?")
                .with_default(true)
                .prompt()?;
            if !proceed {
                return Ok(());
            }
        }
    }

    let all_merged = pipe
        .store()
        .project()
        .chapters
        .iter()
        .all(|c| c.status == StageStatus::Merged);
    if all_merged {
        let master = pipe.merge_project().await?;
        println!("Master video: {master}");
    } else if let Some(next) = pipe.store().project().next_pending() {
        println!("Master not built; chapter {next} is still pending.");
    }
    Ok(())
}

async fn validate_project(config: &Config, slug: &str) -> Result<()> {
    let pipe = build_pipeline(config, slug, false).await?;
    let report = pipe.validate_project().await?;
    pipe.store()
        .write_json(&pipe.store().paths().report_file(), &report)
        .await?;

    for finding in &report.findings {
        println!(
            "[{:?}] {:?} chapter {:?} scene {:?}: {}",
            finding.severity, finding.category, finding.chapter, finding.scene, finding.message
        );
    }
    println!(
        "{} errors, {} warnings ({} chapters, {} scenes)",
        report.stats.errors,
        report.stats.warnings,
        report.stats.chapters_checked,
        report.stats.scenes_checked
    );
    if !report.passed() {
        bail!("validation failed");
    }
    Ok(())
}

async fn set_audio_priority(config: &Config, args: &[String]) -> Result<()> {
    let [slug, chapter, scenes, mode] = args else {
        bail!("usage: {USAGE}");
    };
    let chapter: usize = chapter.parse()?;
    let selector = SceneSelector::parse(scenes)?;
    let mode = match mode.as_str() {
        "narration" => AudioMode::Narration,
        "original" => AudioMode::Original,
        "blend" => AudioMode::Blend,
        other => bail!("unknown audio mode '{other}'; use narration, original or blend"),
    };

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let mut store = ProjectStateStore::open(storage, &config.data_folder, slug).await?;
    let script = store.load_script(chapter).await?;

    let mut changed = Vec::new();
    store
        .update_chapter(chapter, |ch| {
            changed = AudioPriorityResolver::apply(ch, &script, &selector, mode);
        })
        .await?;
    println!("Updated {} scene(s): {:?}", changed.len(), changed);
    Ok(())
}
