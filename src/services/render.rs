use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::core::config::RenderConfig;
use crate::core::state::{AudioMode, BLEND_NARRATION_LEVEL, BLEND_ORIGINAL_LEVEL};

/// Render collaborator: composites one scene's video, narration audio and
/// subtitles into a clip, honoring the scene's audio-priority mode.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render_scene(&self, request: &RenderRequest) -> Result<()>;
}

/// Merge collaborator: concatenates finished clips into one video.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn concat(&self, clips: &[String], output: &str) -> Result<()>;
}

/// Media duration lookup, kept separate so the validator and pipeline can be
/// tested without media files on disk.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration_secs(&self, path: &str) -> Result<f64>;
}

pub struct RenderRequest {
    pub scene_video: String,
    pub narration_audio: Option<String>,
    pub subtitle: Option<String>,
    pub output: String,
    pub mode: AudioMode,
}

const SUBTITLE_STYLE: &str = "Fontname=Arial,FontSize=14,\
    PrimaryColour=&H80FFFFFF,OutlineColour=&H80000000,\
    BorderStyle=1,Outline=1,Shadow=0,Alignment=2,MarginV=20";

/// ffmpeg-backed reference implementation of all three collaborator traits.
pub struct FfmpegRenderer {
    cfg: RenderConfig,
}

impl FfmpegRenderer {
    pub fn new(cfg: RenderConfig) -> Self {
        Self { cfg }
    }

    fn video_filter(&self) -> String {
        let (fps, w, h) = (self.cfg.fps, self.cfg.width, self.cfg.height);
        format!(
            "fps={fps},setpts=N/({fps}*TB),\
             scale={w}:{h}:force_original_aspect_ratio=increase,\
             crop={w}:{h}:(ow-iw)/2:(oh-ih)/2[v]"
        )
    }

    async fn run_ffmpeg(args: &[String]) -> Result<()> {
        let output = Command::new("ffmpeg")
            .args(["-y", "-nostdin"])
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(6)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(anyhow!("ffmpeg failed: {tail}"));
        }
        Ok(())
    }

    async fn burn_subtitles(&self, input: &str, subtitle: &str, output: &str) -> Result<()> {
        let escaped = subtitle.replace('\\', "\\\\").replace(':', "\\:");
        Self::run_ffmpeg(&[
            "-i".into(),
            input.into(),
            "-vf".into(),
            format!("subtitles='{escaped}':force_style='{SUBTITLE_STYLE}'"),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            "-crf".into(),
            "18".into(),
            "-c:a".into(),
            "copy".into(),
            output.into(),
        ])
        .await
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render_scene(&self, request: &RenderRequest) -> Result<()> {
        ensure_parent(&request.output).await?;
        let temp = format!("{}.base.mp4", request.output);

        let mut args: Vec<String> = vec!["-i".into(), request.scene_video.clone()];
        let filter = match request.mode {
            AudioMode::Original => {
                // Keep the native audio track untouched.
                format!("[0:v]{}", self.video_filter())
            }
            AudioMode::Narration => {
                let audio = request
                    .narration_audio
                    .as_ref()
                    .ok_or_else(|| anyhow!("narration mode without narration audio"))?;
                args.push("-i".into());
                args.push(audio.clone());
                format!("[0:v]{}", self.video_filter())
            }
            AudioMode::Blend => {
                let audio = request
                    .narration_audio
                    .as_ref()
                    .ok_or_else(|| anyhow!("blend mode without narration audio"))?;
                args.push("-i".into());
                args.push(audio.clone());
                format!(
                    "[0:v]{};\
                     [0:a]volume={BLEND_ORIGINAL_LEVEL}[orig];\
                     [1:a]volume={BLEND_NARRATION_LEVEL}[narr];\
                     [orig][narr]amix=inputs=2:duration=longest[a]",
                    self.video_filter()
                )
            }
        };

        args.push("-filter_complex".into());
        args.push(filter);
        args.push("-map".into());
        args.push("[v]".into());
        match request.mode {
            AudioMode::Original => {
                args.push("-map".into());
                args.push("0:a?".into());
            }
            AudioMode::Narration => {
                args.push("-map".into());
                args.push("1:a".into());
            }
            AudioMode::Blend => {
                args.push("-map".into());
                args.push("[a]".into());
            }
        }
        args.extend(
            [
                "-c:v", "libx264", "-preset", "fast", "-crf", "18", "-c:a", "aac", "-b:a",
                "192k", "-shortest", "-pix_fmt", "yuv420p",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(temp.clone());

        Self::run_ffmpeg(&args).await?;

        match &request.subtitle {
            Some(subtitle) => {
                let result = self.burn_subtitles(&temp, subtitle, &request.output).await;
                let _ = tokio::fs::remove_file(&temp).await;
                result
            }
            None => {
                tokio::fs::rename(&temp, &request.output).await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Merger for FfmpegRenderer {
    async fn concat(&self, clips: &[String], output: &str) -> Result<()> {
        if clips.is_empty() {
            return Err(anyhow!("no clips to merge"));
        }
        ensure_parent(output).await?;

        let list_path = format!("{output}.concat.txt");
        let mut list = String::new();
        for clip in clips {
            list.push_str(&format!("file '{clip}'\n"));
        }
        tokio::fs::write(&list_path, list).await?;

        let result = Self::run_ffmpeg(&[
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.clone(),
            "-c".into(),
            "copy".into(),
            output.into(),
        ])
        .await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }
}

async fn ensure_parent(path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

pub struct FfprobeProbe;

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration_secs(&self, path: &str) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                path,
            ])
            .output()
            .await?;
        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {path}"));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.trim().parse::<f64>()?)
    }
}
