use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::io::Storage;

/// One planned rename, original name to canonical name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
    pub index: usize,
}

/// Rewrites externally supplied scene videos to the canonical
/// `scene_{index:03}.{ext}` form. The whole batch is planned before any file
/// is touched: an unparseable name or two names claiming the same ordinal
/// abort the run with nothing renamed. Guessing here would silently pair the
/// wrong video with a narration track.
pub struct SceneNormalizer {
    storage: Arc<dyn Storage>,
}

impl SceneNormalizer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Normalize every video file in `dir`. Returns the renames performed,
    /// sorted by scene ordinal. Already-canonical names pass through.
    pub async fn normalize_dir(&self, dir: &str) -> Result<Vec<Rename>> {
        let mut names = self.storage.list(dir).await?;
        names.retain(|n| is_video(n));
        let plan = plan_renames(&names)?;

        for rename in &plan {
            if rename.from == rename.to {
                continue;
            }
            let from = Path::new(dir).join(&rename.from);
            let to = Path::new(dir).join(&rename.to);
            self.storage
                .copy(&from.to_string_lossy(), &to.to_string_lossy())
                .await?;
            self.storage.delete(&from.to_string_lossy()).await?;
            log::info!("Normalized {} -> {}", rename.from, rename.to);
        }
        Ok(plan)
    }
}

fn is_video(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".mp4", ".mov", ".webm", ".mkv"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Compute the full rename plan or fail. Input order does not matter; the
/// plan is keyed by extracted ordinal.
pub fn plan_renames(names: &[String]) -> Result<Vec<Rename>> {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();

    let mut by_index: BTreeMap<usize, Rename> = BTreeMap::new();
    for name in sorted {
        let index = extract_scene_index(name).ok_or_else(|| PipelineError::AmbiguousFilename {
            filename: name.clone(),
        })?;
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .context("video file without extension")?;
        let rename = Rename {
            from: name.clone(),
            to: format!("scene_{index:03}.{ext}"),
            index,
        };
        if let Some(existing) = by_index.get(&index) {
            return Err(PipelineError::FilenameCollision {
                first: existing.from.clone(),
                second: name.clone(),
                index,
            }
            .into());
        }
        by_index.insert(index, rename);
    }

    // The delivered batch must cover the ordinals 1..N exactly; a gap means
    // a scene is missing and the batch is not ready to normalize.
    for (expected, (found, _)) in (1..).zip(by_index.iter()) {
        if *found != expected {
            anyhow::bail!(
                "scene batch has a gap: expected scene {expected}, found scene {found}"
            );
        }
    }
    Ok(by_index.into_values().collect())
}

/// Extract the scene ordinal from a delivered filename.
///
/// Preference order: the number following the rightmost "scene" token, then
/// the rightmost digit run that is not resolution or codec metadata
/// (`1080p`, `4k`, `x264`). A name with no usable number yields `None`.
pub fn extract_scene_index(name: &str) -> Option<usize> {
    let stem = Path::new(name).file_stem()?.to_string_lossy().to_lowercase();
    let bytes = stem.as_bytes();

    if let Some(idx) = index_after_scene_token(&stem) {
        return Some(idx);
    }

    // Rightmost plausible digit run.
    let mut end = bytes.len();
    while end > 0 {
        if !bytes[end - 1].is_ascii_digit() {
            end -= 1;
            continue;
        }
        let mut start = end;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if !is_metadata_run(bytes, start, end) {
            return stem[start..end].parse().ok();
        }
        end = start;
    }
    None
}

fn index_after_scene_token(stem: &str) -> Option<usize> {
    let bytes = stem.as_bytes();
    let mut best = None;
    let mut search = 0;
    while let Some(pos) = stem[search..].find("scene") {
        let mut i = search + pos + "scene".len();
        search = search + pos + 1;
        while i < bytes.len() && matches!(bytes[i], b'_' | b'-' | b' ' | b'.') {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            best = stem[start..i].parse().ok();
        }
    }
    best
}

/// A digit run immediately followed by `p`/`k` (resolution) or immediately
/// preceded by `x`/`h` (codec names like x264, h265) is not a scene ordinal.
fn is_metadata_run(bytes: &[u8], start: usize, end: usize) -> bool {
    let next_is_word = |b: u8| matches!(b, b'p' | b'k');
    let prev_is_codec = |b: u8| matches!(b, b'x' | b'h');
    let followed = end < bytes.len()
        && next_is_word(bytes[end])
        && (end + 1 == bytes.len() || !bytes[end + 1].is_ascii_alphanumeric());
    let preceded = start > 0
        && prev_is_codec(bytes[start - 1])
        && (start < 2 || !bytes[start - 2].is_ascii_alphanumeric());
    followed || preceded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scene_token_wins_over_other_numbers() {
        assert_eq!(extract_scene_index("Genesis_Scene_12_1080p.mp4"), Some(12));
        assert_eq!(extract_scene_index("scene3.mp4"), Some(3));
        assert_eq!(extract_scene_index("ch02_scene-007_final.mp4"), Some(7));
    }

    #[test]
    fn rightmost_run_skips_resolution_and_codec() {
        assert_eq!(extract_scene_index("take_05_4k.mp4"), Some(5));
        assert_eq!(extract_scene_index("valley_009_x264.mp4"), Some(9));
        assert_eq!(extract_scene_index("03_the_valley.mp4"), Some(3));
    }

    #[test]
    fn unnumbered_names_are_ambiguous() {
        assert_eq!(extract_scene_index("final_export.mp4"), None);
        assert_eq!(extract_scene_index("render_1080p.mp4"), None);

        let err = plan_renames(&strings(&["final_export.mp4"])).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::AmbiguousFilename { filename }) => {
                assert_eq!(filename, "final_export.mp4");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_ordinals_collide() {
        let err =
            plan_renames(&strings(&["scene_2.mp4", "chapter_scene-002_v2.mp4"])).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::FilenameCollision { index, .. }) => assert_eq!(*index, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn gapped_batches_are_rejected() {
        let err = plan_renames(&strings(&["scene_1.mp4", "scene_3.mp4"])).unwrap_err();
        assert!(err.to_string().contains("expected scene 2"));
    }

    #[test]
    fn canonical_names_pass_through() {
        let plan = plan_renames(&strings(&["scene_001.mp4", "scene_002.mp4"])).unwrap();
        assert!(plan.iter().all(|r| r.from == r.to));
    }

    #[tokio::test]
    async fn batch_rename_is_a_bijection() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        for name in ["Scene_2_draft.mp4", "clip_scene_1.mp4", "ch01_003_4k.mp4"] {
            storage
                .write(&dir.path().join(name).to_string_lossy(), b"x")
                .await?;
        }

        let normalizer = SceneNormalizer::new(storage.clone());
        let plan = normalizer.normalize_dir(&root).await?;

        assert_eq!(
            plan.iter().map(|r| r.to.as_str()).collect::<Vec<_>>(),
            vec!["scene_001.mp4", "scene_002.mp4", "scene_003.mp4"]
        );
        let listed = storage.list(&root).await?;
        assert_eq!(listed, vec!["scene_001.mp4", "scene_002.mp4", "scene_003.mp4"]);
        Ok(())
    }
}
