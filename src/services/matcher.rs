use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::core::state::{ManualAssignmentMap, Scene};
use crate::utils::text::{jaccard, similarity_ratio};

/// Relative weight of each signal in the combined score.
const NARRATION_WEIGHT: f64 = 0.40;
const CHARACTER_WEIGHT: f64 = 0.25;
const KEYWORD_WEIGHT: f64 = 0.35;

/// Subtracted from a candidate's score for every time it has already been
/// assigned in this run. Cumulative, so a third reuse costs more than a
/// second and the intro spreads across the whole production.
const REUSE_PENALTY: f64 = 0.3;

/// A scene that needs footage: one entry of the intro script.
#[derive(Clone, Debug)]
pub struct TargetScene {
    pub ordinal: usize,
    pub narration: String,
    pub characters: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

impl TargetScene {
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            ordinal: scene.index,
            narration: scene.narration.clone(),
            characters: normalized_set(&scene.characters),
            keywords: scene.prompt_keywords.iter().cloned().collect(),
        }
    }
}

/// A candidate source clip from an already-produced chapter.
#[derive(Clone, Debug)]
pub struct SourceScene {
    pub chapter: usize,
    pub ordinal: usize,
    pub narration: String,
    pub characters: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    /// Canonical path of the footage this candidate represents.
    pub clip_path: String,
}

impl SourceScene {
    pub fn from_scene(chapter: usize, scene: &Scene, clip_path: String) -> Self {
        Self {
            chapter,
            ordinal: scene.index,
            narration: scene.narration.clone(),
            characters: normalized_set(&scene.characters),
            keywords: scene.prompt_keywords.iter().cloned().collect(),
            clip_path,
        }
    }
}

fn normalized_set(items: &[String]) -> BTreeSet<String> {
    items.iter().map(|s| s.trim().to_uppercase()).collect()
}

/// Per-signal breakdown, persisted with the assignment so a human reviewing
/// the assembly map can see why a clip was chosen.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
pub struct SubScores {
    pub narration: f64,
    pub characters: f64,
    pub keywords: f64,
    pub reuse_penalty: f64,
}

impl SubScores {
    pub fn total(&self) -> f64 {
        NARRATION_WEIGHT * self.narration
            + CHARACTER_WEIGHT * self.characters
            + KEYWORD_WEIGHT * self.keywords
            - self.reuse_penalty
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Assignment {
    pub target_ordinal: usize,
    pub source_chapter: usize,
    pub source_ordinal: usize,
    pub manual: bool,
    pub scores: SubScores,
}

/// Pairs every intro scene with the best available clip from the produced
/// chapters. Manual overrides are applied first and count toward reuse, so
/// the computed matches route around clips a human already claimed.
pub struct SceneAssemblyMatcher<'a> {
    sources: &'a [SourceScene],
    uses: HashMap<(usize, usize), u32>,
}

impl<'a> SceneAssemblyMatcher<'a> {
    pub fn new(sources: &'a [SourceScene]) -> Self {
        Self {
            sources,
            uses: HashMap::new(),
        }
    }

    /// Resolve all targets. Every target gets an assignment as long as at
    /// least one source exists; a thin match with heavy reuse still beats
    /// leaving a hole in the intro.
    pub fn resolve(
        mut self,
        targets: &[TargetScene],
        manual: &ManualAssignmentMap,
    ) -> Vec<Assignment> {
        let mut out = Vec::with_capacity(targets.len());

        for target in targets {
            let Some(entry) = manual.entries.get(&target.ordinal) else {
                continue;
            };
            // Score before counting this use; the penalty covers prior
            // assignments only.
            let scores = self
                .sources
                .iter()
                .find(|s| s.chapter == entry.source_chapter && s.ordinal == entry.source_scene)
                .map(|s| self.score(target, s))
                .unwrap_or_default();
            *self
                .uses
                .entry((entry.source_chapter, entry.source_scene))
                .or_default() += 1;
            out.push(Assignment {
                target_ordinal: target.ordinal,
                source_chapter: entry.source_chapter,
                source_ordinal: entry.source_scene,
                manual: true,
                scores,
            });
        }

        for target in targets {
            if manual.entries.contains_key(&target.ordinal) {
                continue;
            }
            let Some((source, scores)) = self.best_match(target) else {
                continue;
            };
            *self.uses.entry((source.chapter, source.ordinal)).or_default() += 1;
            log::debug!(
                "Intro scene {} <- ch{} scene {} (score {:.3})",
                target.ordinal,
                source.chapter,
                source.ordinal,
                scores.total()
            );
            out.push(Assignment {
                target_ordinal: target.ordinal,
                source_chapter: source.chapter,
                source_ordinal: source.ordinal,
                manual: false,
                scores,
            });
        }

        out.sort_by_key(|a| a.target_ordinal);
        out
    }

    /// Best candidate for one target. Sources are iterated in ascending
    /// (chapter, ordinal) order and ties keep the earlier candidate, so the
    /// result is deterministic for identical inputs.
    fn best_match(&self, target: &TargetScene) -> Option<(&'a SourceScene, SubScores)> {
        let mut best: Option<(&SourceScene, SubScores)> = None;
        for source in self.sources {
            let scores = self.score(target, source);
            match &best {
                Some((_, held)) if scores.total() <= held.total() => {}
                _ => best = Some((source, scores)),
            }
        }
        best
    }

    fn score(&self, target: &TargetScene, source: &SourceScene) -> SubScores {
        let prior_uses = self
            .uses
            .get(&(source.chapter, source.ordinal))
            .copied()
            .unwrap_or(0);
        SubScores {
            narration: similarity_ratio(&target.narration, &source.narration),
            characters: jaccard(&target.characters, &source.characters),
            keywords: jaccard(&target.keywords, &source.keywords),
            reuse_penalty: REUSE_PENALTY * prior_uses as f64,
        }
    }
}
