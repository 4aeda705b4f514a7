use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::state::{Chapter, Script};

/// Coarse life phase of a character within the production, keyed by where a
/// chapter falls in the overall arc. Visual anchors are generated per phase
/// so a character ages consistently instead of drifting scene to scene.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EraPhase {
    Early,
    Middle,
    Late,
}

impl EraPhase {
    /// Phase of a content chapter. The intro (index 0) is excluded from the
    /// arc, so the first content chapter anchors the early phase.
    pub fn for_chapter(index: usize, total_chapters: usize) -> Self {
        let content = total_chapters.saturating_sub(1).max(1);
        let position = index.saturating_sub(1);
        match position * 3 / content {
            0 => EraPhase::Early,
            1 => EraPhase::Middle,
            _ => EraPhase::Late,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EraPhase::Early => "early",
            EraPhase::Middle => "middle",
            EraPhase::Late => "late",
        }
    }

    /// Rough age wording fed into generation prompts.
    pub fn age_hint(&self) -> &'static str {
        match self {
            EraPhase::Early => "young",
            EraPhase::Middle => "adult",
            EraPhase::Late => "old",
        }
    }
}

/// Canonical character id: trimmed, uppercased, parenthetical qualifiers
/// removed ("David (young)" and "DAVID" are the same character).
pub fn normalize_character_id(raw: &str) -> String {
    let base = match raw.find('(') {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    base.trim().to_uppercase()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appearance {
    pub chapter: usize,
    pub scene: usize,
}

/// One contiguous run of chapters in which a character's look is constant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EraSpan {
    pub era: EraPhase,
    pub age_hint: String,
    pub chapters: Vec<usize>,
}

/// Everything the production knows about one character across chapters.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CharacterSpan {
    pub total_appearances: usize,
    pub appearances: Vec<Appearance>,
    /// Life phases this character moves through, in arc order.
    #[serde(default)]
    pub phases: Vec<EraSpan>,
    /// Chapter whose key events record this character's death, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dies_in_chapter: Option<usize>,
}

impl CharacterSpan {
    pub fn first_chapter(&self) -> Option<usize> {
        self.appearances.iter().map(|a| a.chapter).min()
    }

    pub fn last_chapter(&self) -> Option<usize> {
        self.appearances.iter().map(|a| a.chapter).max()
    }
}

/// Cross-chapter character index, rebuilt from the chapter scripts. This is
/// a derived cache: scripts stay authoritative and a rebuild after any
/// script change is always safe.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CharacterTimeline {
    pub characters: BTreeMap<String, CharacterSpan>,
}

impl CharacterTimeline {
    pub fn build(chapters: &[(Chapter, Script)], total_chapters: usize) -> Self {
        let mut characters: BTreeMap<String, CharacterSpan> = BTreeMap::new();

        for (chapter, script) in chapters {
            for scene in &script.scenes {
                for raw in &scene.characters {
                    let id = normalize_character_id(raw);
                    if id.is_empty() {
                        continue;
                    }
                    characters.entry(id).or_default().appearances.push(Appearance {
                        chapter: chapter.index,
                        scene: scene.index,
                    });
                }
            }
        }

        for span in characters.values_mut() {
            span.total_appearances = span.appearances.len();
            let mut seen: Vec<usize> = span.appearances.iter().map(|a| a.chapter).collect();
            seen.sort_unstable();
            seen.dedup();
            for chapter in seen {
                let era = EraPhase::for_chapter(chapter, total_chapters);
                match span.phases.last_mut() {
                    Some(phase) if phase.era == era => phase.chapters.push(chapter),
                    _ => span.phases.push(EraSpan {
                        era,
                        age_hint: era.age_hint().to_string(),
                        chapters: vec![chapter],
                    }),
                }
            }
        }

        for (chapter, _) in chapters {
            let events = chapter.key_events.to_uppercase();
            for (id, span) in characters.iter_mut() {
                if span.dies_in_chapter.is_some() {
                    continue;
                }
                if death_recorded(&events, id) {
                    span.dies_in_chapter = Some(chapter.index);
                }
            }
        }

        Self { characters }
    }

    pub fn span(&self, id: &str) -> Option<&CharacterSpan> {
        self.characters.get(&normalize_character_id(id))
    }
}

/// True when the key-events text records this character's death. Matches
/// "<NAME> DIES" and "DEATH OF <NAME>".
fn death_recorded(events_upper: &str, id: &str) -> bool {
    events_upper.contains(&format!("{id} DIES")) || events_upper.contains(&format!("DEATH OF {id}"))
}

/// Generated visual descriptions, keyed `"{character}_{era}"`. An anchor is
/// written once and never regenerated; downstream prompts depend on the
/// text staying byte-stable across resumed runs.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct VisualAnchorStore {
    pub anchors: BTreeMap<String, String>,
}

impl VisualAnchorStore {
    pub fn key(character: &str, era: EraPhase) -> String {
        format!("{}_{}", normalize_character_id(character), era.as_str())
    }

    pub fn get(&self, character: &str, era: EraPhase) -> Option<&String> {
        self.anchors.get(&Self::key(character, era))
    }

    /// Insert only if absent; returns whether the store changed.
    pub fn ensure(&mut self, character: &str, era: EraPhase, description: String) -> bool {
        let key = Self::key(character, era);
        if self.anchors.contains_key(&key) {
            return false;
        }
        self.anchors.insert(key, description);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Scene, StageStatus};
    use std::collections::BTreeMap as Map;

    fn chapter(index: usize, key_events: &str) -> Chapter {
        Chapter {
            index,
            title: format!("ch{index}"),
            slug: format!("ch{index}"),
            key_events: key_events.to_string(),
            scripture_range: String::new(),
            duration_target_secs: 0.0,
            status: StageStatus::Uninitialized,
            audio_priority: Map::new(),
        }
    }

    fn script(scenes: &[(usize, &[&str])]) -> Script {
        Script {
            schema_version: 2,
            scenes: scenes
                .iter()
                .map(|(index, chars)| Scene {
                    index: *index,
                    characters: chars.iter().map(|c| c.to_string()).collect(),
                    ..Scene::default()
                })
                .collect(),
        }
    }

    #[test]
    fn ids_normalize_to_one_character() {
        assert_eq!(normalize_character_id(" David (young) "), "DAVID");
        assert_eq!(normalize_character_id("DAVID"), "DAVID");
    }

    #[test]
    fn timeline_spans_and_deaths() {
        let chapters = vec![
            (chapter(1, ""), script(&[(1, &["David"]), (2, &["David", "Saul"])])),
            (chapter(2, "Saul dies on Mount Gilboa"), script(&[(1, &["SAUL"])])),
            (chapter(3, ""), script(&[(1, &["DAVID"])])),
        ];
        let timeline = CharacterTimeline::build(&chapters, 4);

        let david = timeline.span("david").unwrap();
        assert_eq!(david.first_chapter(), Some(1));
        assert_eq!(david.last_chapter(), Some(3));
        assert_eq!(david.total_appearances, 3);
        assert_eq!(david.dies_in_chapter, None);
        // Three content chapters in a four-chapter project split the arc.
        assert_eq!(david.phases.len(), 2);
        assert_eq!(david.phases[0].chapters, vec![1]);
        assert_eq!(david.phases[0].age_hint, "young");
        assert_eq!(david.phases[1].chapters, vec![3]);

        let saul = timeline.span("SAUL").unwrap();
        assert_eq!(saul.dies_in_chapter, Some(2));
    }

    #[test]
    fn era_phases_split_the_content_arc() {
        // Nine content chapters (indices 1..=9) in a ten-chapter project.
        assert_eq!(EraPhase::for_chapter(1, 10), EraPhase::Early);
        assert_eq!(EraPhase::for_chapter(4, 10), EraPhase::Middle);
        assert_eq!(EraPhase::for_chapter(9, 10), EraPhase::Late);
    }

    #[test]
    fn anchors_are_write_once() {
        let mut store = VisualAnchorStore::default();
        assert!(store.ensure("David", EraPhase::Early, "a ruddy shepherd boy".into()));
        assert!(!store.ensure("DAVID", EraPhase::Early, "something else".into()));
        assert_eq!(
            store.get("david (young)", EraPhase::Early).map(String::as_str),
            Some("a ruddy shepherd boy")
        );
    }
}
