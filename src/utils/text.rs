use std::collections::BTreeSet;

/// Normalized sequence similarity in [0, 1], based on recursively located
/// longest matching blocks (Ratcliff/Obershelp), not raw edit distance.
/// Case-insensitive; two empty strings compare as identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = matched_len(&a, &b);
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

fn matched_len(a: &[char], b: &[char]) -> usize {
    let (ai, bi, len) = longest_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matched_len(&a[..ai], &b[..bi]) + matched_len(&a[ai + len..], &b[bi + len..])
}

/// Longest common substring of `a` and `b`, returned as (start in a,
/// start in b, length). Single rolling DP row, O(|a|*|b|).
fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                row[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = row;
    }
    best
}

/// Jaccard index of two sets. Defined as 0 when both sets are empty, so an
/// absent character roster never reads as a perfect match.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Meaningful keyword tokens from free text: lowercase alphabetic runs,
/// longer than two characters, with the stop-word list removed. Style-preset
/// and camera vocabulary is treated as noise since it appears in every
/// generation prompt.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

const STOP_WORDS: &[&str] = &[
    "the", "was", "were", "been", "being", "have", "has", "had", "does", "did", "will", "would",
    "could", "should", "may", "might", "shall", "can", "for", "with", "from", "and",
    "not", "nor", "yet", "then", "than", "that", "this", "these", "those", "his", "her", "its",
    "their", "your", "our", "they", "him", "them", "who", "whom", "which", "what", "where",
    "when", "how", "why", "all", "each", "every", "both", "few", "more", "other", "some", "such",
    "only", "own", "same", "out", "off", "over", "under", "into", "about", "between", "through",
    "during", "before", "after", "are", "she", "you", "pixar", "disney", "animation", "rendered",
    "style", "quality", "detailed", "ultra", "cinematic", "shot", "medium", "close", "wide",
    "angle", "camera",
];

/// Filesystem-safe slug for titles.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut last_sep = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_sep = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert!((similarity_ratio("a shepherd boy", "A Shepherd Boy") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_strings_score_near_zero() {
        assert!(similarity_ratio("aaaa", "bbbb") < 1e-9);
    }

    #[test]
    fn ratio_matches_block_overlap() {
        // "abcd" vs "bcde": matching blocks cover "bcd" -> 2*3/8.
        assert!((similarity_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn empty_sets_are_not_a_match() {
        let empty = BTreeSet::new();
        assert_eq!(jaccard(&empty, &empty), 0.0);
    }

    #[test]
    fn jaccard_counts_overlap() {
        let a: BTreeSet<String> = ["david", "goliath"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["david", "saul"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let kw = extract_keywords("The shepherd boy walks into a wide valley, 4k cinematic");
        assert!(kw.contains("shepherd"));
        assert!(kw.contains("valley"));
        assert!(kw.contains("boy"));
        assert!(!kw.contains("the"));
        assert!(!kw.contains("wide"));
        assert!(!kw.contains("cinematic"));
        assert!(!kw.iter().any(|w| w.len() <= 2));
    }

    #[test]
    fn slugify_normalizes_titles() {
        assert_eq!(slugify("The Forgotten Son"), "the_forgotten_son");
        assert_eq!(slugify("  David & Goliath! "), "david_goliath");
    }
}
