//! Heuristic quality assessor.
//!
//! A pure function of `(content, content type)`. It measures structural
//! adequacy only: is the output long enough, and does it mention the things
//! output of that kind normally mentions. It never judges factual correctness.
//!
//! ```text
//! score = 0.3 * min(len / expected_len, 1) + 0.7 * (keywords_present / keyword_count)
//! ```

use serde::{Deserialize, Serialize};

use crate::{QualityScore, Stage};

const LENGTH_WEIGHT: f64 = 0.3;
const SIGNAL_WEIGHT: f64 = 0.7;

/// Scoring profile for one kind of stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Literature,
    Analysis,
    DataAnalysis,
    Hypothesis,
    Publication,
    Recovery,
}

impl ContentType {
    /// The profile used to score a stage's output.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::LiteratureSearch => ContentType::Literature,
            Stage::Analysis => ContentType::Analysis,
            Stage::DataAnalysis => ContentType::DataAnalysis,
            Stage::HypothesisGeneration => ContentType::Hypothesis,
            Stage::Publication => ContentType::Publication,
            Stage::Coordinator => ContentType::Recovery,
        }
    }

    /// Content length (in characters) at which the length term saturates.
    pub fn expected_length(self) -> usize {
        match self {
            ContentType::Literature => 1500,
            ContentType::Analysis | ContentType::Hypothesis => 500,
            ContentType::DataAnalysis => 300,
            ContentType::Publication => 2000,
            ContentType::Recovery => 80,
        }
    }

    /// Lowercase stems expected in good output of this type.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            ContentType::Literature => &["method", "result", "study", "propose", "data"],
            ContentType::Analysis => &["gap", "trend", "pattern", "relationship", "finding"],
            ContentType::DataAnalysis => &["paper", "author", "average", "distribution", "pattern"],
            ContentType::Hypothesis => &["measure", "compare", "evaluate", "test", "validate"],
            ContentType::Publication => &["summary", "finding", "gap", "hypothes", "recommend"],
            ContentType::Recovery => &["recover", "stage"],
        }
    }
}

/// Scores `content` against the profile for `content_type`.
///
/// Always in `[0.0, 1.0]`; the empty string scores `0.0`.
pub fn score(content: &str, content_type: ContentType) -> QualityScore {
    let length = content.chars().count() as f64;
    let length_term = (length / content_type.expected_length() as f64).min(1.0);

    let lower = content.to_lowercase();
    let keywords = content_type.keywords();
    let present = keywords.iter().filter(|k| lower.contains(*k)).count();
    let signal_term = if keywords.is_empty() {
        0.0
    } else {
        present as f64 / keywords.len() as f64
    };

    QualityScore::clamped(LENGTH_WEIGHT * length_term + SIGNAL_WEIGHT * signal_term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content_scores_zero() {
        for stage in Stage::ALL {
            assert_eq!(score("", ContentType::for_stage(stage)).as_f64(), 0.0);
        }
    }

    #[test]
    fn test_full_marks_for_long_keyword_rich_analysis() {
        let text = format!(
            "A clear gap, a rising trend, a repeated pattern, a causal relationship and one finding. {}",
            "x".repeat(500)
        );
        assert!((score(&text, ContentType::Analysis).as_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_keywords_dominate_length() {
        let short_rich = "gap trend pattern relationship finding";
        let long_bare = "lorem ipsum ".repeat(100);
        assert!(
            score(short_rich, ContentType::Analysis) > score(&long_bare, ContentType::Analysis)
        );
    }

    #[test]
    fn test_score_is_deterministic_and_case_insensitive() {
        let a = score("We MEASURE and COMPARE", ContentType::Hypothesis);
        let b = score("We MEASURE and COMPARE", ContentType::Hypothesis);
        let c = score("we measure and compare", ContentType::Hypothesis);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_arbitrary_input_stays_in_range() {
        let inputs = ["\u{0}\u{1}", "🚀🚀🚀", &"gap ".repeat(10_000)];
        for input in inputs {
            let value = score(input, ContentType::Analysis).as_f64();
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
    }
}
