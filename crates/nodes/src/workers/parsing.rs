//! Lenient parsing of model output.
//!
//! Models are asked for JSON but frequently wrap it in prose or code fences,
//! or ignore the format entirely. Every parser here first looks for a JSON
//! array anywhere in the text and falls back to line-oriented extraction.

use pipeline::{Hypothesis, Level, PaperRecord, Provenance, ResearchGap, ResearchTheme};
use serde_json::Value;

/// The first top-level JSON array embedded in `text`, if any parses.
pub fn embedded_json_array(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Strips list markers (`- `, `* `, `1. `, `2) `) and surrounding quotes.
fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
        .unwrap_or(line);
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let line = if digits > 0 {
        let rest = &line[digits..];
        rest.strip_prefix(". ")
            .or_else(|| rest.strip_prefix(") "))
            .unwrap_or(line)
    } else {
        line
    };
    line.trim().trim_matches('"').trim()
}

fn is_structural(line: &str) -> bool {
    line.starts_with('{') || line.starts_with('[') || line.starts_with("```")
}

/// Bullet-ish lines longer than `min_len`, markers removed.
pub fn list_lines(text: &str, min_len: usize, limit: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_structural(line))
        .map(strip_marker)
        .filter(|line| line.chars().count() > min_len)
        .map(str::to_string)
        .take(limit)
        .collect()
}

fn str_field(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| value.get(*name).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `"key: value"` with a case-insensitive key, anywhere in the line.
fn labelled<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let lower = line.to_lowercase();
    let needle = format!("{label}:");
    let pos = lower.find(&needle)?;
    line.get(pos + needle.len()..).map(str::trim)
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

pub fn parse_themes(text: &str) -> Vec<ResearchTheme> {
    let names: Vec<String> = match embedded_json_array(text) {
        Some(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                other => str_field(other, &["theme", "name", "title"]),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        None => list_lines(text, 10, 5),
    };
    names
        .into_iter()
        .take(5)
        .map(|theme| ResearchTheme {
            theme,
            trajectory: None,
            confidence: 0.7,
            provenance: Provenance::Worker,
        })
        .collect()
}

pub fn parse_gaps(text: &str) -> Vec<ResearchGap> {
    if let Some(items) = embedded_json_array(text) {
        return items
            .iter()
            .filter_map(|item| {
                let description = match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    other => str_field(other, &["description", "gap"]),
                }?;
                let impact = str_field(item, &["impact", "priority"])
                    .map(|i| Level::parse_lenient(&i))
                    .unwrap_or_default();
                Some(gap(description, impact))
            })
            .take(4)
            .collect();
    }

    let mut gaps: Vec<ResearchGap> = Vec::new();
    for line in text.lines() {
        if let Some(description) = labelled(line, "description") {
            if !description.is_empty() {
                gaps.push(gap(description.to_string(), Level::Medium));
            }
        } else if let (Some(impact), Some(last)) = (labelled(line, "impact"), gaps.last_mut()) {
            last.impact = Level::parse_lenient(impact);
        }
    }
    gaps.truncate(4);
    gaps
}

fn gap(description: String, impact: Level) -> ResearchGap {
    ResearchGap {
        description,
        impact,
        confidence: 0.7,
        provenance: Provenance::Worker,
    }
}

pub fn parse_contradictions(text: &str) -> Vec<String> {
    match embedded_json_array(text) {
        Some(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                other => str_field(other, &["description", "contradiction"]),
            })
            .filter(|s| !s.is_empty())
            .take(3)
            .collect(),
        None => list_lines(text, 20, 3),
    }
}

pub fn parse_hypotheses(text: &str) -> Vec<Hypothesis> {
    if let Some(items) = embedded_json_array(text) {
        let parsed: Vec<Hypothesis> = items
            .iter()
            .filter_map(|item| {
                let statement = match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    other => str_field(other, &["statement", "hypothesis"]),
                }?;
                Some(Hypothesis {
                    statement,
                    rationale: str_field(item, &["rationale", "reasoning"]).unwrap_or_default(),
                    testability: str_field(item, &["testability"])
                        .map(|t| Level::parse_lenient(&t))
                        .unwrap_or_default(),
                    provenance: Provenance::Worker,
                })
            })
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }

    let mut hypotheses: Vec<Hypothesis> = Vec::new();
    for line in text.lines() {
        if let Some(statement) = labelled(line, "statement") {
            hypotheses.push(Hypothesis {
                statement: statement.to_string(),
                rationale: String::new(),
                testability: Level::Medium,
                provenance: Provenance::Worker,
            });
        } else if let Some(last) = hypotheses.last_mut() {
            if let Some(rationale) = labelled(line, "rationale") {
                last.rationale = rationale.to_string();
            } else if let Some(testability) = labelled(line, "testability") {
                last.testability = Level::parse_lenient(testability);
            }
        }
    }
    hypotheses.retain(|h| !h.statement.is_empty());
    hypotheses
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

/// At most `max` characters of `text`, with an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Title + truncated abstract for the first `limit` papers.
pub fn paper_context(papers: &[PaperRecord], limit: usize) -> String {
    papers
        .iter()
        .take(limit)
        .map(|p| {
            format!(
                "Title: {}\nAbstract: {}",
                p.title,
                truncate_chars(&p.abstract_text, 300)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_themes_from_fenced_json() {
        let text = "Here you go:\n```json\n[\"Solid-state electrolytes\", \"Anode degradation\"]\n```";
        let themes = parse_themes(text);
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].theme, "Solid-state electrolytes");
    }

    #[test]
    fn test_themes_from_bullets_when_not_json() {
        let text = "Themes:\n- Graphene anode stability\n2. Fast charging chemistry\n* ok";
        let themes: Vec<_> = parse_themes(text).into_iter().map(|t| t.theme).collect();
        assert_eq!(themes, ["Graphene anode stability", "Fast charging chemistry"]);
    }

    #[test]
    fn test_gaps_json_objects_with_impact() {
        let text = r#"[{"description": "Few long-cycle studies", "impact": "High priority"},
                      {"description": "No cost models"}]"#;
        let gaps = parse_gaps(text);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].impact, Level::High);
        assert_eq!(gaps[1].impact, Level::Medium);
    }

    #[test]
    fn test_gaps_line_format() {
        let text = "Description: Limited field trials\nImpact: low\nDescription: Sparse data";
        let gaps = parse_gaps(text);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].impact, Level::Low);
        assert_eq!(gaps[1].description, "Sparse data");
    }

    #[test]
    fn test_hypotheses_json_then_line_fallback() {
        let json = r#"[{"statement": "Doping raises capacity", "rationale": "prior work", "testability": "High"}]"#;
        let parsed = parse_hypotheses(json);
        assert_eq!(parsed[0].testability, Level::High);

        let lines = "Statement: Coating reduces fade\nRationale: SEI growth\nTestability: low";
        let parsed = parse_hypotheses(lines);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].rationale, "SEI growth");
        assert_eq!(parsed[0].testability, Level::Low);
    }

    #[test]
    fn test_unparseable_output_yields_nothing() {
        assert!(parse_gaps("I cannot help with that.").is_empty());
        assert!(parse_hypotheses("").is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ééé", 2), "éé...");
        assert_eq!(truncate_chars("abc", 5), "abc");
    }
}
