use pipeline::{DocumentExtractor, ExtractionError};
use regex::Regex;
use tracing::debug;

/// Extracted text is cut to this many characters unless overridden.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// Section names recognised on a line of their own.
const KNOWN_SECTIONS: &[&str] = &[
    "abstract",
    "introduction",
    "background",
    "related work",
    "methods",
    "methodology",
    "results",
    "discussion",
    "conclusion",
    "conclusions",
    "acknowledgements",
    "acknowledgments",
    "references",
    "bibliography",
];

/// Magic prefixes of binary formats that are rejected outright.
const BINARY_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF".as_slice(), "pdf"),
    (b"PK\x03\x04".as_slice(), "zip container (docx/odt)"),
    (b"\xD0\xCF\x11\xE0".as_slice(), "ole compound document (doc)"),
    (b"{\\rtf".as_slice(), "rtf"),
];

/// Plain-text document extractor with heading detection.
pub struct TextExtractor {
    max_chars: usize,
    markdown_heading: Regex,
    numbered_heading: Regex,
    blank_runs: Regex,
}

impl TextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            max_chars: DEFAULT_MAX_CHARS,
            markdown_heading: Regex::new(r"^#{1,6}\s+(.+?)\s*#*$")?,
            numbered_heading: Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+(\p{Lu}.*)$")?,
            blank_runs: Regex::new(r"\n{3,}")?,
        })
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn heading(&self, line: &str) -> Option<String> {
        if let Some(caps) = self.markdown_heading.captures(line) {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = self.numbered_heading.captures(line) {
            let title = caps[2].trim();
            if title.chars().count() <= 80 && !title.ends_with('.') && !title.ends_with(',') {
                return Some(format!("{} {title}", &caps[1]));
            }
        }
        let bare = line.trim_end_matches(':').trim();
        let lowered = bare.to_lowercase();
        KNOWN_SECTIONS
            .contains(&lowered.as_str())
            .then(|| bare.to_string())
    }
}

impl DocumentExtractor for TextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        if let Some((_, format)) = BINARY_SIGNATURES
            .iter()
            .find(|(magic, _)| bytes.starts_with(magic))
        {
            return Err(ExtractionError::UnsupportedFormat {
                format: (*format).to_string(),
            });
        }
        if bytes.contains(&0) {
            return Err(ExtractionError::UnsupportedFormat {
                format: "binary".to_string(),
            });
        }

        let text = std::str::from_utf8(bytes).map_err(|err| ExtractionError::CorruptDocument {
            reason: format!("not valid UTF-8: {err}"),
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let normalised: String = text
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
        let normalised = self.blank_runs.replace_all(normalised.trim(), "\n\n");
        if normalised.is_empty() {
            return Err(ExtractionError::CorruptDocument {
                reason: "document contains no text".to_string(),
            });
        }

        let total = normalised.chars().count();
        if total > self.max_chars {
            debug!(total, kept = self.max_chars, "truncating extracted text");
            let cut: String = normalised.chars().take(self.max_chars).collect();
            return Ok(format!("{cut}..."));
        }
        Ok(normalised.into_owned())
    }

    fn outline(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| self.heading(line))
            .collect()
    }
}
