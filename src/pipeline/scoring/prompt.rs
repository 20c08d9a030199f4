// Prompt template handling and title sanitization.
// The template is operator-supplied text with `{title}` placeholders;
// `{{` and `}}` stand for literal braces so JSON examples can live in the prompt.

use std::path::{Path, PathBuf};

use thiserror::Error;

const PLACEHOLDER: &str = "title";

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Cannot read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Prompt template has no {{title}} placeholder")]
    MissingPlaceholder,

    #[error("Prompt template has unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("Prompt template has an unmatched '{0}' at byte {1}")]
    UnmatchedBrace(char, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Title,
}

/// Parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(text: &str) -> Result<Self, PromptError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, ch)) => name.push(ch),
                            None => return Err(PromptError::UnmatchedBrace('{', pos)),
                        }
                    }
                    if name.trim() != PLACEHOLDER {
                        return Err(PromptError::UnknownPlaceholder(name));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Title);
                }
                '}' => return Err(PromptError::UnmatchedBrace('}', pos)),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.contains(&Segment::Title) {
            return Err(PromptError::MissingPlaceholder);
        }
        Ok(Self { segments })
    }

    /// Substitute an already-sanitized title.
    pub fn render(&self, title: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Title => out.push_str(title),
            }
        }
        out
    }
}

/// Strip characters that could break out of the prompt: template braces,
/// `>` (used as a quoting marker in the prompt), control characters and
/// invisible formatting characters.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '>' | '{' | '}'))
        .filter(|c| !is_invisible(*c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_placeholder() {
        let template = PromptTemplate::parse("Rate this title: {title}\nAnswer in JSON.").unwrap();
        assert_eq!(
            template.render("You won't believe"),
            "Rate this title: You won't believe\nAnswer in JSON."
        );
    }

    #[test]
    fn escaped_braces_become_literals() {
        let template =
            PromptTemplate::parse(r#"Reply like {{"score": 1}} for: {title}"#).unwrap();
        assert_eq!(template.render("X"), r#"Reply like {"score": 1} for: X"#);
    }

    #[test]
    fn repeated_placeholder_is_allowed() {
        let template = PromptTemplate::parse("{title} / {title}").unwrap();
        assert_eq!(template.render("a"), "a / a");
    }

    #[test]
    fn missing_placeholder_rejected() {
        assert!(matches!(
            PromptTemplate::parse("No slot here"),
            Err(PromptError::MissingPlaceholder)
        ));
    }

    #[test]
    fn unknown_placeholder_rejected() {
        assert!(matches!(
            PromptTemplate::parse("{title} by {author}"),
            Err(PromptError::UnknownPlaceholder(name)) if name == "author"
        ));
    }

    #[test]
    fn unmatched_braces_rejected() {
        assert!(matches!(
            PromptTemplate::parse("{title"),
            Err(PromptError::UnmatchedBrace('{', 0))
        ));
        assert!(matches!(
            PromptTemplate::parse("{title} }"),
            Err(PromptError::UnmatchedBrace('}', 8))
        ));
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prompt.txt");
        std::fs::write(&path, "Score: {title}").unwrap();
        assert_eq!(PromptTemplate::load(&path).unwrap().render("t"), "Score: t");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            PromptTemplate::load(&tmp.path().join("nope.txt")),
            Err(PromptError::Io { .. })
        ));
    }

    #[test]
    fn sanitize_strips_delimiters() {
        assert_eq!(sanitize_title("A > B {title} C"), "A B title C");
    }

    #[test]
    fn sanitize_strips_invisible_and_control_chars() {
        assert_eq!(sanitize_title("Hi\u{200B}dden\ttab\nline"), "Hidden tab line");
        assert_eq!(sanitize_title("\u{FEFF}  padded  "), "padded");
    }

    #[test]
    fn sanitize_keeps_unicode_text() {
        assert_eq!(sanitize_title("Café 🎉 ¿Qué?"), "Café 🎉 ¿Qué?");
    }
}
