//! Prompt templates
//!
//! A template file has two sections split by a `######` line:
//!
//! ```text
//! opening_line: Hello {user_name}, I'm {agent_name}. What's on your mind?
//! ######
//! The following is a conversation between {user_name} and {agent_name}.
//!
//! {transcript}
//! Agent:
//! ```
//!
//! The opening line greets the user when a new chat starts. The body frames
//! every completion request, with `{transcript}` replaced by the rendered turns.
//! Use `{{` and `}}` for literal braces.

use std::path::Path;

use tokio::fs;

/// Marker line that splits the opening line from the body
pub const SECTION_SEPARATOR: &str = "######";

/// Optional label in front of the opening line
const OPENING_LABEL: &str = "opening_line:";

/// Placeholders allowed in the opening line
const OPENING_PLACEHOLDERS: &[&str] = &["user_name", "agent_name"];

/// Placeholders allowed in the body
const BODY_PLACEHOLDERS: &[&str] = &["transcript", "user_name", "agent_name"];

/// A parsed, immutable prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    opening_line: String,
    body: String,
}

impl PromptTemplate {
    /// Parse a template from its source text
    pub fn load(source: &str) -> Result<Self, TemplateError> {
        let found = source.matches(SECTION_SEPARATOR).count();
        if found != 1 {
            return Err(TemplateError::Malformed { found });
        }

        // count == 1, so split_once always succeeds
        let (head, tail) = source
            .split_once(SECTION_SEPARATOR)
            .ok_or(TemplateError::Malformed { found })?;

        let head = head.trim_start();
        let opening_line = head.strip_prefix(OPENING_LABEL).unwrap_or(head).trim();

        // The line break closing the separator line is not part of the body
        let body = tail
            .strip_prefix("\r\n")
            .or_else(|| tail.strip_prefix('\n'))
            .unwrap_or(tail)
            .trim_end();

        Ok(Self {
            opening_line: opening_line.to_string(),
            body: body.to_string(),
        })
    }

    /// Read and parse a template file
    pub async fn load_from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = fs::read_to_string(path)
            .await
            .map_err(|e| TemplateError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::load(&source)
    }

    pub fn opening_line(&self) -> &str {
        &self.opening_line
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn render_opening(&self, user_name: &str, agent_name: &str) -> Result<String, TemplateError> {
        substitute(
            &self.opening_line,
            OPENING_PLACEHOLDERS,
            &[("user_name", user_name), ("agent_name", agent_name)],
        )
    }

    pub fn render_body(
        &self,
        transcript: &str,
        user_name: &str,
        agent_name: &str,
    ) -> Result<String, TemplateError> {
        substitute(
            &self.body,
            BODY_PLACEHOLDERS,
            &[
                ("transcript", transcript),
                ("user_name", user_name),
                ("agent_name", agent_name),
            ],
        )
    }
}

/// Replace `{name}` placeholders, failing on anything outside `allowed`
fn substitute(
    text: &str,
    allowed: &[&str],
    values: &[(&str, &str)],
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if rest[pos..].starts_with('}') {
            match after.strip_prefix('}') {
                Some(next) => {
                    out.push('}');
                    rest = next;
                    continue;
                }
                None => return Err(TemplateError::Substitution("}".to_string())),
            }
        }

        if let Some(next) = after.strip_prefix('{') {
            out.push('{');
            rest = next;
            continue;
        }

        let end = after
            .find('}')
            .ok_or_else(|| TemplateError::Substitution(format!("{{{}", after)))?;
        let name = &after[..end];

        let value = values
            .iter()
            .find(|(key, _)| *key == name && allowed.contains(key))
            .map(|(_, value)| *value)
            .ok_or_else(|| TemplateError::Substitution(format!("{{{}}}", name)))?;

        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Errors from loading or rendering a template
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Malformed template: expected exactly one '######' separator, found {found}")]
    Malformed { found: usize },

    #[error("Unresolved placeholder in template: {0}")]
    Substitution(String),

    #[error("Could not read template {path}: {message}")]
    Io { path: String, message: String },
}
