//! Markdown files with a YAML front-matter block.

use thiserror::Error;

use super::Frontmatter;

const DELIMITER: &str = "---";

#[derive(Error, Debug)]
pub enum MarkdownError {
    #[error("front matter is not terminated by '---'")]
    Unterminated,

    #[error("invalid YAML front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("front matter is not a mapping of string keys: {0}")]
    Shape(#[from] serde_json::Error),
}

/// A decoded article file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub frontmatter: Frontmatter,
    pub body: String,
}

/// Render front matter and body as `---\n<yaml>---\n<body>`.
///
/// Empty front matter produces the body alone. The result always ends with a
/// newline.
pub fn encode(frontmatter: &Frontmatter, body: &str) -> Result<String, MarkdownError> {
    let mut out = String::new();
    if !frontmatter.is_empty() {
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&serde_yaml::to_string(frontmatter)?);
        out.push_str(DELIMITER);
        out.push('\n');
    }
    out.push_str(body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// Split a file into front matter and body.
///
/// A file that does not open with a `---` line has no front matter.
pub fn decode(text: &str) -> Result<Document, MarkdownError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let Some(rest) = strip_delimiter_line(text) else {
        return Ok(Document {
            frontmatter: Frontmatter::new(),
            body: text.to_string(),
        });
    };

    let mut offset = 0;
    let mut closing = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            closing = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) = closing.ok_or(MarkdownError::Unterminated)?;

    let yaml: serde_yaml::Value = serde_yaml::from_str(&rest[..yaml_end])?;
    let frontmatter = match serde_json::to_value(yaml)? {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => Frontmatter::new(),
        other => {
            return Err(MarkdownError::Shape(serde::de::Error::custom(format!(
                "expected a mapping, found {}",
                other
            ))));
        }
    };

    Ok(Document {
        frontmatter,
        body: rest[body_start..].to_string(),
    })
}

fn strip_delimiter_line(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(DELIMITER)?;
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}
