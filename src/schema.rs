//! Front-matter schema (`frontmatter.scheme.json`) and date-format conversion.
//!
//! The schema lists the metadata fields an article may carry. Only `date`
//! fields matter to the service: they are stored in the schema's format
//! (for example `yyyy/MM/dd`) but exchanged with clients as `yyyy-MM-dd`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

use crate::content::Frontmatter;

/// Format used on the wire and when a date field has no `format`.
pub const ISO_DATE_FORMAT: &str = "yyyy-MM-dd";

static YEAR_FIRST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/:.](\d{2})[-/:.](\d{2})$").unwrap());
static COMPACT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());
static YEAR_LAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})[-/:.](\d{2})[-/:.](\d{4})$").unwrap());
static YEAR_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)yyyy").unwrap());
static DAY_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)dd").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Date,
    Boolean,
}

/// One metadata field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontmatterSchema {
    pub fields: Vec<SchemaField>,
}

impl FrontmatterSchema {
    /// Load the schema file. Missing or malformed files give an empty schema.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed schema {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::debug!("No schema at {} ({}), using empty schema", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse schema JSON, dropping `//` comment lines first.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = raw
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        let fields: Vec<SchemaField> = serde_json::from_str(&cleaned)?;
        Ok(Self { fields })
    }

    /// Before saving: ISO dates become the schema's per-field format.
    pub fn to_schema_format(&self, frontmatter: &Frontmatter) -> Frontmatter {
        self.convert(frontmatter, |field| {
            field.format.as_deref().unwrap_or(ISO_DATE_FORMAT)
        })
    }

    /// After loading: schema-formatted dates become ISO.
    pub fn from_schema_format(&self, frontmatter: &Frontmatter) -> Frontmatter {
        self.convert(frontmatter, |_| ISO_DATE_FORMAT)
    }

    fn convert<'a>(
        &'a self,
        frontmatter: &Frontmatter,
        target: impl Fn(&'a SchemaField) -> &'a str,
    ) -> Frontmatter {
        let mut result = frontmatter.clone();
        for field in self
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Date)
        {
            if let Some(Value::String(value)) = result.get_mut(&field.name) {
                *value = convert_date_format(value, target(field));
            }
        }
        result
    }
}

#[derive(Debug, PartialEq, Eq)]
struct DateParts<'a> {
    year: &'a str,
    month: &'a str,
    day: &'a str,
}

fn parse_date_parts(value: &str) -> Option<DateParts<'_>> {
    let trimmed = value.trim();

    if let Some(caps) = YEAR_FIRST
        .captures(trimmed)
        .or_else(|| COMPACT.captures(trimmed))
    {
        let (_, [year, month, day]) = caps.extract();
        return Some(DateParts { year, month, day });
    }

    let caps = YEAR_LAST.captures(trimmed)?;
    let (_, [first, second, year]) = caps.extract();
    // MM/dd/yyyy unless the first number cannot be a month.
    let first_num: u32 = first.parse().ok()?;
    let second_num: u32 = second.parse().ok()?;
    if first_num > 12 && second_num <= 12 {
        Some(DateParts {
            year,
            month: second,
            day: first,
        })
    } else {
        Some(DateParts {
            year,
            month: first,
            day: second,
        })
    }
}

fn format_date_parts(parts: &DateParts<'_>, format: &str) -> String {
    let result = YEAR_TOKEN.replacen(format, 1, parts.year);
    let result = result.replace("MM", parts.month).replace("mm", parts.month);
    DAY_TOKEN.replacen(&result, 1, parts.day).into_owned()
}

/// Re-render a date string in `target_format`. Unrecognised input is
/// returned unchanged.
pub fn convert_date_format(value: &str, target_format: &str) -> String {
    match parse_date_parts(value) {
        Some(parts) => format_date_parts(&parts, target_format),
        None => value.to_string(),
    }
}
