//! HTML parser for extracting records and links
//!
//! This module turns a fetched page into:
//! - A record of configured fields, keyed by a content hash
//! - Links to follow (from the link selector and canonical links)
//!
//! Parsing is pure: it depends only on the fetch result and the schema.

use crate::config::ExtractConfig;
use crate::ConfigError;
use crate::crawler::fetcher::FetchResult;
use crate::crawler::frontier::FetchTarget;
use crate::storage::Record;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use url::Url;

/// Why a page produced no record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// No body, an empty body, or a body without markup
    #[error("malformed page: {0}")]
    Malformed(String),

    /// The page parsed but did not fit the extraction schema
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// A compiled `[[extract.field]]` rule
#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    selector: Selector,
    attribute: Option<String>,
    multiple: bool,
    required: bool,
}

/// Compiled extraction schema
#[derive(Debug, Clone)]
pub struct ExtractionSchema {
    fields: Vec<FieldRule>,
    link_selector: Selector,
    canonical_selector: Selector,
    follow_links: bool,
    hash_fields: Vec<String>,
    link_priority_step: i32,
}

impl ExtractionSchema {
    /// Compiles every selector in the configuration
    pub fn from_config(config: &ExtractConfig) -> Result<Self, ConfigError> {
        let compile = |field: &str, css: &str| {
            Selector::parse(css).map_err(|e| ConfigError::InvalidSelector {
                field: field.to_string(),
                message: format!("{:?}", e),
            })
        };

        let fields = config
            .fields
            .iter()
            .map(|f| {
                Ok(FieldRule {
                    name: f.name.clone(),
                    selector: compile(&f.name, &f.selector)?,
                    attribute: f.attribute.clone(),
                    multiple: f.multiple,
                    required: f.required,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            fields,
            link_selector: compile("link-selector", &config.link_selector)?,
            canonical_selector: compile("canonical", "link[rel='canonical'][href]")?,
            follow_links: config.follow_links,
            hash_fields: config.hash_fields.clone(),
            link_priority_step: 1,
        })
    }

    /// Sets how much priority a link loses relative to the page it was found on
    pub fn with_link_priority_step(mut self, step: i32) -> Self {
        self.link_priority_step = step;
        self
    }
}

/// Output of parsing one page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub record: Option<Record>,
    /// Canonical, deduplicated targets for links found on the page
    pub links: Vec<FetchTarget>,
    pub issue: Option<ExtractionError>,
}

impl ParsedPage {
    fn malformed(reason: &str) -> Self {
        Self {
            issue: Some(ExtractionError::Malformed(reason.to_string())),
            ..Default::default()
        }
    }
}

/// Parses a fetch result against `schema`
///
/// # Link Extraction Rules
///
/// **Include:**
/// - Elements matched by the link selector (default `a[href]`)
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - Elements with a `download` attribute
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
/// - Anything that is not http(s) after resolution
///
/// Malformed input yields neither a record nor links. A schema mismatch still yields
/// the page's links.
///
/// # Example
///
/// ```no_run
/// use driftnet::config::ExtractConfig;
/// use driftnet::crawler::{parse, ExtractionSchema, FetchResult};
///
/// # fn example(result: &FetchResult) {
/// let schema = ExtractionSchema::from_config(&ExtractConfig::default()).unwrap();
/// let page = parse(result, &schema);
/// println!("{} links, record: {}", page.links.len(), page.record.is_some());
/// # }
/// ```
pub fn parse(result: &FetchResult, schema: &ExtractionSchema) -> ParsedPage {
    if result.error.is_some() {
        return ParsedPage::malformed("fetch failed");
    }
    let Some(body) = result.body.as_deref() else {
        return ParsedPage::malformed("no body");
    };
    if body.trim().is_empty() {
        return ParsedPage::malformed("empty body");
    }
    if !body.contains('<') {
        return ParsedPage::malformed("no markup");
    }

    let document = Html::parse_document(body);

    let links = if schema.follow_links {
        // distinct hrefs can canonicalize to the same URL
        let mut seen = HashSet::new();
        extract_links(&document, schema, &result.final_url)
            .into_iter()
            .filter_map(|url| result.target.child(url, schema.link_priority_step).ok())
            .filter(|child| seen.insert(child.key().to_string()))
            .collect()
    } else {
        Vec::new()
    };

    let (record, issue) = match extract_fields(&document, schema) {
        Ok(fields) => match content_hash(&fields, &schema.hash_fields) {
            Some(hash) => (
                Some(Record::new(
                    result.target.key(),
                    hash,
                    fields,
                    result.fetched_at,
                )),
                None,
            ),
            None => (
                None,
                Some(ExtractionError::SchemaMismatch(
                    "no hash field present".to_string(),
                )),
            ),
        },
        Err(issue) => (None, Some(issue)),
    };

    ParsedPage {
        record,
        links,
        issue,
    }
}

/// Extracts configured fields; fails if a required field is missing or nothing matched
fn extract_fields(
    document: &Html,
    schema: &ExtractionSchema,
) -> Result<BTreeMap<String, Value>, ExtractionError> {
    let mut fields = BTreeMap::new();

    for rule in &schema.fields {
        let values: Vec<String> = document
            .select(&rule.selector)
            .filter_map(|element| element_value(element, rule.attribute.as_deref()))
            .collect();

        if values.is_empty() {
            if rule.required {
                return Err(ExtractionError::SchemaMismatch(format!(
                    "required field '{}' missing",
                    rule.name
                )));
            }
            continue;
        }

        let value = if rule.multiple {
            Value::Array(values.into_iter().map(Value::String).collect())
        } else {
            values.into_iter().next().map(Value::String).unwrap_or(Value::Null)
        };
        fields.insert(rule.name.clone(), value);
    }

    if fields.is_empty() {
        return Err(ExtractionError::SchemaMismatch(
            "no configured field matched".to_string(),
        ));
    }
    Ok(fields)
}

/// Text content (whitespace collapsed) or the named attribute; empty values are skipped
fn element_value(element: ElementRef<'_>, attribute: Option<&str>) -> Option<String> {
    let raw = match attribute {
        Some(attr) => element.value().attr(attr)?.to_string(),
        None => element.text().collect::<String>(),
    };
    let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!value.is_empty()).then_some(value)
}

/// SHA-256 hex of the canonical JSON of the hashed fields
///
/// With no `hash_fields`, every field is hashed. Returns None when none of the
/// configured hash fields is present.
pub fn content_hash(fields: &BTreeMap<String, Value>, hash_fields: &[String]) -> Option<String> {
    let hashed: BTreeMap<&String, &Value> = if hash_fields.is_empty() {
        fields.iter().collect()
    } else {
        fields
            .iter()
            .filter(|(name, _)| hash_fields.contains(*name))
            .collect()
    };

    if hashed.is_empty() {
        return None;
    }

    let canonical = serde_json::to_vec(&hashed).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Some(hex::encode(hasher.finalize()))
}

/// Extracts all followable links, in document order, without duplicates
fn extract_links(document: &Html, schema: &ExtractionSchema, base_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let anchors = document
        .select(&schema.link_selector)
        .filter(|element| element.value().attr("download").is_none());
    let canonical = document.select(&schema.canonical_selector);

    for element in anchors.chain(canonical) {
        if let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url))
        {
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}
