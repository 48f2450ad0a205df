//! Endpoint template compilation and request path normalization.
//!
//! A template such as `items/<id>/tags/v<version>` compiles to an anchored
//! regex where every `<name>` becomes one capture group matching a single
//! path segment. Templates are normalized before compilation, so `items`,
//! `/items/` and `///items//` compile to the same pattern.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CepticError, Result};

/// Characters a variable capture accepts: printable ASCII except `/`.
const VARIABLE_CAPTURE: &str = "([!-\\.0-~]+)";

fn template_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-._/<>]+$").expect("static regex"))
}

fn path_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[!-\[\]-~]+$").expect("static regex"))
}

fn variable_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Whether a segment is matched literally or through a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentKind {
    Literal,
    Variable,
}

/// A compiled endpoint template.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    template: String,
    regex: Regex,
    variables: Vec<String>,
    segments: Vec<SegmentKind>,
}

impl EndpointPattern {
    /// Compile a template, rejecting anything malformed.
    pub fn compile(template: &str) -> Result<Self> {
        if template.trim().is_empty() {
            return Err(CepticError::Endpoint("endpoint template cannot be empty".to_string()));
        }
        if !template_chars().is_match(template) {
            return Err(CepticError::Endpoint(format!(
                "endpoint template {:?} contains invalid characters",
                template
            )));
        }
        let normalized = normalize(template)?;

        let mut pattern = String::from("^");
        let mut variables: Vec<String> = Vec::new();
        let mut segments = Vec::new();

        for segment in split_segments(&normalized) {
            pattern.push('/');
            match segment.find('<') {
                None => {
                    if segment.contains('>') {
                        return Err(bad_braces(template));
                    }
                    pattern.push_str(&regex::escape(segment));
                    segments.push(SegmentKind::Literal);
                }
                Some(open) => {
                    let prefix = &segment[..open];
                    let rest = &segment[open + 1..];
                    let name = match rest.strip_suffix('>') {
                        Some(name) if !prefix.contains('>') => name,
                        _ => return Err(bad_braces(template)),
                    };
                    if name.is_empty() || name.contains('<') || name.contains('>') {
                        return Err(bad_braces(template));
                    }
                    if !variable_name().is_match(name) {
                        return Err(CepticError::Endpoint(format!(
                            "variable {:?} in {:?} must start with a letter or underscore and contain only letters, digits and underscores",
                            name, template
                        )));
                    }
                    if variables.iter().any(|existing| existing == name) {
                        return Err(CepticError::Endpoint(format!(
                            "variable {:?} appears more than once in {:?}",
                            name, template
                        )));
                    }
                    variables.push(name.to_string());
                    pattern.push_str(&regex::escape(prefix));
                    pattern.push_str(VARIABLE_CAPTURE);
                    segments.push(SegmentKind::Variable);
                }
            }
        }
        if segments.is_empty() {
            pattern.push('/');
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| CepticError::Endpoint(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            variables,
            segments,
        })
    }

    /// Template as registered.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Compiled regex source; equal sources mean equivalent templates.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn segments(&self) -> &[SegmentKind] {
        &self.segments
    }

    /// Match a normalized path, returning one value per variable in declared order.
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.variables
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                    (name.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

fn bad_braces(template: &str) -> CepticError {
    CepticError::Endpoint(format!("endpoint template {:?} has invalid brace placement", template))
}

fn split_segments(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split('/').filter(|segment| !segment.is_empty())
}

/// Strip trailing slashes, force a single leading slash, reject interior `//`.
fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_end_matches('/').trim_start_matches('/');
    if trimmed.contains("//") {
        return Err(CepticError::Endpoint(format!(
            "endpoint {:?} cannot contain consecutive slashes",
            path
        )));
    }
    Ok(format!("/{}", trimmed))
}

/// Validate and normalize an inbound request path.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(CepticError::Endpoint("endpoint cannot be empty".to_string()));
    }
    if !path_chars().is_match(path) {
        return Err(CepticError::Endpoint(format!("endpoint {:?} contains invalid characters", path)));
    }
    normalize(path)
}
