//! Route template compilation and matching.
//!
//! A template is split on `/` and every non-empty token is compiled on its own:
//!
//! - `**` matches the remainder of the path, separators included, and may be empty
//! - `*` matches exactly one non-empty segment
//! - `{name}` matches exactly one non-empty segment and captures it under `name`
//! - anything else is a literal, compared case-sensitively
//!
//! A trailing slash on the incoming path is optional. Matching does not use
//! regular expressions; `**` in the middle of a template backtracks greedily.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty parameter name in route `{0}`")]
    EmptyParam(String),
    #[error("invalid parameter name `{name}` in route `{template}`")]
    InvalidParam { name: String, template: String },
    #[error("parameter `{name}` declared twice in route `{template}`")]
    DuplicateParam { name: String, template: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Single,
    Multi,
}

/// Values captured by a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    pub params: HashMap<String, String>,
    /// Wildcard captures in left-to-right order of the template.
    pub wildcards: Vec<String>,
}

/// A compiled route template. Immutable once built.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
    params: Vec<String>,
    wildcards: usize,
}

impl PathPattern {
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut params: Vec<String> = Vec::new();
        let mut wildcards = 0;

        for token in template.split('/').filter(|t| !t.is_empty()) {
            let segment = match token {
                "**" => {
                    wildcards += 1;
                    Segment::Multi
                }
                "*" => {
                    wildcards += 1;
                    Segment::Single
                }
                _ if token.starts_with('{') && token.ends_with('}') && token.len() >= 2 => {
                    let name = &token[1..token.len() - 1];
                    if name.is_empty() {
                        return Err(PatternError::EmptyParam(template.to_string()));
                    }
                    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(PatternError::InvalidParam {
                            name: name.to_string(),
                            template: template.to_string(),
                        });
                    }
                    if params.iter().any(|p| p == name) {
                        return Err(PatternError::DuplicateParam {
                            name: name.to_string(),
                            template: template.to_string(),
                        });
                    }
                    params.push(name.to_string());
                    Segment::Param(name.to_string())
                }
                _ => Segment::Literal(token.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            params,
            wildcards,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Named parameters in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// Number of wildcards; captures are indexed `0..wildcard_count()`.
    pub fn wildcard_count(&self) -> usize {
        self.wildcards
    }

    pub fn is_match(&self, path: &str) -> bool {
        let mut caps = Vec::new();
        self.match_from(0, path, &mut caps)
    }

    /// Matches the full path, returning the captured values.
    pub fn matches(&self, path: &str) -> Option<Captures> {
        let mut caps = Vec::with_capacity(self.params.len() + self.wildcards);
        if !self.match_from(0, path, &mut caps) {
            return None;
        }

        let mut captures = Captures {
            params: HashMap::with_capacity(self.params.len()),
            wildcards: Vec::with_capacity(self.wildcards),
        };
        let capturing = self
            .segments
            .iter()
            .filter(|s| !matches!(s, Segment::Literal(_)));
        for (segment, value) in capturing.zip(caps) {
            match segment {
                Segment::Param(name) => {
                    captures.params.insert(name.clone(), value.to_string());
                }
                _ => captures.wildcards.push(value.to_string()),
            }
        }
        Some(captures)
    }

    fn match_from<'p>(&self, index: usize, rest: &'p str, caps: &mut Vec<&'p str>) -> bool {
        let Some(segment) = self.segments.get(index) else {
            return rest.is_empty() || rest == "/";
        };
        let last = index + 1 == self.segments.len();

        // `/files/**` accepts `/files` as well as `/files/`
        if *segment == Segment::Multi && last && rest.is_empty() {
            caps.push("");
            return true;
        }

        let Some(rest) = rest.strip_prefix('/') else {
            return false;
        };

        match segment {
            Segment::Literal(literal) => match rest.strip_prefix(literal.as_str()) {
                Some(tail) => self.match_from(index + 1, tail, caps),
                None => false,
            },
            Segment::Param(_) | Segment::Single => {
                let end = rest.find('/').unwrap_or(rest.len());
                if end == 0 {
                    return false;
                }
                caps.push(&rest[..end]);
                if self.match_from(index + 1, &rest[end..], caps) {
                    return true;
                }
                caps.pop();
                false
            }
            Segment::Multi if last => {
                caps.push(rest.strip_suffix('/').unwrap_or(rest));
                true
            }
            Segment::Multi => {
                // the next segment starts at a separator; try the longest capture first
                let mut ends: Vec<usize> = rest.match_indices('/').map(|(i, _)| i).collect();
                ends.push(rest.len());
                while let Some(end) = ends.pop() {
                    caps.push(&rest[..end]);
                    if self.match_from(index + 1, &rest[end..], caps) {
                        return true;
                    }
                    caps.pop();
                }
                false
            }
        }
    }
}
