//! Ant-style path patterns.
//!
//! Patterns and paths are split on `/` (empty segments ignored). A `*` segment matches
//! exactly one segment, `**` matches zero or more, and `*` / `?` inside a segment match any
//! run of characters / one character within that segment. `{name}` segments match one
//! segment like `*`.
use regex::Regex;

#[derive(Debug, Clone)]
enum AntSegment {
    Literal(String),
    AnySegment,
    AnyDepth,
    Glob(Regex),
}

impl AntSegment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            AntSegment::Literal(literal) => literal == segment,
            AntSegment::AnySegment => true,
            AntSegment::Glob(regex) => regex.is_match(segment),
            AntSegment::AnyDepth => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AntPattern {
    raw: String,
    segments: Vec<AntSegment>,
}

impl AntPattern {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        if pattern.trim().is_empty() {
            return Err("ant pattern must not be empty".to_string());
        }

        let mut segments: Vec<AntSegment> = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            let segment = match raw {
                "**" => {
                    // Consecutive `**` are equivalent to one
                    if matches!(segments.last(), Some(AntSegment::AnyDepth)) {
                        continue;
                    }
                    AntSegment::AnyDepth
                }
                "*" => AntSegment::AnySegment,
                _ if raw.starts_with('{') && raw.ends_with('}') && raw.len() > 2 => {
                    AntSegment::AnySegment
                }
                _ if raw.contains("**") => {
                    return Err(format!("'**' must be a whole segment in '{pattern}'"));
                }
                _ if raw.contains(['*', '?']) => AntSegment::Glob(Self::glob_regex(raw)?),
                _ => AntSegment::Literal(raw.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    fn glob_regex(segment: &str) -> Result<Regex, String> {
        let mut expr = String::with_capacity(segment.len() + 8);
        expr.push('^');
        for ch in segment.chars() {
            match ch {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        Regex::new(&expr).map_err(|e| e.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match_segments(&self.segments, &path)
    }
}

fn match_segments(pattern: &[AntSegment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((AntSegment::AnyDepth, rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((segment, rest)) => match path.split_first() {
            Some((head, tail)) => segment.matches(head) && match_segments(rest, tail),
            None => false,
        },
    }
}
