//! Path segment syntax
//!
//! A segment is one or more `/`-separated components. Each component is a
//! literal (`destinations`) or a typed parameter (`{country:string}`,
//! `{id:int}`). A parameter without a type is a `string`.

use std::fmt;

use super::RouteError;

/// Type a parameter component must parse as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Int,
    Uint,
    Float,
    /// Unix seconds
    Timestamp,
}

impl ParamType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "int" => Some(ParamType::Int),
            "uint" => Some(ParamType::Uint),
            "float" => Some(ParamType::Float),
            "timestamp" => Some(ParamType::Timestamp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Uint => "uint",
            ParamType::Float => "float",
            ParamType::Timestamp => "timestamp",
        }
    }

    /// Whether `text` is a valid value of this type.
    pub fn accepts(self, text: &str) -> bool {
        match self {
            ParamType::String => !text.is_empty(),
            ParamType::Int | ParamType::Timestamp => text.parse::<i64>().is_ok(),
            ParamType::Uint => text.parse::<u64>().is_ok(),
            ParamType::Float => text.parse::<f64>().is_ok_and(f64::is_finite),
        }
    }
}

/// One `/`-delimited piece of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Literal(String),
    Param { name: String, ty: ParamType },
}

impl Component {
    fn parse(text: &str, segment: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidSegment {
            segment: segment.to_string(),
            reason,
        };

        let Some(inner) = text.strip_prefix('{') else {
            if text.contains(['{', '}']) {
                return Err(invalid("braces are only allowed around a whole component"));
            }
            if text.starts_with([':', '*']) {
                return Err(invalid("components cannot start with ':' or '*'"));
            }
            return Ok(Component::Literal(text.to_string()));
        };

        let inner = inner
            .strip_suffix('}')
            .ok_or_else(|| invalid("unterminated parameter"))?;
        let (name, ty) = match inner.split_once(':') {
            Some((name, ty)) => (
                name,
                ParamType::from_name(ty).ok_or_else(|| invalid("unknown parameter type"))?,
            ),
            None => (inner, ParamType::String),
        };
        if !is_identifier(name) {
            return Err(invalid("parameter names must be identifiers"));
        }

        Ok(Component::Param {
            name: name.to_string(),
            ty,
        })
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Literal(text) => f.write_str(text),
            Component::Param { name, .. } => write!(f, "{{{name}}}"),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a segment string into components. Leading, trailing and repeated
/// slashes are ignored.
pub(crate) fn parse_segment(segment: &str) -> Result<Vec<Component>, RouteError> {
    let components = segment
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| Component::parse(part, segment))
        .collect::<Result<Vec<_>, _>>()?;

    if components.is_empty() {
        return Err(RouteError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment has no components",
        });
    }
    Ok(components)
}

/// Path template: parameters rendered as `{name}`, types dropped.
pub(crate) fn template(components: &[Component]) -> String {
    if components.is_empty() {
        return "/".to_string();
    }
    components.iter().map(|c| format!("/{c}")).collect()
}

/// Check the typed parameters of a matched request path.
pub(crate) fn accepts(components: &[Component], path: &str) -> bool {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() != components.len() {
        return true;
    }
    components.iter().zip(parts).all(|(component, part)| match component {
        Component::Literal(_) => true,
        Component::Param { ty, .. } => ty.accepts(part),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals_and_params() {
        let components = parse_segment("/api/v1/{country}/{id:uint}").unwrap();
        assert_eq!(
            components,
            [
                Component::Literal("api".into()),
                Component::Literal("v1".into()),
                Component::Param {
                    name: "country".into(),
                    ty: ParamType::String
                },
                Component::Param {
                    name: "id".into(),
                    ty: ParamType::Uint
                },
            ]
        );
    }

    #[test]
    fn template_strips_types() {
        let components = parse_segment("api/v1/destinations/{country:string}/{city:string}").unwrap();
        assert_eq!(
            template(&components),
            "/api/v1/destinations/{country}/{city}"
        );
        assert_eq!(template(&[]), "/");
    }

    #[test]
    fn rejects_malformed_components() {
        for segment in ["", "/", "{country", "{}", "{1abc}", "{id:decimal}", "a{b}", ":id", "*rest"] {
            assert!(
                matches!(parse_segment(segment), Err(RouteError::InvalidSegment { .. })),
                "{segment:?} should be rejected"
            );
        }
    }

    #[test]
    fn typed_params_validate_values() {
        assert!(ParamType::Int.accepts("-12"));
        assert!(!ParamType::Int.accepts("twelve"));
        assert!(ParamType::Uint.accepts("12"));
        assert!(!ParamType::Uint.accepts("-12"));
        assert!(ParamType::Float.accepts("48.85"));
        assert!(!ParamType::Float.accepts("NaN"));
        assert!(ParamType::Timestamp.accepts("1700000000"));
        assert!(ParamType::String.accepts("Paris"));
    }

    #[test]
    fn accepts_checks_each_param() {
        let components = parse_segment("destinations/{id:int}").unwrap();
        assert!(accepts(&components, "/destinations/42"));
        assert!(!accepts(&components, "/destinations/paris"));
    }
}
