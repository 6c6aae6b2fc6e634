//! Path expressions over the element tree.
//!
//! Supports the ElementTree path subset that extraction needs:
//!
//! - `tag`, `*`, `.`, `{uri}tag`, `prefix:tag`
//! - `//` for any depth (a leading `/` or `//` is accepted and relative to the root)
//! - predicates `[@attr]`, `[@attr='v']`, `[tag]`, `[tag='v']`, `[n]`, `[last()]`
//!
//! Paths are evaluated relative to the root element, so `Body/GetUser` selects
//! children of the root, and `.//Name` searches the whole tree.

use crate::error::SoapError;
use crate::parser::XmlElement;

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    expr: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    descendant: bool,
    test: NameTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Current,
    Any,
    Local(String),
    Qualified(String),
    Expanded { namespace: String, local: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasAttr(String),
    AttrEquals(String, String),
    HasChild(String),
    ChildEquals(String, String),
    Position(usize),
    Last,
}

impl XPath {
    /// Compile an expression.
    pub fn parse(expr: &str) -> Result<Self, SoapError> {
        let invalid = |reason: &str| {
            SoapError::Extraction(format!("Invalid XPath expression '{}': {}", expr, reason))
        };

        let mut rest = expr.trim();
        if rest.is_empty() {
            return Err(invalid("expression is empty"));
        }

        let mut pending_descendant = false;
        if let Some(r) = rest.strip_prefix("//") {
            pending_descendant = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        }

        let segments = split_segments(rest).map_err(|e| invalid(&e))?;
        let mut steps = Vec::new();
        for segment in segments {
            if segment.is_empty() {
                if pending_descendant {
                    return Err(invalid("unexpected '///'"));
                }
                pending_descendant = true;
                continue;
            }
            let step = parse_step(&segment, pending_descendant).map_err(|e| invalid(&e))?;
            steps.push(step);
            pending_descendant = false;
        }

        if pending_descendant || steps.is_empty() {
            return Err(invalid("path must end with a node test"));
        }

        Ok(Self {
            expr: expr.to_string(),
            steps,
        })
    }

    /// The source expression.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// All matching elements in document order.
    pub fn find_all<'a>(&self, root: &'a XmlElement) -> Vec<&'a XmlElement> {
        let mut current = vec![root];
        for step in &self.steps {
            let mut next: Vec<&XmlElement> = Vec::new();
            for &node in &current {
                let candidates: Vec<&XmlElement> = match (&step.test, step.descendant) {
                    (NameTest::Current, false) => vec![node],
                    (NameTest::Current, true) => {
                        let mut all = vec![node];
                        all.extend(node.descendants());
                        all
                    }
                    (test, true) => node.descendants().into_iter().filter(|e| test.matches(e)).collect(),
                    (test, false) => node.child_elements().filter(|e| test.matches(e)).collect(),
                };
                for found in apply_predicates(candidates, &step.predicates) {
                    if !next.iter().any(|seen| std::ptr::eq(*seen, found)) {
                        next.push(found);
                    }
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// First matching element.
    pub fn find<'a>(&self, root: &'a XmlElement) -> Option<&'a XmlElement> {
        self.find_all(root).into_iter().next()
    }
}

impl NameTest {
    fn matches(&self, element: &XmlElement) -> bool {
        match self {
            Self::Current | Self::Any => true,
            Self::Local(name) => element.local_name() == name,
            Self::Qualified(name) => element.name == *name,
            Self::Expanded { namespace, local } => {
                element.local_name() == local
                    && element.namespace.as_deref().unwrap_or("") == namespace
            }
        }
    }
}

fn apply_predicates<'a>(
    mut nodes: Vec<&'a XmlElement>,
    predicates: &[Predicate],
) -> Vec<&'a XmlElement> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
            Predicate::Last => nodes.last().copied().into_iter().collect(),
            Predicate::HasAttr(key) => nodes.into_iter().filter(|e| e.attr(key).is_some()).collect(),
            Predicate::AttrEquals(key, value) => nodes
                .into_iter()
                .filter(|e| e.attr(key) == Some(value.as_str()))
                .collect(),
            Predicate::HasChild(tag) => nodes
                .into_iter()
                .filter(|e| e.child_elements().any(|c| c.local_name() == tag))
                .collect(),
            Predicate::ChildEquals(tag, value) => nodes
                .into_iter()
                .filter(|e| {
                    e.child_elements().any(|c| {
                        c.local_name() == tag && c.text().as_deref() == Some(value.as_str())
                    })
                })
                .collect(),
        };
    }
    nodes
}

/// Split on `/` outside of braces, brackets and quotes.
/// An empty segment marks a `//`.
fn split_segments(path: &str) -> Result<Vec<String>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut brace = false;
    let mut bracket = 0usize;
    let mut quote: Option<char> = None;

    for c in path.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
                continue;
            }
            None if bracket > 0 && (c == '\'' || c == '"') => {
                quote = Some(c);
                current.push(c);
                continue;
            }
            None => {}
        }
        match c {
            '{' => brace = true,
            '}' => brace = false,
            '[' => bracket += 1,
            ']' => bracket = bracket.checked_sub(1).ok_or("unbalanced ']'")?,
            '/' if !brace && bracket == 0 => {
                segments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if brace || bracket > 0 || quote.is_some() {
        return Err("unterminated '{', '[' or quote".to_string());
    }
    segments.push(current);
    Ok(segments)
}

fn parse_step(segment: &str, descendant: bool) -> Result<Step, String> {
    let (test_part, predicate_part) = match segment.find('[') {
        Some(idx) if !segment[..idx].contains('{') || segment[..idx].contains('}') => {
            (&segment[..idx], &segment[idx..])
        }
        _ => (segment, ""),
    };

    let test = match test_part.trim() {
        "" => return Err("missing node test".to_string()),
        "." => NameTest::Current,
        "*" => NameTest::Any,
        ".." => return Err("parent steps are not supported".to_string()),
        t if t.starts_with('{') => {
            let (namespace, local) = t[1..]
                .split_once('}')
                .ok_or_else(|| "unterminated '{'".to_string())?;
            NameTest::Expanded {
                namespace: namespace.to_string(),
                local: local.to_string(),
            }
        }
        t if t.contains(':') => NameTest::Qualified(t.to_string()),
        t => NameTest::Local(t.to_string()),
    };

    let mut predicates = Vec::new();
    let mut rest = predicate_part;
    while !rest.is_empty() {
        let inner_end = rest
            .find(']')
            .ok_or_else(|| "unterminated predicate".to_string())?;
        if !rest.starts_with('[') {
            return Err(format!("unexpected '{}'", rest));
        }
        predicates.push(parse_predicate(rest[1..inner_end].trim())?);
        rest = &rest[inner_end + 1..];
    }

    Ok(Step {
        descendant,
        test,
        predicates,
    })
}

fn parse_predicate(inner: &str) -> Result<Predicate, String> {
    if inner == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(n) = inner.parse::<usize>() {
        if n == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(n));
    }

    let (lhs, value) = match inner.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(unquote(rhs.trim())?)),
        None => (inner, None),
    };

    match (lhs.strip_prefix('@'), value) {
        (Some(attr), None) => Ok(Predicate::HasAttr(attr.to_string())),
        (Some(attr), Some(v)) => Ok(Predicate::AttrEquals(attr.to_string(), v)),
        (None, None) if !lhs.is_empty() => Ok(Predicate::HasChild(lhs.to_string())),
        (None, Some(v)) if !lhs.is_empty() => Ok(Predicate::ChildEquals(lhs.to_string(), v)),
        _ => Err(format!("unsupported predicate '[{}]'", inner)),
    }
}

fn unquote(s: &str) -> Result<String, String> {
    let quoted = (s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"'));
    if s.len() >= 2 && quoted {
        Ok(s[1..s.len() - 1].to_string())
    } else {
        Err(format!("predicate value {} must be quoted", s))
    }
}
