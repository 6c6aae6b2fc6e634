//! XML body value object and the map-to-XML builder.

use crate::config::{SOAP_11_NS, SOAP_12_NS};
use crate::error::SoapError;
use crate::parser::{self, XmlElement, XmlNode};
use crate::xpath::XPath;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use tracing::warn;

/// Structured input for the body builder.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum XmlValue {
    /// Rendered as an empty element
    #[default]
    Null,
    /// Rendered as element text
    Scalar(String),
    /// Rendered as one sibling element per item
    Sequence(Vec<XmlValue>),
    /// Rendered as nested child elements
    Map(XmlMap),
}

/// Insertion-ordered mapping of element names to values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlMap(Vec<(String, XmlValue)>);

impl XmlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing an existing entry with the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<XmlValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<XmlValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&XmlValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &XmlValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>, V: Into<XmlValue>> FromIterator<(K, V)> for XmlMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl From<&str> for XmlValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for XmlValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for XmlValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<f64> for XmlValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<bool> for XmlValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl<T: Into<XmlValue>> From<Option<T>> for XmlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<Vec<XmlValue>> for XmlValue {
    fn from(value: Vec<XmlValue>) -> Self {
        Self::Sequence(value)
    }
}

impl From<XmlMap> for XmlValue {
    fn from(value: XmlMap) -> Self {
        Self::Map(value)
    }
}

impl From<Value> for XmlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Scalar(b.to_string()),
            Value::Number(n) => Self::Scalar(n.to_string()),
            Value::String(s) => Self::Scalar(s),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().collect()),
        }
    }
}

impl TryFrom<Value> for XmlMap {
    type Error = SoapError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(SoapError::InvalidInput(format!(
                "body_dict must be a mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Namespace applied uniformly to generated elements.
struct Qualifier<'a> {
    namespace: Option<&'a str>,
    prefix: Option<&'a str>,
}

impl Qualifier<'_> {
    fn name(&self, key: &str) -> String {
        match (self.namespace, self.prefix) {
            (Some(_), Some(prefix)) => format!("{}:{}", prefix, key),
            _ => key.to_string(),
        }
    }

    fn element(&self, key: &str) -> Result<XmlElement, SoapError> {
        if key.contains(':') || !parser::is_valid_name(key) {
            return Err(SoapError::Construction(format!(
                "'{}' is not a valid element name",
                key
            )));
        }
        let mut element = XmlElement::new(self.name(key));
        element.namespace = self.namespace.map(str::to_string);
        Ok(element)
    }

    fn declare(&self, element: &mut XmlElement) {
        match (self.namespace, self.prefix) {
            (Some(ns), Some(prefix)) => element.set_attr(format!("xmlns:{}", prefix), ns),
            (Some(ns), None) => element.set_attr("xmlns", ns),
            _ => {}
        }
    }

    fn build(&self, key: &str, value: &XmlValue) -> Result<Vec<XmlElement>, SoapError> {
        match value {
            XmlValue::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.extend(self.build(key, item)?);
                }
                Ok(out)
            }
            XmlValue::Null => Ok(vec![self.element(key)?]),
            XmlValue::Scalar(text) => {
                let mut element = self.element(key)?;
                if !text.is_empty() {
                    element.children.push(XmlNode::Text(text.clone()));
                }
                Ok(vec![element])
            }
            XmlValue::Map(map) => {
                let mut element = self.element(key)?;
                self.fill(&mut element, map)?;
                Ok(vec![element])
            }
        }
    }

    fn fill(&self, parent: &mut XmlElement, map: &XmlMap) -> Result<(), SoapError> {
        for (key, value) in map.iter() {
            for child in self.build(key, value)? {
                parent.children.push(XmlNode::Element(child));
            }
        }
        Ok(())
    }
}

/// Immutable XML body.
///
/// A body built through [`XmlBody::parse`] is guaranteed to be a well-formed
/// single-root document. [`XmlBody::permissive`] skips that check and is only
/// meant as an intermediate value during construction.
#[derive(Debug, Clone)]
pub struct XmlBody {
    value: String,
    validated: bool,
}

impl XmlBody {
    /// Wrap a string after checking it is well-formed XML.
    pub fn parse(xml: &str) -> Result<Self, SoapError> {
        let value = xml.trim();
        if value.is_empty() {
            return Err(SoapError::XmlParse("XML body must not be empty".to_string()));
        }
        parser::parse_document(value)?;
        Ok(Self {
            value: value.to_string(),
            validated: true,
        })
    }

    /// Wrap a string without validation.
    pub fn permissive(xml: impl Into<String>) -> Self {
        Self {
            value: xml.into(),
            validated: false,
        }
    }

    /// Build a body from structured data.
    ///
    /// With `root_tag` every key of `data` becomes a child of one root element.
    /// Without it each top-level key becomes its own element; more than one key
    /// yields sibling elements, which is logged as ambiguous and produces a
    /// permissive body that envelope construction will reject.
    ///
    /// When `namespace` is set it applies to every generated element, either as
    /// the default namespace or, with `prefix`, through that prefix.
    pub fn from_map(
        data: &XmlMap,
        root_tag: Option<&str>,
        namespace: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Self, SoapError> {
        if data.is_empty() {
            return Err(SoapError::Construction(
                "Cannot build an XML body from empty data".to_string(),
            ));
        }

        let qualifier = Qualifier {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            prefix: prefix.filter(|p| !p.is_empty()),
        };

        let elements = match root_tag {
            Some(tag) => {
                let mut root = qualifier.element(tag)?;
                qualifier.fill(&mut root, data)?;
                vec![root]
            }
            None => {
                if data.len() > 1 {
                    warn!(
                        keys = ?data.keys().collect::<Vec<_>>(),
                        "Body data has several top-level keys and no root tag; emitting sibling elements"
                    );
                }
                let mut out = Vec::new();
                for (key, value) in data.iter() {
                    out.extend(qualifier.build(key, value)?);
                }
                out
            }
        };

        let validated = elements.len() == 1;
        let mut value = String::new();
        for mut element in elements {
            qualifier.declare(&mut element);
            value.push_str(&element.to_xml_string());
        }

        Ok(Self { value, validated })
    }

    /// Whether the content was checked to be a single well-formed document.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Parsed root element.
    pub fn root(&self) -> Result<XmlElement, SoapError> {
        parser::parse_document(&self.value)
    }

    /// Local name of the root element.
    pub fn root_tag(&self) -> Result<String, SoapError> {
        Ok(self.root()?.local_name().to_string())
    }

    /// Indented rendering; the raw value when it does not parse.
    pub fn to_pretty_string(&self) -> String {
        match self.root() {
            Ok(root) => root.to_pretty_string(),
            Err(_) => self.value.clone(),
        }
    }

    /// Flatten into a JSON mapping keyed by the root tag.
    ///
    /// Attributes land under `@attributes`, repeated tags become lists and
    /// elements holding only text collapse to that text.
    pub fn to_map(&self) -> Result<Value, SoapError> {
        let root = self.root()?;
        let mut out = Map::new();
        out.insert(root.name.clone(), element_to_value(&root));
        Ok(Value::Object(out))
    }

    /// Copy without namespace prefixes or declarations.
    pub fn strip_namespaces(&self) -> Result<Self, SoapError> {
        let mut root = self.root()?;
        root.strip_namespaces();
        Ok(Self {
            value: root.to_xml_string(),
            validated: true,
        })
    }

    /// Whether any element declares `uri`.
    pub fn has_namespace(&self, uri: &str) -> bool {
        match self.root() {
            Ok(root) => std::iter::once(&root)
                .chain(root.descendants())
                .any(|e| e.declarations().any(|(_, v)| v == uri)),
            Err(_) => false,
        }
    }

    /// Namespace declarations of the root element; the default one is keyed `default`.
    pub fn namespaces(&self) -> Result<BTreeMap<String, String>, SoapError> {
        let root = self.root()?;
        Ok(root
            .declarations()
            .map(|(prefix, uri)| {
                let key = if prefix.is_empty() { "default" } else { prefix };
                (key.to_string(), uri.to_string())
            })
            .collect())
    }

    /// Text of the first element matching `path`.
    ///
    /// `Ok(None)` when nothing matches or the match has no text; an invalid
    /// expression is an extraction error.
    pub fn find(&self, path: &str) -> Result<Option<String>, SoapError> {
        let xpath = XPath::parse(path)?;
        let root = self
            .root()
            .map_err(|e| SoapError::Extraction(e.to_string()))?;
        Ok(xpath.find(&root).and_then(XmlElement::text))
    }

    /// Text of every element matching `path`.
    pub fn find_all(&self, path: &str) -> Result<Vec<String>, SoapError> {
        let xpath = XPath::parse(path)?;
        let root = self
            .root()
            .map_err(|e| SoapError::Extraction(e.to_string()))?;
        Ok(xpath
            .find_all(&root)
            .into_iter()
            .map(|e| e.text().unwrap_or_default())
            .collect())
    }

    /// Whether the root is a SOAP Envelope.
    ///
    /// Namespace-stripped envelopes (bare `Envelope` root) also count.
    pub fn is_soap_envelope(&self) -> bool {
        match self.root() {
            Ok(root) => is_envelope_element(&root),
            Err(_) => false,
        }
    }

    /// First element inside the SOAP Body, detached with the namespace
    /// declarations it relies on.
    pub fn extract_body_content(&self) -> Option<XmlBody> {
        let root = self.root().ok()?;
        if !is_envelope_element(&root) {
            return None;
        }
        let body = root
            .child_elements()
            .find(|e| e.local_name() == "Body" && e.namespace == root.namespace)?;
        let content = body.child_elements().next()?;
        Some(Self {
            value: content.detached(&[&root, body]).to_xml_string(),
            validated: true,
        })
    }

    /// Copy with whitespace between tags removed.
    pub fn minify(&self) -> Self {
        Self {
            value: minify_str(&self.value),
            validated: self.validated,
        }
    }
}

fn is_envelope_element(root: &XmlElement) -> bool {
    root.local_name() == "Envelope"
        && matches!(
            root.namespace.as_deref(),
            None | Some(SOAP_11_NS) | Some(SOAP_12_NS)
        )
}

fn minify_str(xml: &str) -> String {
    static BETWEEN_TAGS: OnceLock<Regex> = OnceLock::new();
    let re = BETWEEN_TAGS.get_or_init(|| Regex::new(r">\s+<").expect("static regex"));
    re.replace_all(xml, "><").trim().to_string()
}

fn element_to_value(element: &XmlElement) -> Value {
    let mut result = Map::new();

    let attributes: Map<String, Value> = element
        .attributes
        .iter()
        .filter(|(k, _)| k != "xmlns" && !k.starts_with("xmlns:"))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if !attributes.is_empty() {
        result.insert("@attributes".to_string(), Value::Object(attributes));
    }

    for child in element.child_elements() {
        let child_value = element_to_value(child);
        match result.get_mut(&child.name) {
            Some(Value::Array(items)) => items.push(child_value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, child_value]);
            }
            None => {
                result.insert(child.name.clone(), child_value);
            }
        }
    }

    let text = element.text().map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    match text {
        Some(text) if result.is_empty() => Value::String(text),
        Some(text) => {
            result.insert("#text".to_string(), Value::String(text));
            Value::Object(result)
        }
        None if result.is_empty() => Value::Null,
        None => Value::Object(result),
    }
}

impl fmt::Display for XmlBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Whitespace-insensitive comparison.
impl PartialEq for XmlBody {
    fn eq(&self, other: &Self) -> bool {
        minify_str(&self.value) == minify_str(&other.value)
    }
}

impl Eq for XmlBody {}

impl Hash for XmlBody {
    fn hash<H: Hasher>(&self, state: &mut H) {
        minify_str(&self.value).hash(state);
    }
}
