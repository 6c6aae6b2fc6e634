//! XML parsing into an owned element tree.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).
//! Namespace prefixes are resolved against the `xmlns` declarations in scope
//! while the tree is built, so every element knows its namespace URI.

use crate::error::SoapError;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local` or `local`)
    pub name: String,
    /// Namespace URI the element resolved to
    pub namespace: Option<String>,
    /// Attributes in document order, `xmlns` declarations included
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an element without attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Prefix part of the qualified name, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Local part of the qualified name.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Attribute value by qualified name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Namespace declarations made on this element as `(prefix, uri)`.
    /// The default namespace has an empty prefix.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(k, v)| {
            if k == "xmlns" {
                Some(("", v.as_str()))
            } else {
                k.strip_prefix("xmlns:").map(|p| (p, v.as_str()))
            }
        })
    }

    /// Direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First direct child with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.local_name() == local_name)
    }

    /// All descendant elements in document order (self excluded).
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Concatenated direct text content, `None` when there is none.
    pub fn text(&self) -> Option<String> {
        let mut text = String::new();
        let mut found = false;
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                text.push_str(t);
                found = true;
            }
        }
        found.then_some(text)
    }

    /// Whether the element has child elements.
    pub fn has_element_children(&self) -> bool {
        self.child_elements().next().is_some()
    }

    /// Remove prefixes and namespace declarations from the whole subtree.
    pub fn strip_namespaces(&mut self) {
        self.name = self.local_name().to_string();
        self.namespace = None;
        self.attributes.retain(|(k, _)| k != "xmlns" && !k.starts_with("xmlns:"));
        for (key, _) in self.attributes.iter_mut() {
            if let Some((_, local)) = key.split_once(':') {
                *key = local.to_string();
            }
        }
        for node in self.children.iter_mut() {
            if let XmlNode::Element(e) = node {
                e.strip_namespaces();
            }
        }
    }

    /// Put every element of the subtree that lives in `namespace` under
    /// `prefix`. Default declarations of that namespace are dropped since the
    /// prefix is expected to be declared by an ancestor.
    pub fn requalify(&mut self, namespace: &str, prefix: &str) {
        if self.namespace.as_deref() == Some(namespace) {
            self.name = format!("{}:{}", prefix, self.local_name());
        }
        self.attributes
            .retain(|(k, v)| !(k == "xmlns" && v == namespace));
        for node in self.children.iter_mut() {
            if let XmlNode::Element(e) = node {
                e.requalify(namespace, prefix);
            }
        }
    }

    /// Copy of this subtree that stays well-formed on its own: namespace
    /// declarations made by `ancestors` (outermost first) are re-declared on
    /// the copy when the subtree uses them.
    pub fn detached(&self, ancestors: &[&XmlElement]) -> XmlElement {
        let mut used = Vec::new();
        collect_prefixes(self, &mut used);

        let mut copy = self.clone();
        for ancestor in ancestors.iter().rev() {
            for (prefix, uri) in ancestor.declarations() {
                let key = if prefix.is_empty() {
                    "xmlns".to_string()
                } else {
                    format!("xmlns:{}", prefix)
                };
                if used.iter().any(|p| p == prefix) && copy.attr(&key).is_none() {
                    copy.attributes.push((key, uri.to_string()));
                }
            }
        }
        copy
    }

    /// Serialize the subtree without any added whitespace.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_compact(&mut out);
        out
    }

    /// Serialize the subtree with two-space indentation.
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::new();
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_open(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
    }

    fn write_compact(&self, out: &mut String) {
        self.write_open(out);
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(e) => e.write_compact(out),
                XmlNode::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn write_pretty(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        if !self.has_element_children() {
            self.write_compact(out);
            out.push('\n');
            return;
        }
        self.write_open(out);
        out.push_str(">\n");
        for node in &self.children {
            match node {
                XmlNode::Element(e) => e.write_pretty(out, depth + 1),
                XmlNode::Text(t) => {
                    out.push_str(&"  ".repeat(depth + 1));
                    out.push_str(&escape(t.as_str()));
                    out.push('\n');
                }
            }
        }
        out.push_str(&indent);
        out.push_str("</");
        out.push_str(&self.name);
        out.push_str(">\n");
    }
}

fn collect_descendants<'a>(element: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in element.child_elements() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn collect_prefixes(element: &XmlElement, out: &mut Vec<String>) {
    let mut note = |prefix: &str| {
        if !out.iter().any(|p| p == prefix) {
            out.push(prefix.to_string());
        }
    };
    match element.prefix() {
        Some(prefix) => note(prefix),
        None if element.namespace.is_some() => note(""),
        None => {}
    }
    for (key, _) in &element.attributes {
        if let Some((prefix, _)) = key.split_once(':') {
            if prefix != "xmlns" && prefix != "xml" {
                note(prefix);
            }
        }
    }
    for child in element.child_elements() {
        collect_prefixes(child, out);
    }
}

/// Parse a document with exactly one root element.
pub fn parse_document(xml: &str) -> Result<XmlElement, SoapError> {
    let mut reader = Reader::from_str(xml);

    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let element = open_element(e, &mut scopes)?;
                stack.push(element);
            }

            Ok(Event::Empty(ref e)) => {
                // Self-closing tags like <DeleteUser/>
                let element = open_element(e, &mut scopes)?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }

            Ok(Event::End(_)) => {
                scopes.pop();
                let element = stack.pop().ok_or_else(|| {
                    SoapError::XmlParse("Unexpected closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, element)?;
            }

            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| SoapError::XmlParse(format!("Invalid text content: {}", err)))?;
                push_text(&mut stack, &text)?;
            }

            Ok(Event::CData(e)) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|err| SoapError::XmlParse(format!("Invalid UTF-8 in CDATA: {}", err)))?;
                push_text(&mut stack, &text)?;
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SoapError::XmlParse(format!(
                    "{} at position {}",
                    e,
                    reader.error_position()
                )));
            }

            Ok(Event::DocType(_)) => {
                return Err(SoapError::XmlParse(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }

            // Declarations, comments, processing instructions
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(SoapError::XmlParse(format!(
            "Unclosed element <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| SoapError::XmlParse("No root element found".to_string()))
}

/// Whether the string is a well-formed single-root XML document.
pub fn is_well_formed(xml: &str) -> bool {
    parse_document(xml).is_ok()
}

fn open_element(
    e: &BytesStart,
    scopes: &mut Vec<Vec<(String, String)>>,
) -> Result<XmlElement, SoapError> {
    let name = decode_name(e.name().as_ref())?;

    let mut attributes = Vec::new();
    let mut bindings = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SoapError::XmlParse(format!("Invalid attribute: {}", err)))?;
        let key = decode_name(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|err| SoapError::XmlParse(format!("Invalid attribute value: {}", err)))?
            .into_owned();

        if key == "xmlns" {
            bindings.push((String::new(), value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.push((prefix.to_string(), value.clone()));
        }
        attributes.push((key, value));
    }
    scopes.push(bindings);

    let prefix = name.split_once(':').map(|(p, _)| p).unwrap_or("");
    let namespace = resolve_prefix(scopes, prefix);
    if !prefix.is_empty() && namespace.is_none() {
        return Err(SoapError::XmlParse(format!(
            "Unbound namespace prefix '{}' on <{}>",
            prefix, name
        )));
    }

    Ok(XmlElement {
        name,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn resolve_prefix(scopes: &[Vec<(String, String)>], prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some(XML_NS.to_string());
    }
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
        // xmlns="" undeclares the default namespace
        .filter(|uri| !uri.is_empty())
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), SoapError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(SoapError::XmlParse(format!(
            "Multiple root elements: unexpected <{}>",
            element.name
        ))),
    }
}

fn push_text(stack: &mut [XmlElement], text: &str) -> Result<(), SoapError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            // Merge with a preceding text node (text split by an entity or CDATA)
            if let Some(XmlNode::Text(prev)) = parent.children.last_mut() {
                prev.push_str(text);
            } else {
                parent.children.push(XmlNode::Text(text.to_string()));
            }
            Ok(())
        }
        None => Err(SoapError::XmlParse(
            "Text content outside of the root element".to_string(),
        )),
    }
}

fn decode_name(bytes: &[u8]) -> Result<String, SoapError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| SoapError::XmlParse(format!("Invalid UTF-8 in name: {}", e)))
}

/// Whether `name` is usable as an XML element name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        && name.matches(':').count() <= 1
        && !name.ends_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SOAP_11_NS, SOAP_12_NS};

    const SOAP_11_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <m:Trans xmlns:m="http://example.org/trans">234</m:Trans>
  </soap:Header>
  <soap:Body>
    <m:GetPrice xmlns:m="http://example.org/stock">
      <m:Item>Apples &amp; Pears</m:Item>
    </m:GetPrice>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_resolves_namespaces() {
        let root = parse_document(SOAP_11_SAMPLE).unwrap();
        assert_eq!(root.local_name(), "Envelope");
        assert_eq!(root.prefix(), Some("soap"));
        assert_eq!(root.namespace.as_deref(), Some(SOAP_11_NS));

        let body = root.child("Body").unwrap();
        let op = body.child("GetPrice").unwrap();
        assert_eq!(op.namespace.as_deref(), Some("http://example.org/stock"));
        assert_eq!(op.child("Item").unwrap().text().as_deref(), Some("Apples & Pears"));
    }

    #[test]
    fn test_default_namespace_is_inherited() {
        let root = parse_document(
            r#"<a xmlns="urn:one"><b><c xmlns="">x</c></b></a>"#,
        )
        .unwrap();
        let b = root.child("b").unwrap();
        assert_eq!(b.namespace.as_deref(), Some("urn:one"));
        assert_eq!(b.child("c").unwrap().namespace, None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_document("<not-closed").is_err());
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a/><b/>").is_err());
        assert!(parse_document("").is_err());
        assert!(parse_document("plain text").is_err());
        assert!(parse_document("<x:a/>").is_err());
    }

    #[test]
    fn test_parse_rejects_doctype() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<foo>&xxe;</foo>"#;
        let err = parse_document(xml).unwrap_err();
        assert!(err.to_string().contains("DOCTYPE"));
    }

    #[test]
    fn test_serialize_escapes_content() {
        let root = parse_document(r#"<a k="&quot;q&quot;">1 &lt; 2</a>"#).unwrap();
        let out = root.to_xml_string();
        let reparsed = parse_document(&out).unwrap();
        assert_eq!(reparsed.text().as_deref(), Some("1 < 2"));
        assert_eq!(reparsed.attr("k"), Some("\"q\""));
    }

    #[test]
    fn test_strip_namespaces() {
        let mut root = parse_document(SOAP_11_SAMPLE).unwrap();
        root.strip_namespaces();
        let out = root.to_xml_string();
        assert!(!out.contains("xmlns"));
        assert!(out.starts_with("<Envelope>"));
        assert!(out.contains("<Item>Apples &amp; Pears</Item>"));
    }

    #[test]
    fn test_requalify() {
        let mut root = parse_document(
            r#"<GetUser xmlns="urn:users"><Id>1</Id><x:Other xmlns:x="urn:x"/></GetUser>"#,
        )
        .unwrap();
        root.requalify("urn:users", "u");
        let out = root.to_xml_string();
        assert_eq!(out, r#"<u:GetUser><u:Id>1</u:Id><x:Other xmlns:x="urn:x"/></u:GetUser>"#);
    }

    #[test]
    fn test_pretty_print() {
        let root = parse_document("<a><b>1</b><c/></a>").unwrap();
        assert_eq!(root.to_pretty_string(), "<a>\n  <b>1</b>\n  <c/>\n</a>\n");
    }

    #[test]
    fn test_soap12_namespace() {
        let root = parse_document(&format!(
            r#"<env:Envelope xmlns:env="{}"><env:Body/></env:Envelope>"#,
            SOAP_12_NS
        ))
        .unwrap();
        assert_eq!(root.namespace.as_deref(), Some(SOAP_12_NS));
        assert_eq!(root.descendants().len(), 1);
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("NumberToWords"));
        assert!(is_valid_name("ns:Item"));
        assert!(is_valid_name("_x-1.2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("a:b:c"));
    }
}
