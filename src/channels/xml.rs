//! A small element tree over quick-xml events.
//!
//! Page descriptors are a few kilobytes each and are queried with a handful
//! of paths, so a full tree is simpler than streaming.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::MetadataError;

/// One XML element with its attributes, text and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated text and CDATA directly inside this element, trimmed
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Element, MetadataError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    stack.push(Self::open(e)?);
                }
                Ok(Event::Empty(ref e)) => {
                    let element = Self::open(e)?;
                    Self::close(element, &mut stack, &mut root)?;
                }
                Ok(Event::End(_)) => match stack.pop() {
                    Some(element) => Self::close(element, &mut stack, &mut root)?,
                    None => return Err(MetadataError::Xml("unbalanced end tag".to_string())),
                },
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| MetadataError::Xml(err.to_string()))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(text.trim());
                    }
                }
                Ok(Event::CData(e)) => {
                    let bytes = e.into_inner();
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(String::from_utf8_lossy(&bytes).trim());
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(MetadataError::Xml(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(MetadataError::Xml(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        root.ok_or_else(|| MetadataError::Xml("document has no root element".to_string()))
    }

    fn open(start: &BytesStart<'_>) -> Result<Element, MetadataError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| MetadataError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| MetadataError::Xml(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            name,
            attributes,
            ..Element::default()
        })
    }

    fn close(
        element: Element,
        stack: &mut [Element],
        root: &mut Option<Element>,
    ) -> Result<(), MetadataError> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => *root = Some(element),
            None => {
                return Err(MetadataError::Xml(format!(
                    "second root element <{}>",
                    element.name
                )))
            }
        }
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct children named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Every element below this one, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// First element matching a path, in document order.
    ///
    /// `A/B` walks children; `.//A/B` finds `A` at any depth below this
    /// element and then walks to its `B` child.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let (anywhere, rest) = match path.strip_prefix(".//") {
            Some(rest) => (true, rest),
            None => (false, path.strip_prefix("./").unwrap_or(path)),
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let (first, tail) = segments.split_first()?;

        if anywhere {
            self.descendants()
                .into_iter()
                .filter(|e| e.name == *first)
                .find_map(|e| e.follow(tail))
        } else {
            self.children
                .iter()
                .filter(|e| e.name == *first)
                .find_map(|e| e.follow(tail))
        }
    }

    /// Text of the first element matching `path`, if non-empty.
    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path)
            .map(|e| e.text.as_str())
            .filter(|text| !text.is_empty())
    }

    fn follow(&self, segments: &[&str]) -> Option<&Element> {
        match segments.split_first() {
            None => Some(self),
            Some((head, tail)) => self
                .children
                .iter()
                .filter(|c| c.name == *head)
                .find_map(|c| c.follow(tail)),
        }
    }
}
