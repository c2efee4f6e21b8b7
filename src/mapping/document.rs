use std::io;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Output tree node. Element-only content; attributes are never produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    name: String,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// First child named `name`, created at the end when missing.
    pub fn child_mut(&mut self, name: &str) -> &mut Element {
        let idx = match self.children.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.children.push(Element::new(name));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    /// Walk `segments` from this node, reusing the first same-named child at
    /// every level, and set the leaf text. Blank values create nothing.
    pub fn emit<S: AsRef<str>>(&mut self, segments: &[S], value: &str) -> bool {
        if value.trim().is_empty() || segments.is_empty() {
            return false;
        }
        let mut node = self;
        for segment in segments {
            node = node.child_mut(segment.as_ref());
        }
        node.text = Some(value.to_string());
        true
    }

    /// Dot-path lookup, first match at each level.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('.')
            .try_fold(self, |node, name| node.children.iter().find(|c| c.name == name))
    }

    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path)?.text()
    }

    /// All leaf nodes with their dot paths relative to this node.
    pub fn leaves(&self) -> Vec<(String, &Element)> {
        let mut out = Vec::new();
        for child in &self.children {
            child.collect_leaves(String::new(), &mut out);
        }
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: String, out: &mut Vec<(String, &'a Element)>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}.{}", self.name)
        };
        if self.children.is_empty() {
            out.push((path, self));
            return;
        }
        for child in &self.children {
            child.collect_leaves(path.clone(), out);
        }
    }

    pub fn write_to<W: io::Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        if self.text.is_none() && self.children.is_empty() {
            return writer.write_event(Event::Empty(BytesStart::new(self.name.as_str())));
        }
        writer.write_event(Event::Start(BytesStart::new(self.name.as_str())))?;
        if let Some(text) = &self.text {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))
    }

    /// Serialize as a standalone UTF-8 document with an XML declaration.
    pub fn to_xml(&self) -> io::Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
