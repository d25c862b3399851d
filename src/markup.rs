//! A small immutable HTML tree, built once per document and serialized in a
//! single pass. All text and attribute values are escaped on output.

use askama::Html as HtmlEscaper;
use askama::MarkupDisplay;
use std::fmt::{self, Write};

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];
const ARCHAIC_MARKER: &str = "(ark.)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Pre-rendered markup. Only [`archaic_highlight`] produces this.
    Markup(String),
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: &'static str,
    attributes: Vec<(&'static str, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    pub fn class(self, value: &str) -> Self {
        self.attr("class", value)
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Node::Text(text.into()))
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn children<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = Node>,
    {
        self.children.extend(nodes);
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> fmt::Result {
        write!(out, "<{}", self.name)?;
        for (name, value) in &self.attributes {
            write!(out, " {name}=\"{}\"", escape(value))?;
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&self.name) {
            return Ok(());
        }
        for child in &self.children {
            child.write_to(out)?;
        }
        write!(out, "</{}>", self.name)
    }
}

impl Node {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        match self {
            Node::Element(element) => element.write_to(out),
            Node::Text(text) => write!(out, "{}", escape(text)),
            Node::Markup(markup) => {
                out.push_str(markup);
                Ok(())
            }
        }
    }
}

/// Escapes `text` and wraps each literal `(ark.)` in `<span class="comm">`.
///
/// This is the one place where markup is injected as a string rather than
/// built as elements.
pub fn archaic_highlight(text: &str) -> Node {
    let escaped = escape(text).to_string();
    if !escaped.contains(ARCHAIC_MARKER) {
        return Node::Text(text.to_string());
    }
    Node::Markup(escaped.replace(
        ARCHAIC_MARKER,
        &format!(r#"<span class="comm">{ARCHAIC_MARKER}</span>"#),
    ))
}

fn escape(value: &str) -> MarkupDisplay<HtmlEscaper, &str> {
    MarkupDisplay::new_unsafe(value, HtmlEscaper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_elements_in_order() {
        let html = Element::new("p")
            .class("lex")
            .child(Element::new("span").class("lexem").text("katt "))
            .text(", ")
            .render();
        assert_eq!(html, r#"<p class="lex"><span class="lexem">katt </span>, </p>"#);
    }

    #[test]
    fn escapes_text() {
        let html = Element::new("span").text("a & b < c").render();
        assert_eq!(html, "<span>a &amp; b &lt; c</span>");
    }

    #[test]
    fn void_elements_have_no_end_tag() {
        let html = Element::new("meta").attr("name", "viewport").render();
        assert_eq!(html, r#"<meta name="viewport">"#);
    }

    #[test]
    fn highlight_wraps_marker_and_escapes_rest() {
        let node = archaic_highlight("vanha & (ark.) ");
        let html = Element::new("span").child(node).render();
        assert_eq!(
            html,
            r#"<span>vanha &amp; <span class="comm">(ark.)</span> </span>"#
        );
        assert_eq!(archaic_highlight("uusi"), Node::Text("uusi".to_string()));
    }
}
