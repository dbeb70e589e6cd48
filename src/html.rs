//! Just enough of an HTML tree to publish a transcript as a web page.
//!
//! Elements hold attributes and children, text nodes are escaped on output. Nothing is ever
//! parsed, the tree only grows and renders.

use std::fmt::{self, Write};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: &'static str,
    attributes: Vec<(&'static str, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(tag: &'static str) -> Element {
        Element {
            tag,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl Into<String>) -> Element {
        self.attributes.push((name, value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Element {
        self.append_text(text);
        self
    }

    pub fn append_text(&mut self, text: impl Into<String>) -> &mut Element {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn append_child(&mut self, child: Element) -> &mut Element {
        self.children.push(Node::Element(child));
        self
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (name, value) in &self.attributes {
            write!(f, " {}=\"{}\"", name, html_escape::encode_double_quoted_attribute(value))?;
        }
        f.write_char('>')?;

        if VOID_ELEMENTS.contains(&self.tag) {
            return Ok(());
        }
        for child in &self.children {
            match child {
                Node::Element(element) => write!(f, "{}", element)?,
                Node::Text(text) => f.write_str(&html_escape::encode_text(text))?,
            }
        }
        write!(f, "</{}>", self.tag)
    }
}

/// A complete document: fixed head, growing body.
#[derive(Debug, Clone)]
pub struct Page {
    title: String,
    body: Element,
}

impl Page {
    pub fn new(title: impl Into<String>) -> Page {
        Page {
            title: title.into(),
            body: Element::new("body"),
        }
    }

    pub fn body_mut(&mut self) -> &mut Element {
        &mut self.body
    }

    pub fn render(&self) -> String {
        let mut head = Element::new("head");
        head.append_child(Element::new("meta").attr("charset", "UTF-8"))
            .append_child(
                Element::new("meta")
                    .attr("name", "viewport")
                    .attr("content", "width=device-width, initial-scale=1.0"),
            )
            .append_child(
                Element::new("meta")
                    .attr("http-equiv", "X-UA-Compatible")
                    .attr("content", "ie=edge"),
            )
            .append_child(Element::new("title").text(self.title.as_str()));

        let mut html = Element::new("html").attr("lang", "en");
        html.append_child(head).append_child(self.body.clone());

        format!("<!DOCTYPE html>{}", html)
    }
}
