//! Parsing of `uiautomator dump` XML into a flat element arena.
//!
//! Elements are stored in document (pre-)order, so the descendants of an
//! element are the contiguous run that follows it with a greater depth.

use roxmltree::Node;
use thiserror::Error;

use crate::element::{Bounds, Element};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("malformed UI dump: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("UI dump has no <hierarchy> root (found <{0}>)")]
    NoHierarchy(String),

    #[error("node {index} has invalid bounds: {reason}")]
    InvalidBounds { index: usize, reason: String },
}

/// Substrings (lowercase) identifying the dialog's send button.
const SEND_BUTTON_DESCS: [&str; 2] = ["send priority like", "send like"];

#[derive(Debug, Clone, Default)]
pub struct UiTree {
    elements: Vec<Element>,
}

impl UiTree {
    pub fn parse(xml: &str) -> Result<Self, DumpError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if !root.has_tag_name("hierarchy") {
            return Err(DumpError::NoHierarchy(root.tag_name().name().to_string()));
        }

        let mut elements = Vec::new();
        for child in root.children().filter(|n| n.has_tag_name("node")) {
            collect(child, None, 0, &mut elements)?;
        }

        Ok(UiTree { elements })
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn parent(&self, element: &Element) -> Option<&Element> {
        element.parent.and_then(|p| self.elements.get(p))
    }

    /// Ancestors of `index`, nearest first.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = &Element> + '_ {
        let mut next = self.elements.get(index).and_then(|e| e.parent);
        std::iter::from_fn(move || {
            let current = self.elements.get(next?)?;
            next = current.parent;
            Some(current)
        })
    }

    /// Strict descendants of `index`, in document order.
    pub fn descendants(&self, index: usize) -> &[Element] {
        let Some(element) = self.elements.get(index) else {
            return &[];
        };
        let start = index + 1;
        let len = self.elements[start..]
            .iter()
            .take_while(|e| e.depth > element.depth)
            .count();
        &self.elements[start..start + len]
    }

    /// True when `index` is `ancestor` itself or lies inside its subtree.
    pub fn is_within(&self, index: usize, ancestor: usize) -> bool {
        index == ancestor || self.ancestors(index).any(|e| e.index == ancestor)
    }

    /// Elements of class `class` whose description contains `desc`, in document order.
    pub fn find_by_class_and_desc<'a>(
        &'a self,
        class: &'a str,
        desc: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements
            .iter()
            .filter(move |e| e.class == class && e.description().contains(desc))
    }

    /// Non-empty texts in document order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(Element::text)
    }

    /// The message input of the reply dialog.
    pub fn input_field(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.class == "android.widget.EditText" && e.clickable)
    }

    /// The send button of the reply dialog: the clickable node (or nearest
    /// clickable ancestor) of the node described as a send action.
    pub fn send_button(&self) -> Option<&Element> {
        let node = self.elements.iter().find(|e| {
            let desc = e.description().to_lowercase();
            SEND_BUTTON_DESCS.iter().any(|d| desc.contains(d))
        })?;
        if node.clickable {
            return Some(node);
        }
        self.ancestors(node.index).find(|e| e.clickable)
    }

    /// The dialog's Cancel button. A matching TextView is resolved to its
    /// Button parent when it has one.
    pub fn cancel_button(&self) -> Option<&Element> {
        let node = self.elements.iter().find(|e| {
            e.description().eq_ignore_ascii_case("cancel")
                || e.text().is_some_and(|t| t.eq_ignore_ascii_case("cancel"))
        })?;
        if node.class == "android.widget.TextView"
            && let Some(parent) = self.parent(node)
            && parent.class == "android.widget.Button"
        {
            return Some(parent);
        }
        Some(node)
    }

    /// The button that dismisses the current profile.
    pub fn skip_button(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.class == "android.widget.Button" && e.description().starts_with("Skip"))
    }

    /// The profile's name: the text of the focused, focusable node.
    pub fn profile_name(&self) -> Option<&str> {
        self.elements
            .iter()
            .filter(|e| e.focusable && e.focused)
            .find_map(Element::text)
    }
}

fn collect(
    node: Node<'_, '_>,
    parent: Option<usize>,
    depth: usize,
    out: &mut Vec<Element>,
) -> Result<(), DumpError> {
    let index = out.len();
    let bounds = node
        .attribute("bounds")
        .unwrap_or("")
        .parse::<Bounds>()
        .map_err(|reason| DumpError::InvalidBounds { index, reason })?;

    out.push(Element {
        index,
        parent,
        depth,
        bounds,
        class: node.attribute("class").unwrap_or("").to_string(),
        text: node
            .attribute("text")
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        description: node
            .attribute("content-desc")
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        clickable: node.attribute("clickable") == Some("true"),
        focusable: node.attribute("focusable") == Some("true"),
        focused: node.attribute("focused") == Some("true"),
    });

    for child in node.children().filter(|n| n.has_tag_name("node")) {
        collect(child, Some(index), depth + 1, out)?;
    }
    Ok(())
}
