//! Display tree produced by evaluations and grading.
//!
//! A `DisplayNode` is a small HTML-shaped tree. Hosts can serialize it, walk
//! it, or flatten it to markup with `to_html`. Block builders here fix the
//! class names the page stylesheet expects.

pub mod dependencies;

use serde::Serialize;

use crate::runtime::Bitmap;

pub use dependencies::{DependencyLoader, DependencyRegistry, HeadCollector};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum DisplayNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<DisplayNode>,
    },
    /// Escaped on output.
    Text { text: String },
    /// Trusted markup, emitted verbatim.
    Raw { html: String },
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

impl DisplayNode {
    pub fn element(tag: &str) -> Self {
        DisplayNode::Element {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn div() -> Self {
        Self::element("div")
    }

    pub fn text(text: impl Into<String>) -> Self {
        DisplayNode::Text { text: text.into() }
    }

    pub fn raw(html: impl Into<String>) -> Self {
        DisplayNode::Raw { html: html.into() }
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        if let DisplayNode::Element { attrs, .. } = &mut self {
            attrs.push((name.to_string(), value.into()));
        }
        self
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    pub fn child(mut self, node: DisplayNode) -> Self {
        self.push(node);
        self
    }

    pub fn push(&mut self, node: DisplayNode) {
        if let DisplayNode::Element { children, .. } = self {
            children.push(node);
        }
    }

    pub fn children(&self) -> &[DisplayNode] {
        match self {
            DisplayNode::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        match self {
            DisplayNode::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.get_attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    /// Every node in the subtree carrying `class`, in document order.
    pub fn find_by_class(&self, class: &str) -> Vec<&DisplayNode> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if node.has_class(class) {
                found.push(node);
            }
        });
        found
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a DisplayNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Concatenated text of the subtree, markup excluded.
    pub fn text_content(&self) -> String {
        match self {
            DisplayNode::Text { text } => text.clone(),
            DisplayNode::Raw { html } => html.clone(),
            DisplayNode::Element { children, .. } => {
                children.iter().map(DisplayNode::text_content).collect()
            }
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            DisplayNode::Text { text } => out.push_str(&escape_html(text)),
            DisplayNode::Raw { html } => out.push_str(html),
            DisplayNode::Element { tag, attrs, children } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                }
                out.push('>');
                if tag == "img" {
                    return;
                }
                for child in children {
                    child.write_html(out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }
}

/// Highlightable source block: `div.sourceCode > pre.sourceCode.<lang>`.
pub fn source_block(code: &str, language: &str) -> DisplayNode {
    let class = format!("sourceCode {}", language);
    DisplayNode::div().class("sourceCode").child(
        DisplayNode::element("pre")
            .class(&class)
            .child(DisplayNode::element("code").class(&class).child(DisplayNode::text(code))),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub fn output_block(content: &str, stream: Stream) -> DisplayNode {
    let class = match stream {
        Stream::Stdout => "exercise-cell-output cell-output cell-output-live cell-output-stdout",
        Stream::Stderr => "exercise-cell-output cell-output cell-output-live cell-output-stderr",
    };
    DisplayNode::div().class(class).child(
        DisplayNode::element("pre").child(DisplayNode::element("code").child(DisplayNode::text(content))),
    )
}

/// Callout for a warning or error condition. `kind` is the callout flavour
/// (`warning` or `important`), `heading` the human label.
pub fn condition_block(language: &str, kind: &str, heading: &str, message: &str, call: Option<&str>) -> DisplayNode {
    let call_info = match call {
        Some(call) => format!(" in `{}`", call),
        None => ": ".to_string(),
    };
    DisplayNode::div()
        .class(&format!(
            "callout-{} callout callout-style-default callout-captioned",
            kind
        ))
        .child(
            DisplayNode::div()
                .class("callout-header d-flex align-content-center")
                .child(
                    DisplayNode::div()
                        .class("callout-icon-container")
                        .child(DisplayNode::element("i").class("callout-icon")),
                )
                .child(
                    DisplayNode::div()
                        .class("callout-caption-container flex-fill")
                        .child(DisplayNode::text(format!("{} {}{}", language, heading, call_info))),
                ),
        )
        .child(
            DisplayNode::div()
                .class("callout-body-container callout-body")
                .child(DisplayNode::element("pre").child(DisplayNode::text(format!("{}: {}", heading, message)))),
        )
}

pub fn html_block(html: &str) -> DisplayNode {
    DisplayNode::div().class("cell-output cell-output-live").child(DisplayNode::raw(html))
}

/// Plot image, shown at two thirds of its pixel size.
pub fn image_block(bitmap: &Bitmap) -> DisplayNode {
    DisplayNode::div().class("cell-output-display cell-output-live").child(image_node(bitmap))
}

pub fn image_node(bitmap: &Bitmap) -> DisplayNode {
    DisplayNode::element("img")
        .class("img-fluid figure-img")
        .attr("src", bitmap.data_url())
        .attr("width", bitmap.width.to_string())
        .attr("height", bitmap.height.to_string())
        .attr("style", format!("width: {}px", 2 * bitmap.width / 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped_raw_is_not() {
        let node = DisplayNode::div()
            .class("x")
            .child(DisplayNode::text("a < b & c"))
            .child(DisplayNode::raw("<b>bold</b>"));
        assert_eq!(node.to_html(), "<div class=\"x\">a &lt; b &amp; c<b>bold</b></div>");
    }

    #[test]
    fn source_blocks_carry_language_classes() {
        let node = source_block("x <- 1\n", "r");
        assert_eq!(
            node.to_html(),
            "<div class=\"sourceCode\"><pre class=\"sourceCode r\"><code class=\"sourceCode r\">x &lt;- 1\n</code></pre></div>"
        );
    }

    #[test]
    fn condition_caption_mentions_call() {
        let node = condition_block("R", "important", "Error", "boom", Some("f()"));
        let caption = node.find_by_class("callout-caption-container");
        assert_eq!(caption[0].text_content(), "R Error in `f()`");
        assert_eq!(node.find_by_class("callout-body")[0].text_content(), "Error: boom");

        let bare = condition_block("R", "warning", "Warning", "careful", None);
        assert_eq!(bare.find_by_class("callout-caption-container")[0].text_content(), "R Warning: ");
    }

    #[test]
    fn output_blocks_are_tagged_by_stream() {
        assert!(output_block("hi", Stream::Stdout).has_class("cell-output-stdout"));
        assert!(output_block("hi", Stream::Stderr).has_class("cell-output-stderr"));
    }
}
