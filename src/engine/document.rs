//! Parsed document tree with the serialization and visibility rules the
//! evaluator and matcher share.

use scraper::{ElementRef, Html, Node, Selector};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Document containers serialized as their opening tag only.
pub(crate) const SHALLOW_ELEMENTS: &[&str] = &["html", "head", "body"];

/// Containers whose subtree is never rendered.
const NON_RENDERED: &[&str] = &["template", "script", "style", "noscript", "head"];

const FOCUSABLE: &[&str] = &["a", "button", "input", "select", "textarea", "summary"];

/// An HTML document or fragment ready for rule evaluation.
pub struct Document {
    html: Html,
    /// Fragment parsing wraps content in a synthetic `<html>` element.
    fragment: bool,
}

impl Document {
    /// Parse full documents as documents and everything else as a body fragment.
    pub fn parse(markup: &str) -> Self {
        let head: String = markup
            .trim_start()
            .chars()
            .take(9)
            .collect::<String>()
            .to_ascii_lowercase();

        if head.starts_with("<!doctype") || head.starts_with("<html") {
            Self {
                html: Html::parse_document(markup),
                fragment: false,
            }
        } else {
            Self {
                html: Html::parse_fragment(markup),
                fragment: true,
            }
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    fn synthetic_root(&self) -> Option<ElementRef<'_>> {
        self.fragment.then(|| self.html.root_element())
    }

    /// Every element in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> + '_ {
        let skip = self.synthetic_root();
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(move |el| Some(*el) != skip)
    }

    /// Elements matching a CSS selector, in document order.
    pub fn select(&self, selector: &str) -> Result<Vec<ElementRef<'_>>, String> {
        let selector = parse_selector(selector)?;
        let skip = self.synthetic_root();
        Ok(self
            .html
            .select(&selector)
            .filter(|el| Some(*el) != skip)
            .collect())
    }

    /// Number of content elements, excluding document containers and `<head>`.
    pub fn element_count(&self) -> usize {
        self.elements()
            .filter(|el| !SHALLOW_ELEMENTS.contains(&el.value().name()))
            .filter(|el| !in_head(*el))
            .count()
    }

    /// Rendered plain text, whitespace-collapsed.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self.html.root_element(), &mut out);
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Parse a CSS selector, reporting the parser's complaint as text.
pub fn parse_selector(selector: &str) -> Result<Selector, String> {
    if selector.trim().is_empty() {
        return Err("empty selector".to_string());
    }
    Selector::parse(selector).map_err(|e| format!("{e:?}"))
}

fn in_head(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "head")
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    if NON_RENDERED.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text: &str = text;
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn self_and_ancestors(el: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap))
}

fn attr_is_true(el: ElementRef<'_>, name: &str) -> bool {
    el.value()
        .attr(name)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn style_hides(style: &str) -> bool {
    let compact: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.contains("display:none") || compact.contains("visibility:hidden")
}

fn hides_subtree(el: ElementRef<'_>) -> bool {
    let value = el.value();
    NON_RENDERED.contains(&value.name())
        || value.attr("hidden").is_some()
        || attr_is_true(el, "aria-hidden")
        || value.attr("style").is_some_and(style_hides)
}

/// Whether an element is hidden from assistive technology, itself or through an ancestor.
pub fn is_hidden(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.name() == "input"
        && value
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
    {
        return true;
    }
    self_and_ancestors(el).any(hides_subtree)
}

fn is_natively_focusable(el: ElementRef<'_>) -> bool {
    let value = el.value();
    match value.name() {
        "a" => value.attr("href").is_some(),
        name => FOCUSABLE.contains(&name) || value.attr("tabindex").is_some(),
    }
}

/// Whether an element can be reached and used through standard interaction.
pub fn is_operable(el: ElementRef<'_>) -> bool {
    if self_and_ancestors(el).any(|e| e.value().attr("inert").is_some()) {
        return false;
    }
    let value = el.value();
    if value.attr("disabled").is_some() || attr_is_true(el, "aria-disabled") {
        return false;
    }
    if is_natively_focusable(el) {
        let tabindex = value
            .attr("tabindex")
            .and_then(|t| t.trim().parse::<i32>().ok());
        if tabindex.is_some_and(|t| t < 0) {
            return false;
        }
    }
    true
}

/// Find an element by `id` anywhere in the tree containing `el`.
pub fn element_by_id<'a>(el: ElementRef<'a>, id: &str) -> Option<ElementRef<'a>> {
    let root = el.ancestors().last().unwrap_or(*el);
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|candidate| candidate.value().attr("id") == Some(id))
}

/// Text an element exposes, skipping hidden descendants.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_visible_text(el, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_visible_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text: &str = text;
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if !hides_subtree(child) {
                        push_visible_text(child, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Canonical markup for an element: attributes sorted by name, text escaped,
/// document containers shallow.
pub fn serialize_element(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    write_element(el, &mut out, true);
    out
}

fn write_open_tag(el: ElementRef<'_>, out: &mut String) {
    let value = el.value();
    out.push('<');
    out.push_str(value.name());
    let mut attrs: Vec<(&str, &str)> = value.attrs().collect();
    attrs.sort_by(|a, b| a.0.cmp(b.0));
    for (name, val) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(val, out, true);
        out.push('"');
    }
    out.push('>');
}

fn write_element(el: ElementRef<'_>, out: &mut String, top: bool) {
    write_open_tag(el, out);
    let name = el.value().name();
    if VOID_ELEMENTS.contains(&name) || (top && SHALLOW_ELEMENTS.contains(&name)) {
        return;
    }
    let raw_text = matches!(name, "script" | "style");
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text: &str = text;
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_into(text, out, false);
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out, false);
                }
            }
            Node::Comment(comment) => {
                let comment: &str = comment;
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_into(text: &str, out: &mut String, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
