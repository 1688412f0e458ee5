//! Maps stored element snapshots back onto a live document.
//!
//! Identity is textual: both sides are reduced to a canonical serialization
//! and stripped of every non-word character, so whitespace, quoting and
//! attribute order do not matter. Anything structural belongs behind a
//! different [`IdentityMatcher`].

use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Serialize;

use crate::engine::document::{is_hidden, is_operable, serialize_element, Document, SHALLOW_ELEMENTS};

/// Where a stored snapshot landed in the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchStatus {
    Found { position: usize },
    NotFound,
    NotVisible { position: usize },
    NotOperable { position: usize },
}

impl MatchStatus {
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Found { position }
            | Self::NotVisible { position }
            | Self::NotOperable { position } => Some(*position),
            Self::NotFound => None,
        }
    }
}

pub trait IdentityMatcher: Send + Sync {
    /// Normalized form of a stored snapshot.
    fn normalize(&self, snapshot: &str) -> String;

    /// Normalized form of a live element.
    fn normalize_element(&self, element: ElementRef<'_>) -> String;

    fn same_element(&self, snapshot: &str, element: ElementRef<'_>) -> bool {
        self.normalize(snapshot) == self.normalize_element(element)
    }

    /// First element in document order whose normalized form equals the snapshot's.
    fn locate<'a>(&self, document: &'a Document, snapshot: &str) -> (MatchStatus, Option<ElementRef<'a>>) {
        let wanted = self.normalize(snapshot);
        if wanted.is_empty() {
            return (MatchStatus::NotFound, None);
        }

        let found = document
            .elements()
            .enumerate()
            .find(|(_, el)| self.normalize_element(*el) == wanted);

        match found {
            None => (MatchStatus::NotFound, None),
            Some((position, element)) => {
                let status = if is_hidden(element) {
                    MatchStatus::NotVisible { position }
                } else if !is_operable(element) {
                    MatchStatus::NotOperable { position }
                } else {
                    MatchStatus::Found { position }
                };
                tracing::debug!(?status, "Located snapshot");
                (status, Some(element))
            }
        }
    }
}

/// Canonical-serialization matcher with non-word stripping.
#[derive(Debug, Clone)]
pub struct NormalizedMarkupMatcher {
    non_word: Regex,
    leading_tag: Regex,
}

impl NormalizedMarkupMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            non_word: Regex::new(r"[^0-9A-Za-z_]+")?,
            leading_tag: Regex::new(r"^\s*<([A-Za-z][A-Za-z0-9-]*)")?,
        })
    }

    fn strip(&self, text: &str) -> String {
        self.non_word.replace_all(text, "").into_owned()
    }

    /// Re-serialize a raw snapshot canonically when it parses back to the
    /// element it starts with.
    fn canonicalize(&self, snapshot: &str) -> Option<String> {
        let tag = self.leading_tag.captures(snapshot)?[1].to_ascii_lowercase();
        if SHALLOW_ELEMENTS.contains(&tag.as_str()) {
            return None;
        }
        match table_context(&tag) {
            Some((open, close)) => {
                let fragment = Html::parse_fragment(&format!("{open}{snapshot}{close}"));
                let element = fragment
                    .root_element()
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .find(|el| el.value().name() == tag)?;
                Some(serialize_element(element))
            }
            None => {
                let fragment = Html::parse_fragment(snapshot);
                let first = fragment
                    .root_element()
                    .children()
                    .filter_map(ElementRef::wrap)
                    .next()?;
                (first.value().name() == tag).then(|| serialize_element(first))
            }
        }
    }
}

/// Markup that puts a table-scoped tag back into a context where the HTML
/// parser keeps it. A body-context fragment drops these elements.
fn table_context(tag: &str) -> Option<(&'static str, &'static str)> {
    match tag {
        "td" | "th" => Some(("<table><tbody><tr>", "</tr></tbody></table>")),
        "tr" => Some(("<table><tbody>", "</tbody></table>")),
        "thead" | "tbody" | "tfoot" | "caption" | "colgroup" => Some(("<table>", "</table>")),
        "col" => Some(("<table><colgroup>", "</colgroup></table>")),
        _ => None,
    }
}

impl IdentityMatcher for NormalizedMarkupMatcher {
    fn normalize(&self, snapshot: &str) -> String {
        match self.canonicalize(snapshot) {
            Some(canonical) => self.strip(&canonical),
            None => self.strip(snapshot),
        }
    }

    fn normalize_element(&self, element: ElementRef<'_>) -> String {
        self.strip(&serialize_element(element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> NormalizedMarkupMatcher {
        NormalizedMarkupMatcher::new().unwrap()
    }

    #[test]
    fn snapshot_round_trips_to_its_element() {
        let doc = Document::parse("<div><p>Intro</p><img src=\"logo.png\"></div>");
        let img = doc.select("img").unwrap()[0];
        let snapshot = serialize_element(img);

        let m = matcher();
        let (status, element) = m.locate(&doc, &snapshot);
        assert_eq!(status, MatchStatus::Found { position: 2 });
        assert!(element.is_some_and(|el| el == img));
    }

    #[test]
    fn tolerates_whitespace_quote_and_attribute_order_drift() {
        let doc = Document::parse("<a href=\"/about\" class=\"nav\">About us</a>");
        let m = matcher();
        let (status, _) = m.locate(&doc, "<a  class='nav'\n href='/about'>About us</a>");
        assert_eq!(status, MatchStatus::Found { position: 0 });
    }

    #[test]
    fn table_cells_tolerate_attribute_order_drift() {
        let doc = Document::parse(
            "<table><tbody><tr class=\"row\" id=\"r1\"><td id=\"b\" class=\"a\">x</td></tr></tbody></table>",
        );
        let m = matcher();

        assert_eq!(
            m.normalize("<td id=\"b\" class=\"a\">x</td>"),
            m.normalize("<td class='a' id='b'>x</td>")
        );
        let (status, element) = m.locate(&doc, "<td id=\"b\" class=\"a\">x</td>");
        assert!(matches!(status, MatchStatus::Found { .. }));
        assert_eq!(element.map(|e| e.value().name().to_string()), Some("td".to_string()));
    }

    #[test]
    fn table_rows_tolerate_attribute_order_drift() {
        let doc = Document::parse(
            "<table><tbody><tr class=\"row\" id=\"r1\"><td>x</td></tr></tbody></table>",
        );
        let m = matcher();

        let browser = "<tr id=\"r1\" class=\"row\"><td>x</td></tr>";
        let server = "<tr class=\"row\" id=\"r1\"><td>x</td></tr>";
        assert_eq!(m.normalize(browser), m.normalize(server));
        let (status, element) = m.locate(&doc, browser);
        assert!(matches!(status, MatchStatus::Found { .. }));
        assert_eq!(element.map(|e| e.value().name().to_string()), Some("tr".to_string()));
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let doc = Document::parse("<p>Here</p>");
        let (status, element) = matcher().locate(&doc, "<p>Gone</p>");
        assert_eq!(status, MatchStatus::NotFound);
        assert!(element.is_none());
    }

    #[test]
    fn first_match_in_document_order_wins() {
        let doc = Document::parse("<p>dup</p><p>dup</p>");
        let (status, _) = matcher().locate(&doc, "<p>dup</p>");
        assert_eq!(status.position(), Some(0));
    }

    #[test]
    fn classifies_hidden_and_inoperable_matches() {
        let doc = Document::parse(
            "<div hidden><span>secret</span></div><button disabled>Go</button>",
        );
        let m = matcher();
        assert!(matches!(
            m.locate(&doc, "<span>secret</span>").0,
            MatchStatus::NotVisible { .. }
        ));
        assert!(matches!(
            m.locate(&doc, "<button disabled=\"\">Go</button>").0,
            MatchStatus::NotOperable { .. }
        ));
    }

    #[test]
    fn document_container_snapshots_are_shallow() {
        let doc = Document::parse("<!DOCTYPE html><html lang=\"en\"><body><p>x</p></body></html>");
        let (status, element) = matcher().locate(&doc, "<html lang=\"en\">");
        assert_eq!(status, MatchStatus::Found { position: 0 });
        assert_eq!(element.map(|e| e.value().name().to_string()), Some("html".to_string()));
    }

    #[test]
    fn normalization_is_stable_for_equivalent_markup() {
        let m = matcher();
        assert_eq!(
            m.normalize("<img alt=\"Logo\" src=\"a.png\">"),
            m.normalize("<img src='a.png' alt='Logo' />")
        );
        assert!(m.normalize("!!! ---").is_empty());
    }
}
