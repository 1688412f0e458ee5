//! Starter check registry and rule set shipped with the engine.
//!
//! Collaborators extend both at startup: checks by registering more names,
//! rules through the catalog (a later registration with the same id wins).

use regex::Regex;
use scraper::ElementRef;

use crate::engine::checks::{CheckError, CheckRegistry};
use crate::engine::document::{element_by_id, is_hidden, visible_text};
use crate::models::finding::SeverityClass;
use crate::models::rule::{Impact, Rule};

const MIN_CONTRAST: f64 = 4.5;
const MIN_CONTRAST_LARGE: f64 = 3.0;
/// 18pt regular.
const LARGE_TEXT_PX: f64 = 24.0;
/// 14pt bold.
const LARGE_BOLD_TEXT_PX: f64 = 18.66;

/// Build the default check registry.
pub fn checks() -> Result<CheckRegistry, regex::Error> {
    let mut registry = CheckRegistry::new();

    registry.register("has-alt", |el| Ok(has_alt(el)));
    registry.register("has-accessible-name", |el| Ok(has_accessible_name(el)));
    registry.register("has-lang", |el| {
        Ok(non_blank(el.value().attr("lang")) || non_blank(el.value().attr("xml:lang")))
    });
    registry.register("has-title", |el| Ok(has_document_title(el)));
    registry.register("non-empty-text", |el| {
        Ok(!visible_text(el).is_empty() || has_described_image(el))
    });
    registry.register("has-text", |el| Ok(!visible_text(el).is_empty()));

    let new_window = Regex::new(r"(?i)\bnew\s+(window|tab)\b")?;
    registry.register("warns-new-window", move |el| {
        Ok(new_window.is_match(&accessible_text(el)))
    });

    let contrast = InlineContrast::new()?;
    registry.register("sufficient-inline-contrast", move |el| contrast.check(el));

    Ok(registry)
}

/// Rules evaluated by default.
pub fn rules() -> Vec<Rule> {
    vec![
        rule(
            "img_alt_missing",
            "img",
            SeverityClass::Error,
            Impact::Critical,
            "Images must have alternate text",
            "https://www.w3.org/WAI/WCAG21/Understanding/non-text-content",
            &["wcag2a", "wcag111"],
            &["has-alt"],
        ),
        rule(
            "empty_link",
            "a[href]",
            SeverityClass::Error,
            Impact::Serious,
            "Links must have discernible text",
            "https://www.w3.org/WAI/WCAG21/Understanding/link-purpose-in-context",
            &["wcag2a", "wcag244"],
            &["has-accessible-name"],
        ),
        rule(
            "empty_button",
            "button, input[type=\"submit\"], input[type=\"button\"], input[type=\"reset\"]",
            SeverityClass::Error,
            Impact::Critical,
            "Buttons must have discernible text",
            "https://www.w3.org/WAI/WCAG21/Understanding/name-role-value",
            &["wcag2a", "wcag412"],
            &["has-accessible-name"],
        ),
        rule(
            "empty_heading_tag",
            "h1, h2, h3, h4, h5, h6",
            SeverityClass::Error,
            Impact::Moderate,
            "Headings must not be empty",
            "https://www.w3.org/WAI/WCAG21/Understanding/headings-and-labels",
            &["wcag2aa", "wcag246"],
            &["non-empty-text"],
        ),
        rule(
            "missing_lang_attr",
            "html",
            SeverityClass::Error,
            Impact::Serious,
            "The html element must have a lang attribute",
            "https://www.w3.org/WAI/WCAG21/Understanding/language-of-page",
            &["wcag2a", "wcag311"],
            &["has-lang"],
        ),
        rule(
            "missing_title",
            "html",
            SeverityClass::Error,
            Impact::Serious,
            "Documents must have a non-empty title",
            "https://www.w3.org/WAI/WCAG21/Understanding/page-titled",
            &["wcag2a", "wcag242"],
            &["has-title"],
        ),
        rule(
            "link_blank",
            "a[target=\"_blank\"]",
            SeverityClass::Warning,
            Impact::Minor,
            "Links that open a new window should say so",
            "https://www.w3.org/WAI/WCAG21/Techniques/general/G201",
            &["best-practice"],
            &["warns-new-window"],
        ),
        Rule {
            matches: Some("has-text".to_string()),
            ..rule(
                "inline_contrast_failure",
                "[style]",
                SeverityClass::Contrast,
                Impact::Serious,
                "Inline text colours must meet minimum contrast",
                "https://www.w3.org/WAI/WCAG21/Understanding/contrast-minimum",
                &["wcag2aa", "wcag143"],
                &["sufficient-inline-contrast"],
            )
        },
    ]
}

#[allow(clippy::too_many_arguments)]
fn rule(
    id: &str,
    selector: &str,
    severity: SeverityClass,
    impact: Impact,
    help: &str,
    help_url: &str,
    tags: &[&str],
    all: &[&str],
) -> Rule {
    Rule {
        impact,
        help: help.to_string(),
        help_url: Some(help_url.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        all: all.iter().map(|c| c.to_string()).collect(),
        ..Rule::new(id, selector, severity)
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn labelled_by_text(el: ElementRef<'_>) -> bool {
    el.value()
        .attr("aria-labelledby")
        .map(|ids| {
            ids.split_whitespace()
                .filter_map(|id| element_by_id(el, id))
                .any(|label| !visible_text(label).is_empty())
        })
        .unwrap_or(false)
}

fn has_alt(el: ElementRef<'_>) -> bool {
    let value = el.value();
    value.attr("alt").is_some()
        || matches!(value.attr("role"), Some("presentation" | "none"))
        || non_blank(value.attr("aria-label"))
        || labelled_by_text(el)
}

fn has_described_image(el: ElementRef<'_>) -> bool {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "img" && !is_hidden(*d))
        .any(|img| non_blank(img.value().attr("alt")))
}

fn has_explicit_label(el: ElementRef<'_>) -> bool {
    let Some(id) = el.value().attr("id") else {
        return false;
    };
    let root = el.ancestors().last().unwrap_or(*el);
    root.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|l| l.value().name() == "label" && l.value().attr("for") == Some(id))
        .any(|l| !visible_text(l).is_empty())
}

fn has_wrapping_label(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "label")
        .is_some_and(|label| !visible_text(label).is_empty())
}

fn has_accessible_name(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if non_blank(value.attr("aria-label")) || labelled_by_text(el) {
        return true;
    }
    if value.name() == "input" {
        return non_blank(value.attr("value"))
            || has_explicit_label(el)
            || has_wrapping_label(el)
            || non_blank(value.attr("title"));
    }
    !visible_text(el).is_empty() || has_described_image(el) || non_blank(value.attr("title"))
}

fn has_document_title(el: ElementRef<'_>) -> bool {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "title")
        .any(|title| !title.text().collect::<String>().trim().is_empty())
}

fn accessible_text(el: ElementRef<'_>) -> String {
    let value = el.value();
    let mut parts = vec![visible_text(el)];
    parts.extend(
        ["aria-label", "title"]
            .iter()
            .filter_map(|name| value.attr(name))
            .map(str::to_string),
    );
    parts.join(" ")
}

/// Contrast check over colours declared in an element's own `style` attribute.
///
/// Elements without both a foreground and a background colour pass; the
/// effective colours cannot be known without a rendering engine.
struct InlineContrast {
    hex: Regex,
    rgb: Regex,
    size: Regex,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rgb(u8, u8, u8);

impl InlineContrast {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            hex: Regex::new(r"^#([0-9A-Za-z]*)$")?,
            rgb: Regex::new(r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(,[^)]*)?\)$")?,
            size: Regex::new(r"^([0-9]*\.?[0-9]+)\s*(px|pt)$")?,
        })
    }

    fn check(&self, el: ElementRef<'_>) -> Result<bool, CheckError> {
        let Some(style) = el.value().attr("style") else {
            return Ok(true);
        };
        let declarations = parse_declarations(style);
        let lookup = |name: &str| {
            declarations
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };

        let foreground = lookup("color");
        let background = lookup("background-color").or_else(|| lookup("background"));
        let (Some(foreground), Some(background)) = (foreground, background) else {
            return Ok(true);
        };
        let (Some(fg), Some(bg)) = (self.colour(foreground)?, self.colour(background)?) else {
            return Ok(true);
        };

        let bold = lookup("font-weight").is_some_and(|w| {
            w == "bold" || w == "bolder" || w.parse::<u32>().is_ok_and(|n| n >= 700)
        });
        let size_px = lookup("font-size").and_then(|s| self.font_size_px(s));
        let large = size_px.is_some_and(|px| px >= LARGE_TEXT_PX || (bold && px >= LARGE_BOLD_TEXT_PX));
        let threshold = if large { MIN_CONTRAST_LARGE } else { MIN_CONTRAST };

        Ok(contrast_ratio(fg, bg) >= threshold)
    }

    /// `Ok(None)` for colour values this check does not interpret.
    fn colour(&self, value: &str) -> Result<Option<Rgb>, CheckError> {
        let value = value.trim();
        if let Some(caps) = self.hex.captures(value) {
            return parse_hex(&caps[1])
                .map(Some)
                .ok_or_else(|| CheckError::new(format!("malformed colour '{value}'")));
        }
        if let Some(caps) = self.rgb.captures(value) {
            let channel = |i: usize| {
                caps[i]
                    .parse::<u16>()
                    .ok()
                    .filter(|c| *c <= 255)
                    .map(|c| c as u8)
                    .ok_or_else(|| CheckError::new(format!("malformed colour '{value}'")))
            };
            return Ok(Some(Rgb(channel(1)?, channel(2)?, channel(3)?)));
        }
        Ok(match value.to_ascii_lowercase().as_str() {
            "black" => Some(Rgb(0, 0, 0)),
            "white" => Some(Rgb(255, 255, 255)),
            _ => None,
        })
    }

    fn font_size_px(&self, value: &str) -> Option<f64> {
        let caps = self.size.captures(value.trim())?;
        let n: f64 = caps[1].parse().ok()?;
        Some(if &caps[2] == "pt" { n * 4.0 / 3.0 } else { n })
    }
}

fn parse_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .map(|(name, value)| {
            let value = value.trim();
            let value = value.strip_suffix("!important").unwrap_or(value).trim();
            (name.trim().to_ascii_lowercase(), value.to_ascii_lowercase())
        })
        .collect()
}

fn parse_hex(digits: &str) -> Option<Rgb> {
    let expand = |s: &str| u8::from_str_radix(s, 16).ok();
    match digits.len() {
        3 => {
            let c: Vec<char> = digits.chars().collect();
            Some(Rgb(
                expand(&format!("{0}{0}", c[0]))?,
                expand(&format!("{0}{0}", c[1]))?,
                expand(&format!("{0}{0}", c[2]))?,
            ))
        }
        6 => Some(Rgb(
            expand(&digits[0..2])?,
            expand(&digits[2..4])?,
            expand(&digits[4..6])?,
        )),
        _ => None,
    }
}

fn relative_luminance(Rgb(r, g, b): Rgb) -> f64 {
    let linear = |c: u8| {
        let c = f64::from(c) / 255.0;
        if c <= 0.03928 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    0.2126 * linear(r) + 0.7152 * linear(g) + 0.0722 * linear(b)
}

fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let (la, lb) = (relative_luminance(a), relative_luminance(b));
    let (light, dark) = if la >= lb { (la, lb) } else { (lb, la) };
    (light + 0.05) / (dark + 0.05)
}
