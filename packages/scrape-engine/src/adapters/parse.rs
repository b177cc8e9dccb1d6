//! Small helpers over `scraper` shared by the site parsers.

use scraper::{ElementRef, Selector};
use url::Url;

/// Text of the first match, whitespace-joined and trimmed. Empty is `None`.
pub fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector).next().and_then(element_text)
}

/// Attribute value of the first match.
pub fn first_attr(card: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    card.select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// All text under an element.
pub fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Resolve `href` against the page URL.
pub fn resolve(page_url: &str, href: &str) -> Option<String> {
    Url::parse(page_url)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// First unsigned integer in `text`, e.g. "(123 Bewertungen)" -> 123.
pub fn first_number(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse a rating that may use a decimal comma.
pub fn parse_rating(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse().ok()
}
