//! Content negotiation for rejection responses.
//!
//! A small, pure implementation of `Accept` header matching: enough to
//! pick between the media types the scaffold can produce, not a general
//! HTTP content-negotiation engine.

/// One parsed media range from an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
struct MediaRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    quality: f32,
}

impl MediaRange<'_> {
    /// Match specificity: exact beats `type/*` beats `*/*`.
    fn specificity(&self) -> u8 {
        match (self.kind, self.subtype) {
            ("*", _) => 0,
            (_, "*") => 1,
            _ => 2,
        }
    }

    fn matches(&self, media_type: &str) -> bool {
        let Some((kind, subtype)) = media_type.split_once('/') else {
            return false;
        };
        (self.kind == "*" || self.kind.eq_ignore_ascii_case(kind))
            && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
    }
}

/// Parses a single `Accept` element, e.g. `text/*;q=0.5`.
///
/// Returns `None` for elements that are not a media range; unparseable
/// `q` values fall back to 1.0 per the usual lenient treatment.
fn parse_range(element: &str) -> Option<MediaRange<'_>> {
    let mut parts = element.split(';');
    let range = parts.next()?.trim();
    let (kind, subtype) = range.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() {
        return None;
    }

    let quality = parts
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, value)| value.trim().parse::<f32>().ok())
        .filter(|q| (0.0..=1.0).contains(q))
        .unwrap_or(1.0);

    Some(MediaRange {
        kind: kind.trim(),
        subtype: subtype.trim(),
        quality,
    })
}

/// Selects a response media type from a client's `Accept` header.
///
/// `supported` is the server's preference-ordered list of producible
/// types. The supported type matched by the highest-weighted acceptable
/// range wins; equal weights prefer the more specific range, then header
/// order. A missing, empty, or unmatchable header falls back to the first
/// supported type. Ranges with `q=0` exclude their matches.
///
/// # Example
///
/// ```rust
/// use gantry::select_media_type;
///
/// let supported = ["text/plain", "application/json"];
/// assert_eq!(
///     select_media_type(Some("application/json"), &supported),
///     "application/json"
/// );
/// assert_eq!(select_media_type(None, &supported), "text/plain");
/// ```
#[must_use]
pub fn select_media_type<'a>(accept: Option<&str>, supported: &[&'a str]) -> &'a str {
    let fallback = supported.first().copied().unwrap_or("text/plain");
    let Some(accept) = accept else {
        return fallback;
    };

    let mut best: Option<(&'a str, f32, u8)> = None;
    for range in accept.split(',').filter_map(parse_range) {
        if range.quality <= 0.0 {
            continue;
        }
        let Some(candidate) = supported.iter().find(|s| range.matches(s)).copied() else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, quality, specificity)) => {
                range.quality > quality
                    || (range.quality == quality && range.specificity() > specificity)
            }
        };
        if better {
            best = Some((candidate, range.quality, range.specificity()));
        }
    }

    best.map_or(fallback, |(chosen, _, _)| chosen)
}
