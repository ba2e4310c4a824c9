//! Quality label to yt-dlp format selector mapping.

use std::fmt;

/// Label used when the caller does not ask for anything specific.
pub const BEST_QUALITY: &str = "best";
const BEST_EXPRESSION: &str = "bv*+ba/b";

const FORMAT_TABLE: &[(&str, &str)] = &[
    (
        "2160p",
        "bestvideo[height<=2160]+bestaudio/best[height<=2160]",
    ),
    (
        "1440p",
        "bestvideo[height<=1440]+bestaudio/best[height<=1440]",
    ),
    (
        "1080p",
        "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
    ),
    ("720p", "bestvideo[height<=720]+bestaudio/best[height<=720]"),
    ("480p", "bestvideo[height<=480]+bestaudio/best[height<=480]"),
    ("360p", "bestvideo[height<=360]+bestaudio/best[height<=360]"),
    ("audio", "bestaudio/best"),
    (BEST_QUALITY, BEST_EXPRESSION),
];

/// Opaque `--format` argument handed to yt-dlp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatExpression(&'static str);

impl FormatExpression {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FormatExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Resolves a quality label. Unknown, empty, and missing labels all fall back
/// to the `best` selector.
pub fn resolve(quality: Option<&str>) -> FormatExpression {
    let label = quality.map(str::trim).unwrap_or(BEST_QUALITY);
    FORMAT_TABLE
        .iter()
        .find(|(known, _)| *known == label)
        .map(|&(_, expression)| FormatExpression(expression))
        .unwrap_or(FormatExpression(BEST_EXPRESSION))
}

/// Labels accepted by [`resolve`], in table order.
pub fn known_labels() -> impl Iterator<Item = &'static str> {
    FORMAT_TABLE.iter().map(|&(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_resolve_to_documented_selectors() {
        assert_eq!(
            resolve(Some("1080p")).as_str(),
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]"
        );
        assert_eq!(
            resolve(Some("720p")).as_str(),
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(resolve(Some("audio")).as_str(), "bestaudio/best");
        assert_eq!(resolve(Some("best")).as_str(), "bv*+ba/b");
        for label in known_labels() {
            assert_eq!(
                resolve(Some(label)),
                FormatExpression(
                    FORMAT_TABLE
                        .iter()
                        .find(|(known, _)| *known == label)
                        .unwrap()
                        .1
                )
            );
        }
    }

    #[test]
    fn unknown_labels_fall_back_to_best() {
        let best = resolve(Some(BEST_QUALITY));
        assert_eq!(resolve(None), best);
        assert_eq!(resolve(Some("")), best);
        assert_eq!(resolve(Some("8k")), best);
        assert_eq!(resolve(Some("144p")), best);
        assert_eq!(resolve(Some("720P")), best);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(resolve(Some(" 480p ")), resolve(Some("480p")));
    }
}
