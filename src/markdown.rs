//! Markdown to HTML lowering
//!
//! Converts the small Markdown subset used for authoring books into an HTML
//! fragment. The conversion is a fixed sequence of regex substitutions
//! ([`STAGES`]), each applied to the whole output of the previous one,
//! followed by paragraph wrapping. It never fails: text that matches no
//! stage passes through unchanged.
//!
//! This is not a CommonMark implementation. Nested lists, block quotes,
//! tables and escaping are not recognized.

use std::sync::LazyLock;

use regex::Regex;

/// One substitution applied to the whole document
pub struct Stage {
    pub name: &'static str,
    pub pattern: &'static LazyLock<Regex>,
    pub replacement: &'static str,
}

static HEADING_3: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^### (.+)$").expect("valid heading pattern"));
static HEADING_2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## (.+)$").expect("valid heading pattern"));
static HEADING_1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid heading pattern"));

static STRONG_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\*(.+?)\*\*\*").expect("valid emphasis pattern"));
static STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid emphasis pattern"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("valid emphasis pattern"));

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.+?)```").expect("valid code pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`(.+?)`").expect("valid code pattern"));

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[(.+?)\]\((.+?)\)").expect("valid image pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.+?)\]\((.+?)\)").expect("valid link pattern"));

/// Substitutions in application order
///
/// Longer markers come before the shorter markers they contain (`###`
/// before `#`, `***` before `*`), and images come before links so the
/// leading `!` is consumed with the image.
pub static STAGES: [Stage; 10] = [
    Stage {
        name: "heading-3",
        pattern: &HEADING_3,
        replacement: "<h3>${1}</h3>",
    },
    Stage {
        name: "heading-2",
        pattern: &HEADING_2,
        replacement: "<h2>${1}</h2>",
    },
    Stage {
        name: "heading-1",
        pattern: &HEADING_1,
        replacement: "<h1>${1}</h1>",
    },
    Stage {
        name: "strong-emphasis",
        pattern: &STRONG_EMPHASIS,
        replacement: "<strong><em>${1}</em></strong>",
    },
    Stage {
        name: "strong",
        pattern: &STRONG,
        replacement: "<strong>${1}</strong>",
    },
    Stage {
        name: "emphasis",
        pattern: &EMPHASIS,
        replacement: "<em>${1}</em>",
    },
    Stage {
        name: "code-block",
        pattern: &CODE_BLOCK,
        replacement: "<pre><code>${1}</code></pre>",
    },
    Stage {
        name: "inline-code",
        pattern: &INLINE_CODE,
        replacement: "<code>${1}</code>",
    },
    Stage {
        name: "image",
        pattern: &IMAGE,
        replacement: "<img src=\"${2}\" alt=\"${1}\"/>",
    },
    Stage {
        name: "link",
        pattern: &LINK,
        replacement: "<a href=\"${2}\">${1}</a>",
    },
];

/// Blocks starting with one of these are not wrapped in `<p>`
const BLOCK_PREFIXES: [&str; 8] = ["<h1", "<h2", "<h3", "<h4", "<h5", "<h6", "<pre", "<img"];

/// Lower Markdown source into an HTML fragment
///
/// The result has no `<html>` or `<body>` wrapper. Blocks are separated by
/// blank lines in the source and by a single newline in the output.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = markdown.to_string();
    for stage in STAGES.iter() {
        html = stage
            .pattern
            .replace_all(&html, stage.replacement)
            .into_owned();
    }

    wrap_paragraphs(&html)
}

fn wrap_paragraphs(html: &str) -> String {
    html.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            if BLOCK_PREFIXES.iter().any(|prefix| block.starts_with(prefix)) {
                block.to_string()
            } else {
                format!("<p>{}</p>", block)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
