//! Chapter rendering
//!
//! Raises the XHTML of one content document into plain text, Markdown or a
//! standalone HTML page. Documents are parsed with `scraper`; `script`,
//! `style`, `nav` and `noscript` elements are removed before anything is
//! rendered.
//!
//! Rendering never fails. Malformed markup is repaired by the HTML parser and
//! whatever text it recovers is rendered.

use std::sync::LazyLock;

use quick_xml::escape::escape;
use scraper::{ElementRef, Html, Node, Selector};

use crate::{
    types::{MetadataRecord, OutputFormat},
    utils::NormalizeWhitespace,
};

static REMOVED: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script, style, nav, noscript").expect("valid removal selector")
});
static TEXT_ELEMENTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, br").expect("valid text selector")
});
static MARKDOWN_ELEMENTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, strong, em, br, a, img")
        .expect("valid markdown selector")
});
static TITLE_HEADINGS: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    ["h1", "h2", "h3"].map(|tag| Selector::parse(tag).expect("valid heading selector"))
});
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));

const RULE_WIDTH: usize = 70;

const HTML_STYLE: &str = "  <style>
    body { font-family: 'Georgia', serif; line-height: 1.6; margin: 2em; }
    h1, h2, h3 { color: #333; }
    p { text-align: justify; }
    .metadata { background: #f5f5f5; padding: 1em; margin-bottom: 2em; }
  </style>";

/// Parse a document and drop the elements that carry no readable content
pub fn clean_html(source: &str) -> Html {
    let mut html = Html::parse_document(source);

    let removed = html
        .select(&REMOVED)
        .map(|element| element.id())
        .collect::<Vec<_>>();
    for id in removed {
        if let Some(mut node) = html.tree.get_mut(id) {
            node.detach();
        }
    }

    html
}

/// The chapter title of a document
///
/// The first non-empty `h1` wins, then `h2`, then `h3`. Returns `default`
/// when none of them has text.
pub fn chapter_title(source: &str, default: &str) -> String {
    let html = Html::parse_document(source);

    TITLE_HEADINGS
        .iter()
        .filter_map(|selector| html.select(selector).next())
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Render one chapter document
///
/// ## Parameters
/// - `source`: The XHTML of the content document
/// - `format`: Target representation
/// - `title`: Chapter title placed at the top of the output
/// - `metadata`: Book metadata block, omitted when `None`
pub fn render_chapter(
    source: &str,
    format: OutputFormat,
    title: &str,
    metadata: Option<&MetadataRecord>,
) -> String {
    let html = clean_html(source);

    match format {
        OutputFormat::Text => text_document(&html, title, metadata),
        OutputFormat::Markdown => markdown_document(&html, title, metadata),
        OutputFormat::Html => html_document(&html, title, metadata),
    }
}

/// All text of a cleaned document, one line per non-empty text node
pub fn plain_text(source: &str) -> String {
    let html = clean_html(source);

    html.root_element()
        .text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_document(html: &Html, title: &str, metadata: Option<&MetadataRecord>) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut output = vec![rule.clone(), format!("章节: {}", title), rule];

    if let Some(metadata) = metadata {
        output.push("\n元数据:".to_string());
        for (label, value) in metadata.entries() {
            output.push(format!("  {}: {}", label, value));
        }
        output.push("\n".to_string());
    }

    output.push(html_to_text(html));
    output.push("\n".to_string());

    output.join("\n")
}

fn markdown_document(html: &Html, title: &str, metadata: Option<&MetadataRecord>) -> String {
    let mut output = vec![format!("# {}\n", title)];

    if let Some(metadata) = metadata {
        output.push("## 元数据\n".to_string());
        for (label, value) in metadata.entries() {
            output.push(format!("- **{}**: {}", label, value));
        }
        output.push("\n".to_string());
    }

    output.push(html_to_markdown(html));
    output.push("\n".to_string());

    output.join("\n")
}

fn html_document(html: &Html, title: &str, metadata: Option<&MetadataRecord>) -> String {
    let title = escape(title);
    let mut output = vec![
        "<!DOCTYPE html>".to_string(),
        "<html lang=\"zh-CN\">".to_string(),
        "<head>".to_string(),
        "  <meta charset=\"UTF-8\">".to_string(),
        format!("  <title>{}</title>", title),
        HTML_STYLE.to_string(),
        "</head>".to_string(),
        "<body>".to_string(),
        format!("  <h1>{}</h1>", title),
    ];

    if let Some(metadata) = metadata {
        output.push("  <div class=\"metadata\">".to_string());
        output.push("    <h2>元数据</h2>".to_string());
        output.push("    <ul>".to_string());
        for (label, value) in metadata.entries() {
            output.push(format!(
                "      <li><strong>{}:</strong> {}</li>",
                label,
                escape(value)
            ));
        }
        output.push("    </ul>".to_string());
        output.push("  </div>".to_string());
    }

    let content = match html.select(&BODY).next() {
        Some(body) => body.inner_html(),
        None => html.root_element().inner_html(),
    };

    output.push("  <div class=\"content\">".to_string());
    output.push(content.trim().to_string());
    output.push("  </div>".to_string());
    output.push("</body>".to_string());
    output.push("</html>".to_string());

    output.join("\n")
}

fn html_to_text(html: &Html) -> String {
    let mut parts = Vec::new();

    for element in html.select(&TEXT_ELEMENTS) {
        if inside_paragraph(element) {
            continue;
        }

        let name = element.value().name();
        match heading_level(name) {
            Some(level) => {
                let text = element_text(element);
                if !text.is_empty() {
                    parts.push(format!("\n{} {}\n", "#".repeat(level), text));
                }
            }
            None if name == "br" => parts.push(String::new()),
            None => {
                let text = element_text(element);
                if !text.is_empty() {
                    parts.push(format!("\n{}\n", text));
                }
            }
        }
    }

    parts.join("\n")
}

fn html_to_markdown(html: &Html) -> String {
    let mut lines = Vec::new();

    for element in html.select(&MARKDOWN_ELEMENTS) {
        if inside_paragraph(element) {
            continue;
        }

        let name = element.value().name();
        if let Some(level) = heading_level(name) {
            lines.push(format!("\n{} {}\n", "#".repeat(level), element_text(element)));
            continue;
        }

        match name {
            "p" => {
                // An image-only paragraph has no text but still renders
                let mut text = String::new();
                inline_markdown(element, &mut text);

                let text = text.normalize_whitespace();
                if !text.is_empty() {
                    lines.push(format!("\n{}\n", text));
                }
            }
            "strong" => lines.push(format!("**{}**", element_text(element))),
            "em" => lines.push(format!("*{}*", element_text(element))),
            "br" => lines.push("\n".to_string()),
            "a" => {
                let text = element_text(element);
                let href = element.value().attr("href").unwrap_or_default();
                if !text.is_empty() && !href.is_empty() {
                    lines.push(format!("[{}]({})", text, href));
                }
            }
            "img" => lines.push(image_markdown(element)),
            _ => {}
        }
    }

    lines.join("\n")
}

/// Appends the Markdown form of an element's children to `out`
///
/// The tree is only read; formatting is produced while walking it.
fn inline_markdown(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };

                match child.value().name() {
                    "strong" | "b" => wrap_inline(child, "**", out),
                    "em" | "i" => wrap_inline(child, "*", out),
                    "a" => {
                        let mut text = String::new();
                        inline_markdown(child, &mut text);
                        let text = text.normalize_whitespace();

                        match child.value().attr("href") {
                            Some(href) if !href.is_empty() && !text.is_empty() => {
                                out.push_str(&format!("[{}]({})", text, href))
                            }
                            _ => out.push_str(&text),
                        }
                    }
                    "img" => out.push_str(&image_markdown(child)),
                    "br" => out.push(' '),
                    _ => inline_markdown(child, out),
                }
            }
            _ => {}
        }
    }
}

fn wrap_inline(element: ElementRef, marker: &str, out: &mut String) {
    let mut inner = String::new();
    inline_markdown(element, &mut inner);

    let inner = inner.normalize_whitespace();
    if !inner.is_empty() {
        out.push_str(&format!("{}{}{}", marker, inner, marker));
    }
}

fn image_markdown(element: ElementRef) -> String {
    let alt = element.value().attr("alt").unwrap_or_default();
    let src = element.value().attr("src").unwrap_or_default();
    format!("![{}]({})", alt, src)
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().normalize_whitespace()
}

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn inside_paragraph(element: ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "p")
}

#[cfg(test)]
mod tests {
    use crate::{
        markdown::markdown_to_html,
        render::{chapter_title, clean_html, plain_text, render_chapter},
        types::{MetadataRecord, OutputFormat},
    };

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>第三章</title><style>p { color: red; }</style></head>
<body>
  <nav><ol><li><a href="c1.xhtml">目录项</a></li></ol></nav>
  <h1>第三章</h1>
  <p>This has <strong>bold</strong> and <em>italic</em> text.</p>
  <script>alert("x")</script>
  <p>   </p>
  <p>See <a href="https://example.com">the site</a>.</p>
</body>
</html>"#;

    #[test]
    fn test_clean_html_removes_non_content() {
        let html = clean_html(CHAPTER);
        let text = html.root_element().text().collect::<String>();

        assert!(!text.contains("alert"));
        assert!(!text.contains("目录项"));
        assert!(!text.contains("color: red"));
        assert!(text.contains("bold"));
    }

    #[test]
    fn test_chapter_title_priority() {
        assert_eq!(chapter_title(CHAPTER, "第 1 章"), "第三章");
        assert_eq!(
            chapter_title("<h3>三级</h3><h2>二级</h2>", "第 1 章"),
            "二级"
        );
        assert_eq!(chapter_title("<h1>  </h1><h2>备用</h2>", "x"), "备用");
        assert_eq!(chapter_title("<p>no headings</p>", "第 7 章"), "第 7 章");
    }

    #[test]
    fn test_text_format() {
        let output = render_chapter(CHAPTER, OutputFormat::Text, "第三章", None);

        assert!(output.starts_with(&format!("{}\n章节: 第三章\n{}", "=".repeat(70), "=".repeat(70))));
        assert!(output.contains("\n# 第三章\n"));
        assert!(output.contains("\nThis has bold and italic text.\n"));
        assert!(output.contains("\nSee the site.\n"));
        assert!(!output.contains("元数据"));
    }

    #[test]
    fn test_markdown_inline_formatting_stays_on_one_line() {
        let output = render_chapter(CHAPTER, OutputFormat::Markdown, "第三章", None);

        assert!(output.starts_with("# 第三章\n"));
        let line = output
            .lines()
            .find(|line| line.contains("**bold**"))
            .unwrap();
        assert_eq!(line, "This has **bold** and *italic* text.");
        assert!(output.contains("See [the site](https://example.com)."));
        // The paragraph already rendered its link
        assert_eq!(output.matches("](https://example.com)").count(), 1);
    }

    #[test]
    fn test_markdown_standalone_inline_elements() {
        let output = render_chapter(
            "<h2>Part <em>one</em></h2><img src=\"a.png\"/><a href=\"\">empty</a><br/>",
            OutputFormat::Markdown,
            "T",
            None,
        );

        assert!(output.contains("\n## Part one\n"));
        assert!(output.contains("*one*"));
        assert!(output.contains("![](a.png)"));
        assert!(!output.contains("[empty]"));
    }

    #[test]
    fn test_markdown_image_only_paragraph() {
        let output = render_chapter(
            "<h1>T</h1><p><img src=\"images/a.png\" alt=\"cover\"/></p><p>  </p>",
            OutputFormat::Markdown,
            "T",
            None,
        );

        assert!(output.contains("\n![cover](images/a.png)\n"));
        assert_eq!(output.matches("![cover]").count(), 1);
    }

    #[test]
    fn test_text_line_breaks() {
        let with_break = render_chapter("<p>a</p><br/><p>b</p>", OutputFormat::Text, "T", None);
        let without = render_chapter("<p>a</p><p>b</p>", OutputFormat::Text, "T", None);

        assert!(without.contains("\na\n\n\nb\n"));
        assert!(with_break.contains("\na\n\n\n\nb\n"));

        // A break inside a paragraph stays part of that paragraph
        let folded = render_chapter("<p>x<br/>y</p>", OutputFormat::Text, "T", None);
        assert!(folded.lines().any(|line| line == "xy"));
        assert!(!folded.contains("\nx\n"));
    }

    #[test]
    fn test_metadata_block_fills_unknown() {
        let record = MetadataRecord {
            author: Some("作者甲".to_string()),
            ..Default::default()
        };

        let text = render_chapter(CHAPTER, OutputFormat::Text, "T", Some(&record));
        assert!(text.contains("\n元数据:\n  书名: 未知\n  作者: 作者甲\n  语言: 未知\n  出版社: 未知\n"));

        let markdown = render_chapter(CHAPTER, OutputFormat::Markdown, "T", Some(&record));
        assert!(markdown.contains("## 元数据\n\n- **书名**: 未知\n- **作者**: 作者甲"));

        let html = render_chapter(CHAPTER, OutputFormat::Html, "T", Some(&record));
        assert!(html.contains("<li><strong>书名:</strong> 未知</li>"));
    }

    #[test]
    fn test_html_format() {
        let output = render_chapter(CHAPTER, OutputFormat::Html, "A <b> & C", None);

        assert!(output.starts_with("<!DOCTYPE html>"));
        assert!(output.contains("<h1>A &lt;b&gt; &amp; C</h1>"));
        assert!(output.contains("<div class=\"content\">"));
        assert!(output.contains("<strong>bold</strong>"));
        assert!(!output.contains("<script>"));
        assert!(!output.contains("class=\"metadata\""));
    }

    #[test]
    fn test_plain_text_lines() {
        let text = plain_text("<html><head><title>T</title></head><body><p>one</p>\n<p> two </p><nav>x</nav></body></html>");
        assert_eq!(text, "T\none\ntwo");
    }

    /// Headings and links survive lowering followed by raising
    #[test]
    fn test_lower_then_raise() {
        let html = markdown_to_html("# 标题\n\n## 小节\n\n看 [文档](https://example.com/doc) 吧");
        let output = render_chapter(&html, OutputFormat::Markdown, "标题", None);

        assert!(output.contains("\n# 标题\n"));
        assert!(output.contains("\n## 小节\n"));
        assert!(output.contains("[文档](https://example.com/doc)"));
    }
}
