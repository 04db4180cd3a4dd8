//! Structural checks of a book

use std::{
    fmt::{self, Display},
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    config::Settings,
    epub::EpubDoc,
    error::EpubError,
    tools::open_book,
    types::ItemKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Metadata,
    Content,
    Navigation,
}

impl Section {
    fn heading(&self) -> &'static str {
        match self {
            Section::Metadata => "元数据检查:",
            Section::Content => "内容检查:",
            Section::Navigation => "导航结构检查:",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn marker(&self) -> &'static str {
        match self {
            Severity::Ok => "✓",
            Severity::Info => "ℹ",
            Severity::Warning => "⚠ 警告:",
            Severity::Error => "✗ 错误:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub section: Section,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    PassedWithWarnings,
    Failed,
}

/// Findings of [`validate_epub`] in check order
#[derive(Debug)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    fn push(&mut self, section: Section, severity: Severity, message: impl Into<String>) {
        self.findings.push(Finding {
            section,
            severity,
            message: message.into(),
        });
    }

    pub fn outcome(&self) -> Outcome {
        match self.findings.iter().map(|finding| finding.severity).max() {
            Some(Severity::Error) => Outcome::Failed,
            Some(Severity::Warning) => Outcome::PassedWithWarnings,
            _ => Outcome::Passed,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.outcome() == Outcome::Failed
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "验证 EPUB 文件: {}", self.path.display())?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "✓ 文件可以正常读取")?;

        let mut current = None;
        for finding in &self.findings {
            if current != Some(finding.section) {
                writeln!(f)?;
                writeln!(f, "{}", finding.section.heading())?;
                current = Some(finding.section);
            }
            writeln!(f, "  {} {}", finding.severity.marker(), finding.message)?;
        }

        writeln!(f)?;
        writeln!(f, "{}", rule)?;
        match self.outcome() {
            Outcome::Failed => write!(f, "❌ 验证失败: 发现错误"),
            Outcome::PassedWithWarnings => write!(f, "⚠️  验证通过: 但有警告"),
            Outcome::Passed => write!(f, "✅ 验证通过: 文件结构完整"),
        }
    }
}

/// Check the metadata, content and navigation of the book at `path`
///
/// Problems with the book are findings, not errors. `Err` is only returned
/// when the book cannot be read at all.
pub fn validate_epub<P: AsRef<Path>>(
    path: P,
    settings: &Settings,
) -> Result<ValidationReport, EpubError> {
    let path = path.as_ref();
    let mut doc = open_book(path)?;

    let mut report = ValidationReport {
        path: path.to_path_buf(),
        findings: vec![],
    };

    check_metadata(&doc, &mut report);
    check_content(&mut doc, settings.validate.min_chapter_length, &mut report)?;
    check_navigation(&doc, &mut report);

    debug!("Validated {} with {} findings", path.display(), report.findings.len());
    Ok(report)
}

fn check_metadata<R: Read + Seek>(doc: &EpubDoc<R>, report: &mut ValidationReport) {
    let section = Section::Metadata;

    match doc.get_title() {
        Ok(titles) => report.push(section, Severity::Ok, format!("标题: {}", titles[0])),
        Err(_) => report.push(section, Severity::Error, "缺少标题"),
    }

    match doc.get_metadata_value("creator") {
        Some(authors) => {
            report.push(section, Severity::Ok, format!("作者: {}", authors.join(", ")))
        }
        None => report.push(section, Severity::Warning, "缺少作者信息"),
    }

    match doc.get_language() {
        Ok(languages) => {
            report.push(section, Severity::Ok, format!("语言: {}", languages[0]))
        }
        Err(_) => report.push(section, Severity::Warning, "缺少语言设置"),
    }

    match doc.get_identifier() {
        Ok(identifiers) => {
            report.push(section, Severity::Ok, format!("标识符: {}", identifiers[0]))
        }
        Err(_) => report.push(section, Severity::Warning, "缺少唯一标识符"),
    }
}

fn check_content<R: Read + Seek>(
    doc: &mut EpubDoc<R>,
    min_chapter_length: usize,
    report: &mut ValidationReport,
) -> Result<(), EpubError> {
    let section = Section::Content;

    let chapters = doc.items_of_kind(ItemKind::Document);
    if chapters.is_empty() {
        report.push(section, Severity::Error, "没有找到任何章节");
    } else {
        report.push(section, Severity::Ok, format!("找到 {} 个章节", chapters.len()));

        let mut short = 0;
        for chapter in &chapters {
            let content = doc.get_item_content(&chapter.id)?;
            if String::from_utf8_lossy(&content).trim().len() < min_chapter_length {
                debug!("Chapter {} is empty or too short", chapter.name);
                short += 1;
            }
        }

        if short > 0 {
            report.push(
                section,
                Severity::Warning,
                format!("{} 个章节内容为空或过短", short),
            );
        }
    }

    match doc.items_of_kind(ItemKind::Image).len() {
        0 => report.push(section, Severity::Info, "没有图片"),
        count => report.push(section, Severity::Ok, format!("找到 {} 张图片", count)),
    }

    match doc.items_of_kind(ItemKind::Stylesheet).len() {
        0 => report.push(section, Severity::Info, "没有样式文件"),
        count => report.push(section, Severity::Ok, format!("找到 {} 个样式文件", count)),
    }

    Ok(())
}

fn check_navigation<R: Read + Seek>(doc: &EpubDoc<R>, report: &mut ValidationReport) {
    let section = Section::Navigation;

    if doc.items_of_kind(ItemKind::Navigation).is_empty() {
        report.push(section, Severity::Error, "缺少导航文件 (NCX)");
    } else {
        report.push(section, Severity::Ok, "导航文件存在");
    }

    if doc.catalog.is_empty() {
        report.push(section, Severity::Warning, "目录为空");
    } else {
        report.push(section, Severity::Ok, format!("目录包含 {} 个项目", doc.catalog.len()));
    }

    if doc.spine.is_empty() {
        report.push(section, Severity::Error, "书脊为空");
    } else {
        report.push(section, Severity::Ok, format!("书脊包含 {} 个项目", doc.spine.len()));
    }
}
