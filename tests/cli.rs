use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

const MARKDOWN: &str = "# 命令行测试\n\n这是第一段,包含 **粗体** 文字。\n\n## 小节\n\n第二段。\n";

/// Create a book through the `create` subcommand
fn create_book(dir: &Path) -> PathBuf {
    let markdown = dir.join("book.md");
    fs::write(&markdown, MARKDOWN).unwrap();
    let output = dir.join("book.epub");

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("create")
        .arg(&markdown)
        .arg(&output)
        .arg("--cover")
        .arg(dir.join("missing.png"));
    cmd.assert().failure().stderr(predicate::str::contains("错误:"));

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("create").arg(&markdown).arg(&output).arg("命令行测试").arg("张三");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("✓ EPUB 创建成功"))
        .stdout(predicate::str::contains("作者: 张三"));

    output
}

#[test]
fn test_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let book = create_book(dir.path());

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("metadata").arg(&book);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("书名: 命令行测试"))
        .stdout(predicate::str::contains("出版社: 未知"))
        .stdout(predicate::str::contains("章节数: 1"))
        .stdout(predicate::str::contains("\"chapters_count\": 1"));
}

#[test]
fn test_chapters_separate_markdown() {
    let dir = tempfile::tempdir().unwrap();
    let book = create_book(dir.path());
    let output = dir.path().join("chapters");

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("chapters")
        .arg(&book)
        .arg(&output)
        .args(["--format", "md", "--separate", "--toc"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("总章节数: 1"));

    let chapter = fs::read_to_string(output.join("chapter_001.md")).unwrap();
    assert!(chapter.contains("# 命令行测试"));
    assert!(chapter.contains("**粗体**"));

    let toc = fs::read_to_string(output.join("TOC.txt")).unwrap();
    assert!(toc.contains("1. 命令行测试"));
    assert!(toc.contains("文件: chapter_001.md"));
}

#[test]
fn test_text_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let book = create_book(dir.path());

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("text").arg(&book);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("第 1 章"))
        .stdout(predicate::str::contains("第二段。"));
}

#[test]
fn test_update_then_validate() {
    let dir = tempfile::tempdir().unwrap();
    let book = create_book(dir.path());

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("update").arg(&book).args(["--publisher", "测试出版社"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("✓ 更新出版社: 测试出版社"));

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("update").arg(&book);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("没有修改任何元数据"));

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("validate").arg(&book);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("✓ 标题: 命令行测试"))
        .stdout(predicate::str::contains("验证通过"));
}

#[test]
fn test_split_and_merge() {
    let dir = tempfile::tempdir().unwrap();
    let book = create_book(dir.path());
    let parts = dir.path().join("parts");

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("split").arg(&book).arg(&parts);
    cmd.assert().success();
    assert!(parts.join("chapter_001.epub").is_file());

    let merged = dir.path().join("merged.epub");
    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("merge")
        .arg(&merged)
        .arg(&book)
        .arg(parts.join("chapter_001.epub"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("总章节数: 2"));
    assert!(merged.is_file());
}

#[test]
fn test_missing_file() {
    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("metadata").arg("no/such/book.epub");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("错误:"));
}

#[test]
fn test_validate_unreadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.epub");
    fs::write(&path, "not a zip archive").unwrap();

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("validate").arg(&path);

    cmd.assert().code(2).stderr(predicate::str::contains("致命错误"));
}

#[test]
fn test_config_file_overrides_author() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("toolkit.toml");
    fs::write(&config, "[book]\nauthor = \"配置作者\"\n").unwrap();
    let markdown = dir.path().join("notes.md");
    fs::write(&markdown, MARKDOWN).unwrap();

    let mut cmd = cargo_bin_cmd!("epub-toolkit");
    cmd.arg("--config")
        .arg(&config)
        .arg("create")
        .arg(&markdown)
        .arg(dir.path().join("notes.epub"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("作者: 配置作者"));
}
