//! epub-toolkit - EPUB reading, extraction and authoring tools

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use log::{LevelFilter, Log, Metadata, Record};

use epub_toolkit::{
    config::{Loader, Settings},
    error::EpubError,
    tools::{
        chapters::{ChapterOptions, extract_chapters},
        create::{CreateOptions, create_epub},
        images::extract_images,
        merge::merge_epubs,
        metadata::extract_metadata,
        split::split_epub,
        text::extract_text,
        update::{MetadataChanges, update_metadata},
        validate::validate_epub,
    },
    types::OutputFormat,
};

#[derive(Parser)]
#[command(name = "epub-toolkit")]
#[command(version, about = "EPUB reading, extraction and authoring tools", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-toolkit metadata book.epub
    epub-toolkit chapters book.epub out/ --format md --separate --toc
    epub-toolkit create book.md book.epub '我的书' '张三'
    epub-toolkit merge merged.epub book1.epub book2.epub")]
struct Cli {
    /// TOML file layered over the built-in settings
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the metadata of a book
    Metadata { epub: PathBuf },

    /// Extract the plain text of a book
    Text {
        epub: PathBuf,

        /// Written to stdout when omitted
        output: Option<PathBuf>,
    },

    /// Extract all images of a book
    Images {
        epub: PathBuf,

        /// Defaults to `{book name}_images`
        output_dir: Option<PathBuf>,
    },

    /// Extract chapters as text, Markdown or HTML
    Chapters {
        epub: PathBuf,
        output_dir: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write one file per chapter
        #[arg(short, long)]
        separate: bool,

        /// Write a table of contents
        #[arg(short, long)]
        toc: bool,

        /// Include the book metadata in every chapter
        #[arg(short, long)]
        metadata: bool,
    },

    /// Create a book from a Markdown file
    Create {
        markdown: PathBuf,
        output: PathBuf,
        title: Option<String>,
        author: Option<String>,

        /// Cover image
        #[arg(long, value_name = "IMAGE")]
        cover: Option<PathBuf>,
    },

    /// Merge several books into one
    Merge {
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Split a book into one book per chapter
    Split { epub: PathBuf, output_dir: PathBuf },

    /// Rewrite metadata fields in place
    Update {
        epub: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        publisher: Option<String>,

        #[arg(long)]
        isbn: Option<String>,
    },

    /// Check the structure of a book
    Validate { epub: PathBuf },
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(match verbose {
            true => LevelFilter::Debug,
            false => LevelFilter::Warn,
        });
    }
}

fn load_settings(config: Option<&Path>) -> Result<Settings, EpubError> {
    let loader = match config {
        Some(path) => Loader::new().with_file(path),
        None => Loader::new(),
    };

    Ok(loader.build()?)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("错误: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &settings) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate(epub: &Path, settings: &Settings) -> ExitCode {
    match validate_epub(epub, settings) {
        Ok(report) => {
            println!("{report}");
            match report.has_errors() {
                true => ExitCode::FAILURE,
                false => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            eprintln!("✗ 致命错误: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(command: Command, settings: &Settings) -> Result<ExitCode, EpubError> {
    match command {
        Command::Metadata { epub } => {
            let info = extract_metadata(&epub)?;
            println!("{info}");
            println!("\nJSON 格式:");
            println!("{}", info.to_json()?);
        }

        Command::Text { epub, output } => {
            let text = extract_text(&epub)?;
            match output {
                Some(path) => {
                    fs::write(&path, text)?;
                    println!("文本已提取到: {}", path.display());
                }
                None => println!("{text}"),
            }
        }

        Command::Images { epub, output_dir } => {
            let report = extract_images(&epub, output_dir.as_deref())?;
            for path in &report.extracted {
                println!("✓ 提取: {}", path.display());
            }
            for (name, reason) in &report.skipped {
                eprintln!("✗ 跳过: {name} ({reason})");
            }

            println!("\n完成!");
            println!("  提取图片: {} 张", report.extracted.len());
            if !report.skipped.is_empty() {
                println!("  跳过图片: {} 张", report.skipped.len());
            }
            println!("  保存位置: {}", report.output_dir.display());
        }

        Command::Chapters {
            epub,
            output_dir,
            format,
            separate,
            toc,
            metadata,
        } => {
            let options = ChapterOptions {
                format,
                separate,
                toc,
                metadata,
            };
            let report = extract_chapters(&epub, &output_dir, &options)?;
            for path in &report.files {
                println!("✓ 已保存: {}", path.display());
            }
            if let Some(path) = &report.toc {
                println!("✓ 已生成目录: {}", path.display());
            }

            println!("\n完成!");
            println!("  总章节数: {}", report.chapters.len());
            println!("  输出格式: {}", report.format.extension());
            println!("  保存位置: {}", report.output_dir.display());
        }

        Command::Create {
            markdown,
            output,
            title,
            author,
            cover,
        } => {
            let options = CreateOptions {
                title,
                author,
                cover,
            };
            let report = create_epub(&markdown, &output, &options, settings)?;
            println!("✓ EPUB 创建成功: {}", report.output.display());
            println!("  标题: {}", report.title);
            println!("  作者: {}", report.author);
        }

        Command::Merge { output, inputs } => {
            let report = merge_epubs(inputs.as_slice(), &output, settings)?;
            for path in &report.skipped {
                eprintln!("警告: 找不到文件 {}, 跳过", path.display());
            }
            for (path, chapters) in &report.books {
                println!("✓ {}: 添加了 {} 个章节", path.display(), chapters);
            }

            println!("\n✓ 合并完成!");
            println!("  输出文件: {}", report.output.display());
            println!("  总章节数: {}", report.chapters());
        }

        Command::Split { epub, output_dir } => {
            let report = split_epub(&epub, &output_dir, settings)?;
            for path in &report.files {
                println!("✓ 已保存: {}", path.display());
            }

            println!("\n完成!");
            println!("  总章节数: {}", report.files.len());
            println!("  保存位置: {}", report.output_dir.display());
        }

        Command::Update {
            epub,
            title,
            author,
            language,
            publisher,
            isbn,
        } => {
            let changes = MetadataChanges {
                title,
                author,
                language,
                publisher,
                isbn,
            };
            let report = update_metadata(&epub, &changes)?;
            if report.applied.is_empty() {
                println!("没有修改任何元数据");
                return Ok(ExitCode::SUCCESS);
            }

            for (label, value) in &report.applied {
                println!("✓ 更新{label}: {value}");
            }
            println!("\n✓ 元数据已更新: {}", epub.display());
        }

        Command::Validate { epub } => return Ok(validate(&epub, settings)),
    }

    Ok(ExitCode::SUCCESS)
}
