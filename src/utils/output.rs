//! # 输出工具
//!
//! 两部分：
//! - `OutputSink`：引擎的可重定向进度输出。默认写到标准输出，终端下带颜色；
//!   重定向只影响之后的写入，写入失败不影响计算结果。
//! - `print_*` 系列：命令行前端的统一状态行样式。
//!
//! ## 依赖关系
//! - `OutputSink` 被 `engine.rs` 持有
//! - `print_*` 被 `commands/` 和 `main.rs` 使用
//! - 使用 `colored`、`console` crate

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// 输出详细程度
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// 只输出警告
    Quiet,
    #[default]
    Normal,
    /// 额外输出每个原子对列表、每次迭代的参数值
    Verbose,
}

/// 状态行标签
#[derive(Debug, Clone, Copy)]
enum Tag {
    Info,
    Ok,
    Warn,
    Detail,
}

impl Tag {
    fn text(self) -> &'static str {
        match self {
            Tag::Info => "[*]",
            Tag::Ok => "[OK]",
            Tag::Warn => "[WARN]",
            Tag::Detail => "  -",
        }
    }

    fn colored(self) -> ColoredString {
        match self {
            Tag::Info => self.text().blue().bold(),
            Tag::Ok => self.text().green().bold(),
            Tag::Warn => self.text().yellow().bold(),
            Tag::Detail => self.text().dimmed(),
        }
    }

    fn level(self) -> Verbosity {
        match self {
            Tag::Warn => Verbosity::Quiet,
            Tag::Info | Tag::Ok => Verbosity::Normal,
            Tag::Detail => Verbosity::Verbose,
        }
    }
}

/// 可重定向的进度输出
pub struct OutputSink {
    writer: Box<dyn Write + Send>,
    color: bool,
    verbosity: Verbosity,
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("color", &self.color)
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl OutputSink {
    /// 标准输出；仅当 stdout 是终端时带颜色
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(io::stdout()),
            color: console::Term::stdout().is_term(),
            verbosity: Verbosity::Normal,
        }
    }

    /// 任意写入目标，不带颜色
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer,
            color: false,
            verbosity: Verbosity::Normal,
        }
    }

    /// 丢弃所有输出
    pub fn sink() -> Self {
        Self::new(Box::new(io::sink()))
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// 替换写入目标，保留详细程度
    pub fn redirect(&mut self, writer: Box<dyn Write + Send>) {
        let _ = self.writer.flush();
        self.writer = writer;
        self.color = false;
    }

    pub fn info(&mut self, msg: &str) {
        self.line(Tag::Info, msg);
    }

    pub fn success(&mut self, msg: &str) {
        self.line(Tag::Ok, msg);
    }

    pub fn warning(&mut self, msg: &str) {
        self.line(Tag::Warn, msg);
    }

    pub fn detail(&mut self, msg: &str) {
        self.line(Tag::Detail, msg);
    }

    fn line(&mut self, tag: Tag, msg: &str) {
        if tag.level() > self.verbosity {
            return;
        }
        let result = if self.color {
            writeln!(self.writer, "{} {}", tag.colored(), msg)
        } else {
            writeln!(self.writer, "{} {}", tag.text(), msg)
        };
        if result.is_ok() {
            let _ = self.writer.flush();
        }
    }
}

/// 可克隆的内存缓冲区，便于捕获引擎输出
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的内容（按 UTF-8 解码，非法字节被替换）
    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
// 命令行状态行
// ─────────────────────────────────────────────────────────────

/// 打印成功消息
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// 打印错误消息
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERR]".red().bold(), msg);
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    println!("{} {}", "[*]".blue().bold(), msg);
}

/// 打印跳过消息
pub fn print_skip(msg: &str) {
    println!("{} {}", "[SKIP]".dimmed(), msg);
}

/// 打印输入到输出文件的对应关系
pub fn print_written(from: &str, to: &str) {
    println!(
        "{} {} {} {}",
        "[OK]".green().bold(),
        from.dimmed(),
        "->".cyan(),
        to
    );
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(60);
    println!("\n{}", line.dimmed());
    println!("  {}", title.bold());
    println!("{}\n", line.dimmed());
}

/// 打印分隔线
pub fn print_separator() {
    println!("{}", "─".repeat(60).dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirected_sink_is_plain_text() {
        let buffer = SharedBuffer::new();
        let mut sink = OutputSink::new(Box::new(buffer.clone()));
        sink.info("loading");
        sink.success("done");
        assert_eq!(buffer.contents(), "[*] loading\n[OK] done\n");
    }

    #[test]
    fn test_verbosity_filters_lines() {
        let buffer = SharedBuffer::new();
        let mut sink = OutputSink::new(Box::new(buffer.clone()));
        sink.detail("hidden");
        sink.set_verbosity(Verbosity::Quiet);
        sink.info("hidden too");
        sink.warning("shown");
        sink.set_verbosity(Verbosity::Verbose);
        sink.detail("pair list");
        assert_eq!(buffer.contents(), "[WARN] shown\n  - pair list\n");
    }

    #[test]
    fn test_redirect_affects_only_later_writes() {
        let first = SharedBuffer::new();
        let second = SharedBuffer::new();
        let mut sink = OutputSink::new(Box::new(first.clone()));
        sink.info("one");
        sink.redirect(Box::new(second.clone()));
        sink.info("two");
        assert_eq!(first.contents(), "[*] one\n");
        assert_eq!(second.contents(), "[*] two\n");
    }
}
