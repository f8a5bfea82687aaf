//! Markdown to UI-neutral markup.
//!
//! Front-ends turn [`Markup`] into their own widgets; the core only decides the
//! structure (lines, spans, emphasis) and code colours.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;

const CODE_THEME: &str = "base16-ocean.dark";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanStyle {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub link: bool,
    pub fg: Option<Rgb>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupSpan {
    pub text: String,
    pub style: SpanStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Text,
    Heading(u8),
    ListItem,
    Quote,
    /// Line of a fenced or indented code block; `block` numbers the blocks
    /// of one document so highlighting state never leaks between them.
    Code { lang: Option<String>, block: usize },
    Rule,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupLine {
    pub kind: LineKind,
    pub indent: u16,
    pub spans: Vec<MarkupSpan>,
}

impl MarkupLine {
    fn new(kind: LineKind, indent: u16) -> Self {
        Self {
            kind,
            indent,
            spans: Vec::new(),
        }
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        match self.spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.spans.push(MarkupSpan {
                text: text.to_string(),
                style,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Markup {
    pub lines: Vec<MarkupLine>,
}

impl Markup {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn plain_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line.kind {
                LineKind::Rule => "---".to_string(),
                _ => line.text(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn code_block_count(&self) -> usize {
        let mut blocks: Vec<usize> = self
            .lines
            .iter()
            .filter_map(|line| match line.kind {
                LineKind::Code { block, .. } => Some(block),
                _ => None,
            })
            .collect();
        blocks.dedup();
        blocks.len()
    }
}

/// Parse then highlight: one full step of the progressive renderer.
pub fn render_markdown(text: &str) -> Markup {
    let mut markup = parse_markdown(text);
    highlight_code(&mut markup);
    markup
}

pub fn parse_markdown(text: &str) -> Markup {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_STRIKETHROUGH);

    let mut builder = MarkupBuilder::default();
    for event in Parser::new_ext(text, opts) {
        builder.event(event);
    }
    builder.finish()
}

struct CodeBuffer {
    lang: Option<String>,
    text: String,
}

#[derive(Default)]
struct MarkupBuilder {
    lines: Vec<MarkupLine>,
    current: Option<MarkupLine>,
    bold: usize,
    italic: usize,
    strike: usize,
    link: usize,
    quote: usize,
    heading: Option<u8>,
    lists: Vec<Option<u64>>,
    code: Option<CodeBuffer>,
    code_blocks: usize,
}

impl MarkupBuilder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some(code) = self.code.as_mut() {
                    code.text.push_str(&text);
                } else {
                    self.push_text(&text, self.style());
                }
            }
            Event::Code(code) => {
                let style = SpanStyle {
                    code: true,
                    ..self.style()
                };
                self.push_text(&code, style);
            }
            Event::Html(html) | Event::InlineHtml(html) => self.push_text(&html, self.style()),
            Event::SoftBreak => self.push_text(" ", self.style()),
            Event::HardBreak => {
                let kind = self.text_kind();
                self.open_line(kind);
            }
            Event::Rule => {
                self.begin_block();
                let indent = self.indent();
                self.lines.push(MarkupLine::new(LineKind::Rule, indent));
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                // A loose list item opens a paragraph right after its bullet
                let bullet_only = matches!(
                    &self.current,
                    Some(line) if line.kind == LineKind::ListItem && line.spans.len() == 1
                );
                if !bullet_only {
                    if self.lists.is_empty() {
                        self.begin_block();
                    }
                    let kind = self.text_kind();
                    self.open_line(kind);
                }
            }
            Tag::Heading { level, .. } => {
                self.begin_block();
                let level = heading_level(level);
                self.heading = Some(level);
                self.open_line(LineKind::Heading(level));
            }
            Tag::BlockQuote { .. } => {
                self.begin_block();
                self.quote += 1;
            }
            Tag::CodeBlock(kind) => {
                self.begin_block();
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|s| s.to_string()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some(CodeBuffer {
                    lang,
                    text: String::new(),
                });
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.begin_block();
                } else {
                    self.flush();
                }
                self.lists.push(start);
            }
            Tag::Item => {
                let bullet = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let bullet = format!("{}. ", n);
                        *n += 1;
                        bullet
                    }
                    _ => "• ".to_string(),
                };
                self.open_line(LineKind::ListItem);
                if let Some(line) = self.current.as_mut() {
                    line.push(&bullet, SpanStyle::default());
                }
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::Strikethrough => self.strike += 1,
            Tag::Link { .. } => self.link += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::Item => self.flush(),
            TagEnd::Heading { .. } => {
                self.flush();
                self.heading = None;
            }
            TagEnd::BlockQuote { .. } => {
                self.flush();
                self.quote = self.quote.saturating_sub(1);
            }
            TagEnd::CodeBlock => self.finish_code(),
            TagEnd::List { .. } => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            TagEnd::Link { .. } => self.link = self.link.saturating_sub(1),
            _ => {}
        }
    }

    fn style(&self) -> SpanStyle {
        SpanStyle {
            bold: self.bold > 0 || self.heading.is_some(),
            italic: self.italic > 0,
            strikethrough: self.strike > 0,
            code: false,
            link: self.link > 0,
            fg: None,
        }
    }

    fn text_kind(&self) -> LineKind {
        if let Some(level) = self.heading {
            LineKind::Heading(level)
        } else if self.quote > 0 {
            LineKind::Quote
        } else if matches!(&self.current, Some(line) if line.kind == LineKind::ListItem) {
            LineKind::ListItem
        } else {
            LineKind::Text
        }
    }

    fn indent(&self) -> u16 {
        (self.lists.len().saturating_sub(1) * 2 + self.quote * 2) as u16
    }

    /// Separate top-level blocks with one blank line
    fn begin_block(&mut self) {
        self.flush();
        let needs_gap = self
            .lines
            .last()
            .map(|line| line.kind != LineKind::Blank)
            .unwrap_or(false);
        if needs_gap && self.lists.is_empty() {
            self.lines.push(MarkupLine::new(LineKind::Blank, 0));
        }
    }

    fn open_line(&mut self, kind: LineKind) {
        self.flush();
        let indent = self.indent();
        self.current = Some(MarkupLine::new(kind, indent));
    }

    fn flush(&mut self) {
        if let Some(line) = self.current.take() {
            self.lines.push(line);
        }
    }

    fn push_text(&mut self, text: &str, style: SpanStyle) {
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            if self.current.is_none() {
                let kind = self.text_kind();
                self.open_line(kind);
            }
            if let Some(line) = self.current.as_mut() {
                line.push(first, style);
            }
        }
        for part in parts {
            let kind = self.text_kind();
            self.open_line(kind);
            if let Some(line) = self.current.as_mut() {
                line.push(part, style);
            }
        }
    }

    fn finish_code(&mut self) {
        let Some(code) = self.code.take() else {
            return;
        };
        let block = self.code_blocks;
        self.code_blocks += 1;

        let indent = self.indent();
        let style = SpanStyle {
            code: true,
            ..SpanStyle::default()
        };
        for text in code.text.lines() {
            let mut line = MarkupLine::new(
                LineKind::Code {
                    lang: code.lang.clone(),
                    block,
                },
                indent,
            );
            line.push(text, style);
            self.lines.push(line);
        }
    }

    fn finish(mut self) -> Markup {
        self.flush();
        self.finish_code();
        Markup { lines: self.lines }
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Syntax highlighting assets, loaded once
struct CodeAssets {
    syntax_set: SyntaxSet,
    theme: Theme,
}

fn code_assets() -> Option<&'static CodeAssets> {
    static ASSETS: OnceLock<Option<CodeAssets>> = OnceLock::new();
    ASSETS
        .get_or_init(|| {
            let syntax_set = SyntaxSet::load_defaults_newlines();
            let theme_set = ThemeSet::load_defaults();
            let theme = theme_set
                .themes
                .get(CODE_THEME)
                .cloned()
                .or_else(|| theme_set.themes.values().next().cloned());
            if theme.is_none() {
                log::warn!("no syntax theme available, code blocks stay uncoloured");
            }
            theme.map(|theme| CodeAssets { syntax_set, theme })
        })
        .as_ref()
}

/// Colour every code block in place. Safe to call repeatedly: each line is
/// re-highlighted from its text, not from previous spans.
pub fn highlight_code(markup: &mut Markup) {
    let Some(assets) = code_assets() else {
        return;
    };

    let mut idx = 0;
    while idx < markup.lines.len() {
        let (lang, block) = match &markup.lines[idx].kind {
            LineKind::Code { lang, block } => (lang.clone(), *block),
            _ => {
                idx += 1;
                continue;
            }
        };

        let syntax = lang
            .as_deref()
            .and_then(|token| assets.syntax_set.find_syntax_by_token(token))
            .unwrap_or_else(|| assets.syntax_set.find_syntax_plain_text());
        let mut highlighter = HighlightLines::new(syntax, &assets.theme);

        while idx < markup.lines.len() {
            let same_block = matches!(
                &markup.lines[idx].kind,
                LineKind::Code { block: b, .. } if *b == block
            );
            if !same_block {
                break;
            }

            let line = &mut markup.lines[idx];
            let source = format!("{}\n", line.text());
            match highlighter.highlight_line(&source, &assets.syntax_set) {
                Ok(ranges) => {
                    let mut highlighted = MarkupLine::new(line.kind.clone(), line.indent);
                    for (style, text) in ranges {
                        let text = text.trim_end_matches('\n');
                        let fg = style.foreground;
                        highlighted.push(
                            text,
                            SpanStyle {
                                code: true,
                                bold: style.font_style.contains(FontStyle::BOLD),
                                italic: style.font_style.contains(FontStyle::ITALIC),
                                fg: Some(Rgb(fg.r, fg.g, fg.b)),
                                ..SpanStyle::default()
                            },
                        );
                    }
                    line.spans = highlighted.spans;
                }
                Err(e) => log::debug!("highlight failed: {}", e),
            }
            idx += 1;
        }
    }
}
