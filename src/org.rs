//! Markdown to Org rendering on top of `pulldown-cmark` events.

use crate::engine::{ConvertOptions, Wrap};
use log::trace;
use pulldown_cmark as md;

/// Convert a Markdown body to Org markup.
pub fn markdown_to_org(markdown: &str, options: &ConvertOptions) -> String {
    let parser = md::Parser::new_ext(
        markdown,
        md::Options::ENABLE_TABLES
            | md::Options::ENABLE_FOOTNOTES
            | md::Options::ENABLE_STRIKETHROUGH
            | md::Options::ENABLE_TASKLISTS
            | md::Options::ENABLE_HEADING_ATTRIBUTES,
    );

    let mut writer = OrgWriter::new(options);
    for event in parser {
        writer.event(event);
    }
    tidy(&writer.finish())
}

struct ListState {
    /// Next number for ordered lists, `None` for bullets.
    next: Option<u64>,
    /// Width of the current item's bullet, used to indent continuation lines.
    width: usize,
}

#[derive(Default)]
struct Table {
    rows: Vec<Vec<String>>,
    header_rows: usize,
    row: Vec<String>,
    cell: Option<String>,
}

impl Table {
    fn finish_row(&mut self) {
        let row = std::mem::take(&mut self.row);
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0; columns];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let mut out = String::new();
        for (r, row) in self.rows.iter().enumerate() {
            let cells: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(i, width)| {
                    let cell = row.get(i).map_or("", String::as_str);
                    let pad = width - cell.chars().count();
                    format!("{}{}", cell, " ".repeat(pad))
                })
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));

            if r + 1 == self.header_rows {
                let rule: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
                out.push_str(&format!("|{}|\n", rule.join("+")));
            }
        }
        out
    }
}

struct OrgWriter<'o> {
    options: &'o ConvertOptions,
    out: String,
    lists: Vec<ListState>,
    /// A container was just opened; its first block needs no blank line.
    fresh: bool,
    /// Closing line of the open code block.
    code: Option<&'static str>,
    table: Option<Table>,
    /// Nesting of constructs whose text is not emitted (image alt text, autolinks).
    suppress: usize,
    /// Nesting of paragraphs and headings.
    inline_depth: usize,
    html_block: Option<String>,
}

impl<'o> OrgWriter<'o> {
    fn new(options: &'o ConvertOptions) -> Self {
        Self {
            options,
            out: String::new(),
            lists: Vec::new(),
            fresh: false,
            code: None,
            table: None,
            suppress: 0,
            inline_depth: 0,
            html_block: None,
        }
    }

    fn finish(mut self) -> String {
        self.flush_html_block();
        self.out
    }

    fn event(&mut self, event: md::Event) {
        use md::{Event, Tag};

        if !matches!(event, Event::Html(_)) {
            self.flush_html_block();
        }

        match event {
            Event::Start(tag) => {
                trace!("[MD] Start({tag:?})");
                match tag {
                    Tag::Paragraph => {
                        self.start_block();
                        self.inline_depth += 1;
                    }
                    Tag::Heading(level, _id, _classes) => {
                        self.start_block();
                        self.emit(&"*".repeat(level as usize));
                        self.emit(" ");
                        self.inline_depth += 1;
                    }
                    Tag::BlockQuote => {
                        self.start_block();
                        self.emit("#+BEGIN_QUOTE\n");
                        self.fresh = true;
                    }
                    Tag::CodeBlock(kind) => {
                        self.start_block();
                        let lang = match &kind {
                            md::CodeBlockKind::Fenced(info) => {
                                info.split_whitespace().next().unwrap_or("").to_string()
                            }
                            md::CodeBlockKind::Indented => String::new(),
                        };
                        if lang.is_empty() {
                            self.emit("#+BEGIN_EXAMPLE\n");
                            self.code = Some("#+END_EXAMPLE");
                        } else {
                            self.emit(&format!("#+BEGIN_SRC {}\n", lang));
                            self.code = Some("#+END_SRC");
                        }
                    }
                    Tag::List(first) => {
                        if self.lists.is_empty() {
                            self.start_block();
                        } else {
                            self.ensure_line();
                            self.fresh = false;
                        }
                        self.lists.push(ListState {
                            next: first,
                            width: 0,
                        });
                    }
                    Tag::Item => self.start_item(),
                    Tag::FootnoteDefinition(label) => {
                        self.start_block();
                        self.emit(&format!("[fn:{}] ", label));
                        self.fresh = true;
                    }
                    Tag::Table(_aligns) => {
                        self.start_block();
                        self.table = Some(Table::default());
                    }
                    Tag::TableHead | Tag::TableRow => {
                        if let Some(table) = self.table.as_mut() {
                            table.row.clear();
                        }
                    }
                    Tag::TableCell => {
                        if let Some(table) = self.table.as_mut() {
                            table.cell = Some(String::new());
                        }
                    }
                    Tag::Emphasis => self.emit("/"),
                    Tag::Strong => self.emit("*"),
                    Tag::Strikethrough => self.emit("+"),
                    Tag::Link(link_type, dest, _title) => match link_type {
                        md::LinkType::Autolink => {
                            self.emit(&format!("[[{}]]", dest));
                            self.suppress += 1;
                        }
                        md::LinkType::Email => {
                            self.emit(&format!("[[mailto:{}]]", dest));
                            self.suppress += 1;
                        }
                        _ => self.emit(&format!("[[{}][", dest)),
                    },
                    Tag::Image(_link_type, dest, _title) => {
                        self.emit(&format!("[[{}]]", dest));
                        self.suppress += 1;
                    }
                }
            }
            Event::End(tag) => {
                trace!("[MD] End({tag:?})");
                match tag {
                    Tag::Paragraph | Tag::Heading(..) => {
                        self.inline_depth = self.inline_depth.saturating_sub(1);
                        self.ensure_line();
                    }
                    Tag::BlockQuote => {
                        self.ensure_line();
                        self.emit("#+END_QUOTE\n");
                    }
                    Tag::CodeBlock(_) => {
                        self.ensure_line();
                        if let Some(close) = self.code.take() {
                            self.emit(close);
                            self.emit("\n");
                        }
                    }
                    Tag::List(_) => {
                        self.lists.pop();
                        self.ensure_line();
                    }
                    Tag::Item | Tag::FootnoteDefinition(_) => self.ensure_line(),
                    Tag::Table(_) => {
                        if let Some(table) = self.table.take() {
                            let rendered = table.render();
                            self.emit(&rendered);
                        }
                    }
                    Tag::TableHead => {
                        if let Some(table) = self.table.as_mut() {
                            table.finish_row();
                            table.header_rows = table.rows.len();
                        }
                    }
                    Tag::TableRow => {
                        if let Some(table) = self.table.as_mut() {
                            table.finish_row();
                        }
                    }
                    Tag::TableCell => {
                        if let Some(table) = self.table.as_mut() {
                            let cell = table.cell.take().unwrap_or_default();
                            table.row.push(cell.trim().to_string());
                        }
                    }
                    Tag::Emphasis => self.emit("/"),
                    Tag::Strong => self.emit("*"),
                    Tag::Strikethrough => self.emit("+"),
                    Tag::Link(md::LinkType::Autolink | md::LinkType::Email, ..) | Tag::Image(..) => {
                        self.suppress = self.suppress.saturating_sub(1);
                    }
                    Tag::Link(..) => self.emit("]]"),
                }
            }
            Event::Text(text) => {
                trace!("[MD] Text({text})");
                if self.code.is_some() {
                    self.emit_code(&text);
                } else {
                    self.emit_text(&text);
                }
            }
            Event::Code(text) => self.emit(&format!("={}=", text)),
            Event::Html(html) => {
                trace!("[MD] Html({html})");
                self.html(&html);
            }
            Event::FootnoteReference(label) => self.emit(&format!("[fn:{}]", label)),
            Event::SoftBreak => match self.options.wrap {
                Wrap::None => self.emit(" "),
                Wrap::Preserve => self.emit("\n"),
            },
            Event::HardBreak => self.emit("\\\\\n"),
            Event::Rule => {
                self.start_block();
                self.emit("-----\n");
            }
            Event::TaskListMarker(done) => self.emit(if done { "[X] " } else { "[ ] " }),
        }
    }

    fn start_item(&mut self) {
        self.ensure_line();
        let outer: usize = match self.lists.split_last() {
            Some((_, enclosing)) => enclosing.iter().map(|l| l.width).sum(),
            None => 0,
        };
        let Some(list) = self.lists.last_mut() else {
            return;
        };
        let bullet = match list.next {
            Some(n) => {
                list.next = Some(n + 1);
                format!("{}. ", n)
            }
            None => "- ".to_string(),
        };
        list.width = bullet.len();
        self.out.push_str(&" ".repeat(outer));
        self.out.push_str(&bullet);
        self.fresh = true;
    }

    fn html(&mut self, html: &str) {
        if !self.options.raw_html {
            self.emit(html);
            return;
        }
        let in_cell = self.table.as_ref().map_or(false, |t| t.cell.is_some());
        if self.inline_depth == 0 && !in_cell && html.ends_with('\n') {
            self.html_block
                .get_or_insert_with(String::new)
                .push_str(html);
        } else {
            self.emit(&format!("@@html:{}@@", html));
        }
    }

    fn flush_html_block(&mut self) {
        if let Some(html) = self.html_block.take() {
            self.start_block();
            self.emit("#+BEGIN_EXPORT html\n");
            self.emit(html.trim_end());
            self.emit("\n#+END_EXPORT\n");
        }
    }

    /// Separate a new block from whatever came before it.
    fn start_block(&mut self) {
        if self.fresh {
            self.fresh = false;
        } else {
            self.blank_line();
        }
    }

    fn ensure_line(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn blank_line(&mut self) {
        self.ensure_line();
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn indent(&self) -> String {
        " ".repeat(self.lists.iter().map(|l| l.width).sum())
    }

    /// Write text, indenting each new line to the enclosing list item.
    fn emit(&mut self, text: &str) {
        if self.suppress > 0 || text.is_empty() {
            return;
        }
        self.fresh = false;

        if let Some(cell) = self.table.as_mut().and_then(|t| t.cell.as_mut()) {
            cell.push_str(&text.replace('\n', " "));
            return;
        }

        let indent = self.indent();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            if line.is_empty() {
                continue;
            }
            if self.out.is_empty() || self.out.ends_with('\n') {
                self.out.push_str(&indent);
            }
            self.out.push_str(line);
        }
    }

    /// Literal text that would open an Org line as a heading or keyword is escaped.
    fn emit_text(&mut self, text: &str) {
        let at_line_start = self.out.is_empty() || self.out.ends_with('\n');
        let in_cell = self.table.as_ref().map_or(false, |t| t.cell.is_some());
        if at_line_start && !in_cell && starts_org_line(text) {
            self.emit(&format!(",{}", text));
        } else {
            self.emit(text);
        }
    }

    /// Code lines that Org would read as structure are escaped with a comma.
    fn emit_code(&mut self, text: &str) {
        let escaped: Vec<String> = text
            .split('\n')
            .map(|line| {
                if line.starts_with('*') || line.starts_with("#+") {
                    format!(",{}", line)
                } else {
                    line.to_string()
                }
            })
            .collect();
        self.emit(&escaped.join("\n"));
    }
}

/// `* heading` (any run of stars followed by a space or nothing) or `#+KEYWORD`.
fn starts_org_line(text: &str) -> bool {
    if text.starts_with("#+") {
        return true;
    }
    text.starts_with('*')
        && text
            .trim_start_matches('*')
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
}

/// Strip trailing whitespace, collapse blank-line runs and end with one newline.
fn tidy(org: &str) -> String {
    let mut result = org
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    while result.contains("\n\n\n") {
        result = result.replace("\n\n\n", "\n\n");
    }

    let trimmed = result.trim_end().to_string();
    if trimmed.is_empty() {
        String::new()
    } else {
        trimmed + "\n"
    }
}
