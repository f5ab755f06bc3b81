use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use crate::extract::collapse_whitespace;
use crate::formats::{BlockKind, ContentBlock, Link};

pub fn render_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(render_block)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_block(block: &ContentBlock) -> String {
    let text = || escape_line_start(inline_links(&block.text, &block.links));
    match block.kind {
        BlockKind::H1
        | BlockKind::H2
        | BlockKind::H3
        | BlockKind::H4
        | BlockKind::H5
        | BlockKind::H6 => {
            let level = block.kind.heading_level().unwrap_or(1) as usize;
            format!("{} {}", "#".repeat(level), text())
        }
        BlockKind::Paragraph => text(),
        BlockKind::ListItem => format!("- {}", text()),
        BlockKind::Blockquote => format!("> {}", text()),
        BlockKind::Code => format!("```\n{}\n```", block.text),
    }
}

/// Places each link on the first unconsumed occurrence of its anchor text.
/// Links whose anchor is not found are appended so the target survives.
fn inline_links(text: &str, links: &[Link]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut trailing = Vec::new();

    for link in links {
        let anchor = link.text.trim();
        let found = (!anchor.is_empty())
            .then(|| text[cursor..].find(anchor))
            .flatten();
        match found {
            Some(rel) => {
                let start = cursor + rel;
                out.push_str(&escape_markdown(&text[cursor..start]));
                out.push_str(&format!(
                    "[{}]({})",
                    escape_markdown(anchor),
                    destination(&link.href)
                ));
                cursor = start + anchor.len();
            }
            None => trailing.push(link),
        }
    }
    out.push_str(&escape_markdown(&text[cursor..]));

    for link in trailing {
        if !out.is_empty() {
            out.push(' ');
        }
        let dest = destination(&link.href);
        out.push_str(&format!("[{}]({dest})", escape_markdown(&link.href)));
    }
    out
}

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '&') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn escape_line_start(text: String) -> String {
    let bytes = text.as_bytes();
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    let marker = match bytes.first() {
        Some(b'#' | b'>' | b'-' | b'+') => Some(0),
        Some(b'0'..=b'9') if matches!(bytes.get(digits), Some(b'.' | b')')) => Some(digits),
        _ => None,
    };
    match marker {
        Some(at) => format!("{}\\{}", &text[..at], &text[at..]),
        None => text,
    }
}

fn destination(href: &str) -> String {
    if href.chars().any(char::is_whitespace) {
        format!("<{href}>")
    } else {
        href.to_owned()
    }
}

pub fn parse_blocks(markdown: &str) -> Vec<ContentBlock> {
    let mut parser = BlockParser::default();
    for event in Parser::new(markdown) {
        parser.event(event);
    }
    parser.finish()
}

#[derive(Default)]
struct BlockParser {
    blocks: Vec<ContentBlock>,
    current: Option<ContentBlock>,
    quote_depth: usize,
    open_links: Vec<(String, usize)>,
}

impl BlockParser {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                self.begin(BlockKind::heading(heading_number(level)).unwrap_or(BlockKind::H1));
            }
            Event::Start(Tag::Paragraph) => {
                if let Some(block) = self.current.as_mut() {
                    separate(&mut block.text);
                } else {
                    let kind = if self.quote_depth > 0 {
                        BlockKind::Blockquote
                    } else {
                        BlockKind::Paragraph
                    };
                    self.begin(kind);
                }
            }
            Event::Start(Tag::Item) => self.begin(BlockKind::ListItem),
            Event::Start(Tag::CodeBlock(_)) => self.begin(BlockKind::Code),
            Event::Start(Tag::BlockQuote(_)) => self.quote_depth += 1,
            Event::End(TagEnd::BlockQuote(_)) => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Event::Start(Tag::Link { dest_url, .. }) | Event::Start(Tag::Image { dest_url, .. }) => {
                let start = self.current_mut().text.len();
                self.open_links.push((dest_url.to_string(), start));
            }
            Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
                if let Some((href, start)) = self.open_links.pop()
                    && let Some(block) = self.current.as_mut()
                {
                    let text = collapse_whitespace(block.text.get(start..).unwrap_or_default());
                    block.links.push(Link { text, href });
                }
            }
            Event::Text(text) | Event::Code(text) => self.current_mut().text.push_str(&text),
            Event::Html(html) | Event::InlineHtml(html) => {
                self.current_mut().text.push_str(&html);
            }
            Event::SoftBreak | Event::HardBreak => {
                let block = self.current_mut();
                let sep = if block.kind == BlockKind::Code { '\n' } else { ' ' };
                block.text.push(sep);
            }
            Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => self.close(),
            Event::End(TagEnd::Paragraph) => {
                if self
                    .current
                    .as_ref()
                    .is_some_and(|block| block.kind != BlockKind::ListItem)
                {
                    self.close();
                }
            }
            _ => {}
        }
    }

    fn begin(&mut self, kind: BlockKind) {
        self.close();
        self.current = Some(ContentBlock::new(kind, String::new()));
    }

    fn current_mut(&mut self) -> &mut ContentBlock {
        let kind = if self.quote_depth > 0 {
            BlockKind::Blockquote
        } else {
            BlockKind::Paragraph
        };
        self.current
            .get_or_insert_with(|| ContentBlock::new(kind, String::new()))
    }

    fn close(&mut self) {
        self.open_links.clear();
        let Some(mut block) = self.current.take() else {
            return;
        };
        block.text = match block.kind {
            BlockKind::Code => block.text.trim_end_matches('\n').to_owned(),
            _ => collapse_whitespace(&block.text),
        };
        if !block.text.trim().is_empty() || !block.links.is_empty() {
            self.blocks.push(block);
        }
    }

    fn finish(mut self) -> Vec<ContentBlock> {
        self.close();
        self.blocks
    }
}

fn separate(text: &mut String) {
    if !text.is_empty() && !text.ends_with(char::is_whitespace) {
        text.push(' ');
    }
}

fn heading_number(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}
