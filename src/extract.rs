use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Node, Selector};

use crate::cli::ExtractArgs;
use crate::error::ExtractionError;
use crate::fetch::{DEFAULT_FETCH_TIMEOUT, HttpFetcher, PageFetcher as _, parse_page_url};
use crate::formats::{BlockKind, ContentBlock, Link, Section};

static MAIN_CONTAINERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "[role=\"main\"]",
        "article",
        "div.content",
        "#main-content",
        "#content",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid container selector"))
    .collect()
});

static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid heading selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid title selector"));
static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid img selector"));
static TABLES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid table selector"));
static PRES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("pre").expect("valid pre selector"));
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "nav", "button", "form", "head", "iframe",
];

const INLINE: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "del", "dfn", "em", "i", "ins",
    "kbd", "label", "mark", "q", "s", "samp", "small", "span", "strong", "sub", "sup", "time",
    "u", "var",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitLevel {
    #[default]
    Auto,
    Fixed(u8),
}

impl FromStr for SplitLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<u8>() {
            Ok(level @ 1..=6) => Ok(Self::Fixed(level)),
            _ => Err(format!("invalid split level: {s} (expected auto or 1-6)")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub split_level: SplitLevel,
}

pub async fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let html = match (&args.html, &args.url) {
        (Some(path), _) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read html: {path}"))?,
        (None, Some(url)) => {
            let url = parse_page_url(url).context("parse --url")?;
            HttpFetcher::new(DEFAULT_FETCH_TIMEOUT)?
                .fetch(&url)
                .await
                .with_context(|| format!("fetch {url}"))?
        }
        (None, None) => anyhow::bail!("either --url or --html is required"),
    };

    let options = ExtractOptions {
        split_level: args.split_level,
    };
    let sections = extract_sections(&html, &options).context("extract sections")?;
    tracing::info!(sections = sections.len(), "extracted");

    let json = serde_json::to_string_pretty(&sections).context("serialize sections")?;
    println!("{json}");
    Ok(())
}

pub fn extract_sections(
    html: &str,
    options: &ExtractOptions,
) -> Result<Vec<Section>, ExtractionError> {
    if html.trim().is_empty() {
        return Err(ExtractionError::EmptyMarkup);
    }

    let document = Html::parse_document(html);
    let Some(container) = find_main_container(&document) else {
        tracing::debug!("no main content container; extracting whole page as one section");
        return degraded_section(&document).map(|section| vec![section]);
    };

    let boundary = boundary_level(container, options.split_level);
    tracing::debug!(
        container = container.value().name(),
        boundary = ?boundary,
        "extract sections"
    );

    let mut walker = Walker::new(boundary);
    walker.walk_children(container);
    Ok(walker.finish())
}

fn find_main_container(document: &Html) -> Option<ElementRef<'_>> {
    MAIN_CONTAINERS
        .iter()
        .find_map(|selector| document.select(selector).next())
}

fn heading_level(name: &str) -> Option<u8> {
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

fn boundary_level(container: ElementRef<'_>, split: SplitLevel) -> Option<u8> {
    if let SplitLevel::Fixed(level) = split {
        return Some(level);
    }

    let mut counts = [0usize; 7];
    for heading in container.select(&HEADINGS) {
        if let Some(level) = heading_level(heading.value().name()) {
            counts[level as usize] += 1;
        }
    }

    (1..=6u8)
        .find(|level| counts[*level as usize] >= 2)
        .or_else(|| (1..=6u8).find(|level| counts[*level as usize] > 0))
}

fn degraded_section(document: &Html) -> Result<Section, ExtractionError> {
    let body = document
        .select(&BODY)
        .next()
        .ok_or(ExtractionError::NoBody)?;

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    let mut raw = String::new();
    visible_text(body, &mut raw);
    let text = collapse_whitespace(&raw);

    let images = body.select(&IMAGES).collect::<Vec<_>>();
    Ok(Section {
        id: Section::section_id(0),
        title,
        content: if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentBlock::paragraph(text)]
        },
        html: body.inner_html(),
        img_alt: images
            .iter()
            .map(|img| img.value().attr("alt").unwrap_or_default().to_owned())
            .collect(),
        images: images.iter().map(|img| img.html()).collect(),
        tables: body.select(&TABLES).map(|t| t.html()).collect(),
        codes: body.select(&PRES).map(|p| p.html()).collect(),
        annotation: None,
    })
}

fn visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if SKIPPED.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    visible_text(child, out);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

pub(crate) fn anchor_links(html: &str) -> Vec<Link> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&ANCHORS)
        .filter(|anchor| {
            !anchor
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|el| SKIPPED.contains(&el.value().name()))
        })
        .filter_map(|anchor| {
            let href = link_target(anchor.value().attr("href")?)?;
            let mut text = collapse_whitespace(&anchor.text().collect::<String>());
            if text.is_empty() {
                text = anchor
                    .select(&IMAGES)
                    .find_map(|img| img.value().attr("alt"))
                    .map(collapse_whitespace)
                    .filter(|alt| !alt.is_empty())
                    .unwrap_or_else(|| href.to_owned());
            }
            Some(Link {
                text,
                href: href.to_owned(),
            })
        })
        .collect()
}

fn link_target(href: &str) -> Option<&str> {
    let href = href.trim();
    (!href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:")).then_some(href)
}

pub(crate) fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[derive(Debug, Default)]
struct InlineRun {
    text: String,
    links: Vec<Link>,
    html: String,
}

#[derive(Debug, Default)]
struct PendingSection {
    title: String,
    opened_by_heading: bool,
    content: Vec<ContentBlock>,
    html: String,
    images: Vec<String>,
    img_alt: Vec<String>,
    tables: Vec<String>,
    codes: Vec<String>,
}

impl PendingSection {
    fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.images.is_empty()
            && self.tables.is_empty()
            && self.codes.is_empty()
    }
}

struct Walker {
    boundary: Option<u8>,
    done: Vec<PendingSection>,
    current: PendingSection,
    run: InlineRun,
    /// Depth inside an element whose markup was already copied whole.
    verbatim: usize,
}

impl Walker {
    fn new(boundary: Option<u8>) -> Self {
        Self {
            boundary,
            done: Vec::new(),
            current: PendingSection::default(),
            run: InlineRun::default(),
            verbatim: 0,
        }
    }

    fn finish(mut self) -> Vec<Section> {
        self.flush_run(BlockKind::Paragraph, None);
        self.close_current();
        self.done
            .into_iter()
            .enumerate()
            .map(|(ordinal, pending)| Section {
                id: Section::section_id(ordinal),
                title: pending.title,
                content: pending.content,
                html: pending.html,
                images: pending.images,
                tables: pending.tables,
                codes: pending.codes,
                img_alt: pending.img_alt,
                annotation: None,
            })
            .collect()
    }

    fn close_current(&mut self) {
        let pending = std::mem::take(&mut self.current);
        if pending.opened_by_heading || !pending.is_empty() {
            self.done.push(pending);
        }
    }

    fn open_section(&mut self, title: String) {
        self.close_current();
        self.current.title = title;
        self.current.opened_by_heading = true;
    }

    fn walk_children(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.visit(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }

        let copy_whole = self.verbatim == 0
            && heading_level(name).is_none()
            && !INLINE.contains(&name)
            && !matches!(name, "img" | "br")
            && !self.holds_boundary(element);
        if copy_whole {
            self.flush_run(BlockKind::Paragraph, None);
            self.push_html(&element.html());
            self.verbatim += 1;
            self.visit_element(element, name);
            self.verbatim -= 1;
        } else {
            self.visit_element(element, name);
        }
    }

    fn holds_boundary(&self, element: ElementRef<'_>) -> bool {
        let Some(boundary) = self.boundary else {
            return false;
        };
        element.select(&HEADINGS).any(|heading| {
            heading_level(heading.value().name()).is_some_and(|level| level <= boundary)
        })
    }

    fn push_html(&mut self, html: &str) {
        if self.verbatim == 0 {
            self.current.html.push_str(html);
        }
    }

    fn visit_element(&mut self, element: ElementRef<'_>, name: &str) {
        if let Some(level) = heading_level(name) {
            self.flush_run(BlockKind::Paragraph, None);
            self.collect_inline_children(element, false);
            let title = collapse_whitespace(&self.run.text);
            if self.boundary.is_some_and(|boundary| level <= boundary) {
                self.open_section(title);
            }
            let kind = BlockKind::heading(level).unwrap_or(BlockKind::Paragraph);
            self.flush_run(kind, Some(element.html()));
            return;
        }

        match name {
            "p" | "dt" | "dd" | "figcaption" => {
                self.flush_run(BlockKind::Paragraph, None);
                self.collect_inline_children(element, false);
                self.flush_run(BlockKind::Paragraph, Some(element.html()));
            }
            "blockquote" => {
                self.flush_run(BlockKind::Paragraph, None);
                self.collect_inline_children(element, false);
                self.flush_run(BlockKind::Blockquote, Some(element.html()));
            }
            "li" => {
                self.flush_run(BlockKind::Paragraph, None);
                self.collect_inline_children(element, true);
                let html = format!("<li>{}</li>", self.run.html);
                self.flush_run(BlockKind::ListItem, Some(html));
                for child in element.children().filter_map(ElementRef::wrap) {
                    if matches!(child.value().name(), "ul" | "ol") {
                        self.visit(child);
                    }
                }
            }
            "ul" | "ol" => {
                self.flush_run(BlockKind::Paragraph, None);
                self.push_html(&format!("<{name}>"));
                self.walk_children(element);
                self.flush_run(BlockKind::Paragraph, None);
                self.push_html(&format!("</{name}>"));
            }
            "pre" => {
                self.flush_run(BlockKind::Paragraph, None);
                let html = element.html();
                self.push_html(&html);
                self.current.codes.push(html);
            }
            "table" => {
                self.flush_run(BlockKind::Paragraph, None);
                let html = element.html();
                self.push_html(&html);
                self.current.tables.push(html);
            }
            "img" => {
                self.push_image(element);
                self.run.html.push_str(&element.html());
            }
            "br" => self.run.text.push(' '),
            _ if INLINE.contains(&name) => {
                self.collect_inline(element, false);
            }
            _ => {
                self.flush_run(BlockKind::Paragraph, None);
                self.walk_children(element);
                self.flush_run(BlockKind::Paragraph, None);
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        self.run.text.push_str(text);
        self.run.html.push_str(&escape_text(text));
    }

    fn push_image(&mut self, element: ElementRef<'_>) {
        self.current.images.push(element.html());
        self.current.img_alt.push(
            element
                .value()
                .attr("alt")
                .map(collapse_whitespace)
                .unwrap_or_default(),
        );
    }

    fn collect_inline_children(&mut self, element: ElementRef<'_>, skip_lists: bool) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.collect_inline(child, skip_lists);
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_inline(&mut self, element: ElementRef<'_>, skip_lists: bool) {
        let name = element.value().name();
        if SKIPPED.contains(&name) || (skip_lists && matches!(name, "ul" | "ol")) {
            return;
        }

        match name {
            "pre" | "table" => {
                let html = element.html();
                self.run.text.push(' ');
                self.run.html.push_str(&html);
                if name == "pre" {
                    self.current.codes.push(html);
                } else {
                    self.current.tables.push(html);
                }
            }
            "img" => {
                self.push_image(element);
                self.run.html.push_str(&element.html());
            }
            "br" => {
                self.run.text.push(' ');
                self.run.html.push_str("<br>");
            }
            "a" => {
                let start = self.run.text.len();
                let html_start = self.run.html.len();
                self.collect_inline_children(element, skip_lists);
                if let Some(href) = element.value().attr("href").and_then(link_target) {
                    let text = collapse_whitespace(&self.run.text[start..]);
                    self.run.links.push(Link {
                        text,
                        href: href.to_owned(),
                    });
                }
                self.run.html.truncate(html_start);
                self.run.html.push_str(&element.html());
            }
            _ => {
                let html_start = self.run.html.len();
                self.collect_inline_children(element, skip_lists);
                if INLINE.contains(&name) {
                    self.run.html.truncate(html_start);
                    self.run.html.push_str(&element.html());
                } else {
                    self.run.text.push(' ');
                }
            }
        }
    }

    fn flush_run(&mut self, kind: BlockKind, html: Option<String>) {
        let run = std::mem::take(&mut self.run);
        let text = collapse_whitespace(&run.text);
        if !text.is_empty() {
            self.current.content.push(ContentBlock {
                kind,
                text,
                links: run.links,
            });
        }
        match html {
            Some(html) => self.push_html(&html),
            None if !run.html.trim().is_empty() => self.push_html(run.html.trim()),
            None => {}
        }
    }
}
