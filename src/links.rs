use crate::extract::anchor_links;
use crate::formats::{ContentBlock, Link, Section};

const TOKEN_PREFIX: &str = "DL_LINK_";

#[derive(Debug, Default)]
pub struct LinkTokens {
    originals: Vec<String>,
}

impl LinkTokens {
    pub fn protect(markdown: &str) -> (String, Self) {
        let mut store = Self::default();
        let text = store.protect_link_destinations(markdown);
        let text = store.protect_autolinks_and_bare_urls(&text);
        (text, store)
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn missing_in(&self, output: &str) -> Vec<String> {
        self.originals
            .iter()
            .enumerate()
            .filter(|(idx, _)| !output.contains(&token(*idx)))
            .map(|(_, original)| original.clone())
            .collect()
    }

    pub fn restore(&self, output: &str) -> String {
        let mut out = output.to_owned();
        for (idx, original) in self.originals.iter().enumerate() {
            out = out.replace(&token(idx), original);
        }
        out
    }

    fn insert(&mut self, original: String) -> String {
        let idx = self.originals.len();
        self.originals.push(original);
        token(idx)
    }

    fn protect_link_destinations(&mut self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let bytes = input.as_bytes();
        let mut cursor = 0usize;

        while let Some(rel) = input[cursor..].find("](") {
            let start = cursor + rel;
            out.push_str(&input[cursor..start + 2]);

            let mut i = start + 2;
            let mut depth = 1usize;
            while i < bytes.len() {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }

            if depth != 0 {
                out.push_str(&input[start + 2..]);
                return out;
            }

            let original = input[start + 2..i].to_owned();
            let token = self.insert(original);
            out.push_str(&token);
            out.push(')');
            cursor = i + 1;
        }

        out.push_str(&input[cursor..]);
        out
    }

    fn protect_autolinks_and_bare_urls(&mut self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut cursor = 0usize;

        while cursor < input.len() {
            let next = [
                input[cursor..].find("<http"),
                input[cursor..].find("http://"),
                input[cursor..].find("https://"),
            ]
            .into_iter()
            .flatten()
            .min();

            let Some(rel_start) = next else {
                out.push_str(&input[cursor..]);
                break;
            };

            let start = cursor + rel_start;
            out.push_str(&input[cursor..start]);

            if input[start..].starts_with("<http")
                && let Some(rel_end) = input[start..].find('>')
            {
                let end = start + rel_end + 1;
                let token = self.insert(input[start..end].to_owned());
                out.push_str(&token);
                cursor = end;
                continue;
            }

            let end = input[start..]
                .char_indices()
                .find(|(_, ch)| ch.is_whitespace())
                .map(|(rel, _)| start + rel)
                .unwrap_or(input.len());
            let url = input[start..end].trim_end_matches(['.', ',', ';', ':', ')']);
            let end = start + url.len();
            let token = self.insert(url.to_owned());
            out.push_str(&token);
            cursor = end;
        }

        out
    }
}

fn token(idx: usize) -> String {
    format!("{{{{{TOKEN_PREFIX}{idx:06}}}}}")
}

/// Repairs common model mangling of placeholder tokens:
/// - `{DL_LINK_0}` -> `{{DL_LINK_000000}}`
/// - `DL_LINK_0` -> `{{DL_LINK_000000}}`
/// - `{{{DL_LINK_000000}}}` / `{ { DL_LINK_000000 } }` -> `{{DL_LINK_000000}}`
pub fn normalize_placeholder_tokens(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0usize;

    while i < input.len() {
        let rest = &input[i..];

        if rest.starts_with('{')
            && let Some((consumed, token)) = parse_braced_placeholder(rest)
        {
            out.push_str(&token);
            i += consumed;
            continue;
        }

        if rest.starts_with(TOKEN_PREFIX)
            && let Some((consumed, token)) = parse_bare_placeholder(rest)
        {
            out.push_str(&token);
            i += consumed;
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

fn parse_braced_placeholder(input: &str) -> Option<(usize, String)> {
    let mut i = 0usize;
    let mut open = 0usize;
    loop {
        i = skip_ws(input, i);
        if input[i..].starts_with('{') {
            open += 1;
            i += 1;
        } else {
            break;
        }
    }
    if open == 0 || !input[i..].starts_with(TOKEN_PREFIX) {
        return None;
    }

    let (consumed, token) = parse_bare_placeholder(&input[i..])?;
    i += consumed;

    let mut close = 0usize;
    loop {
        let j = skip_ws(input, i);
        if close < open && input[j..].starts_with('}') {
            close += 1;
            i = j + 1;
        } else {
            break;
        }
    }
    if close == 0 {
        return None;
    }
    while input[i..].starts_with('}') {
        i += 1;
    }

    Some((i, token))
}

fn parse_bare_placeholder(input: &str) -> Option<(usize, String)> {
    let rest = input.strip_prefix(TOKEN_PREFIX)?;
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let idx: usize = rest[..digits].parse().ok()?;
    Some((TOKEN_PREFIX.len() + digits, token(idx)))
}

fn skip_ws(input: &str, mut i: usize) -> usize {
    while let Some(ch) = input[i..].chars().next() {
        if !ch.is_whitespace() {
            break;
        }
        i += ch.len_utf8();
    }
    i
}

pub fn unseen_links(section: &Section) -> Vec<Link> {
    let mut unseen: Vec<Link> = Vec::new();
    for link in anchor_links(&section.html) {
        let carried = section.links().any(|l| l.href == link.href)
            || unseen.iter().any(|l| l.href == link.href);
        if !carried {
            unseen.push(link);
        }
    }
    unseen
}

pub fn missing_targets(section: &Section, blocks: &[ContentBlock]) -> Vec<String> {
    let unseen = unseen_links(section);
    let mut missing: Vec<String> = Vec::new();
    for link in section.links().chain(unseen.iter()) {
        let present = blocks.iter().any(|block| {
            block.links.iter().any(|l| l.href == link.href) || block.text.contains(&link.href)
        });
        if !present && !missing.contains(&link.href) {
            missing.push(link.href.clone());
        }
    }
    missing
}
