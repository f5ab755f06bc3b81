use crate::client::LlmClient;
use crate::error::{RewriteError, RewriteErrorKind};
use crate::formats::{Annotation, BlockKind, ContentBlock, Level, RewrittenSection, Section};
use crate::links::{LinkTokens, missing_targets, normalize_placeholder_tokens, unseen_links};
use crate::markdown::{parse_blocks, render_blocks};
use crate::stage::{StageOptions, run_units};

// First call plus one strict retry.
const TOKEN_ATTEMPTS: usize = 2;

const REFERENCES_HEADING: &str = "References:";

#[derive(Debug, Clone)]
pub struct LevelRewrites {
    pub id: String,
    pub title: String,
    pub beginner: RewrittenSection,
    pub intermediate: RewrittenSection,
    pub advanced: RewrittenSection,
}

impl LevelRewrites {
    pub fn get(&self, level: Level) -> &RewrittenSection {
        match level {
            Level::Beginner => &self.beginner,
            Level::Intermediate => &self.intermediate,
            Level::Advanced => &self.advanced,
        }
    }
}

#[derive(Debug, Default)]
pub struct RewriteReport {
    pub sections: Vec<LevelRewrites>,
    pub failures: Vec<RewriteError>,
}

pub fn advanced_section(section: &Section) -> RewrittenSection {
    RewrittenSection {
        id: section.id.clone(),
        title: section.title.clone(),
        level: Level::Advanced,
        content: vec![ContentBlock::paragraph(section.html.clone())],
    }
}

pub async fn rewrite_section(
    client: &LlmClient,
    section: &Section,
    level: Level,
) -> Result<RewrittenSection, RewriteError> {
    if level == Level::Advanced {
        return Ok(advanced_section(section));
    }

    let fail = |kind: RewriteErrorKind| RewriteError {
        section_id: section.id.clone(),
        level,
        kind,
    };
    let annotation = section
        .annotation
        .as_ref()
        .ok_or_else(|| fail(RewriteErrorKind::MissingAnnotation))?;

    let markdown = prompt_markdown(section);
    if markdown.trim().is_empty() {
        return Ok(RewrittenSection {
            id: section.id.clone(),
            title: section.title.clone(),
            level,
            content: Vec::new(),
        });
    }

    let (protected, tokens) = LinkTokens::protect(&markdown);
    tracing::debug!(
        section_id = %section.id,
        level = %level,
        links = tokens.len(),
        "rewrite section"
    );

    let mut accepted = None;
    let mut last_missing = Vec::new();
    for attempt in 0..TOKEN_ATTEMPTS {
        let strict = attempt > 0;
        let instructions = rewrite_instructions(level, annotation, strict);
        let raw = client
            .generate(&instructions, &protected)
            .await
            .map_err(|err| fail(err.into()))?;

        let out = normalize_placeholder_tokens(strip_wrapping_fence(&raw));
        last_missing = tokens.missing_in(&out);
        if last_missing.is_empty() {
            accepted = Some(out);
            break;
        }

        tracing::warn!(
            section_id = %section.id,
            level = %level,
            attempt = attempt + 1,
            missing_tokens = last_missing.len(),
            "placeholder tokens lost in rewrite"
        );
    }
    let Some(out) = accepted else {
        return Err(fail(RewriteErrorKind::LinkLost {
            missing: last_missing,
        }));
    };

    let content = parse_blocks(&tokens.restore(&out));
    if content.is_empty() {
        return Err(fail(RewriteErrorKind::EmptyOutput));
    }
    let missing = missing_targets(section, &content);
    if !missing.is_empty() {
        return Err(fail(RewriteErrorKind::LinkLost { missing }));
    }

    Ok(RewrittenSection {
        id: section.id.clone(),
        title: section.title.clone(),
        level,
        content,
    })
}

pub async fn rewrite_sections(
    client: &LlmClient,
    sections: &[Section],
    options: &StageOptions,
) -> Result<RewriteReport, RewriteError> {
    const MODEL_LEVELS: [Level; 2] = [Level::Beginner, Level::Intermediate];

    let units: Vec<(Section, Level)> = sections
        .iter()
        .flat_map(|section| MODEL_LEVELS.map(|level| (section.clone(), level)))
        .collect();

    let mut outcomes = run_units(
        units,
        client.concurrency(),
        options.on_section_failure,
        |(section, level)| {
            let client = client.clone();
            async move { rewrite_section(&client, &section, level).await }
        },
    )
    .await
    .map_err(|aborted| aborted.error)?
    .into_iter();

    let mut report = RewriteReport::default();
    for section in sections {
        let (Some(beginner), Some(intermediate)) = (outcomes.next(), outcomes.next()) else {
            break;
        };
        match (beginner, intermediate) {
            (Ok(beginner), Ok(intermediate)) => report.sections.push(LevelRewrites {
                id: section.id.clone(),
                title: section.title.clone(),
                beginner,
                intermediate,
                advanced: advanced_section(section),
            }),
            (beginner, intermediate) => {
                for err in [beginner.err(), intermediate.err()].into_iter().flatten() {
                    tracing::warn!(
                        section_id = %err.section_id,
                        level = %err.level,
                        error = %err,
                        "rewrite failed; omitting section"
                    );
                    report.failures.push(err);
                }
            }
        }
    }
    Ok(report)
}

fn prompt_markdown(section: &Section) -> String {
    let body = render_blocks(&section.content);
    let unseen = unseen_links(section);
    if unseen.is_empty() {
        return body;
    }

    let references: Vec<ContentBlock> = unseen
        .into_iter()
        .map(|link| ContentBlock {
            kind: BlockKind::ListItem,
            text: link.text.clone(),
            links: vec![link],
        })
        .collect();
    let list = render_blocks(&references);
    if body.is_empty() {
        format!("{REFERENCES_HEADING}\n\n{list}")
    } else {
        format!("{body}\n\n{REFERENCES_HEADING}\n\n{list}")
    }
}

fn rewrite_instructions(level: Level, annotation: &Annotation, strict: bool) -> String {
    let audience = match level {
        Level::Beginner => {
            "Audience: readers with no knowledge of the field.\n\
- Explain every difficult term listed below in plain words where it first appears.\n\
- Use short sentences and everyday vocabulary; avoid jargon.\n"
        }
        Level::Intermediate | Level::Advanced => {
            "Audience: professionals and students with some background in the field.\n\
- Keep the technical vocabulary.\n\
- Briefly explain field-specific jargon inline where it first appears.\n"
        }
    };

    let terms = if annotation.difficult_terms.is_empty() {
        "(none)".to_owned()
    } else {
        annotation
            .difficult_terms
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut instructions = format!(
        "You rewrite one section of a technical document for a specific audience.\n\
Topic: {topic}\n\
Purpose: {purpose}\n\
Difficult terms: {terms}\n\
\n\
{audience}\
\n\
Hard rules:\n\
- Keep the meaning and the order of the content; do not drop facts.\n\
- Output Markdown: headings, paragraphs, list items and block quotes only.\n\
- Keep every link, including the items under \"References:\" at the end. Do not change placeholder tokens of the form {{{{DL_LINK_000000}}}} (copy them exactly; no spaces; two braces).\n\
- Do not add commentary.\n",
        topic = annotation.topic,
        purpose = annotation.purpose_of_document,
    );
    if strict {
        instructions.push_str(
            "\n\
CRITICAL:\n\
- Your output MUST contain every placeholder token that appears in the input, unchanged.\n\
- Before replying, verify all placeholder tokens are present exactly.\n",
        );
    }
    instructions.push_str("\nOutput:\n- Output ONLY the rewritten Markdown.\n");
    instructions
}

fn strip_wrapping_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match inner.split_once('\n') {
        Some((_lang, body)) => body.trim(),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::{ScriptedService, client};
    use crate::error::ServiceError;
    use crate::formats::Link;
    use crate::stage::SectionFailurePolicy;

    fn section(id: &str) -> Section {
        Section {
            id: id.to_owned(),
            title: "Install".to_owned(),
            content: vec![
                ContentBlock::new(BlockKind::H2, "Install"),
                ContentBlock {
                    kind: BlockKind::Paragraph,
                    text: "Run the installer from the downloads page.".to_owned(),
                    links: vec![Link {
                        text: "downloads page".to_owned(),
                        href: "https://example.com/downloads".to_owned(),
                    }],
                },
            ],
            html: "<h2>Install</h2><p>Run the installer from the <a href=\"https://example.com/downloads\">downloads page</a>.</p>".to_owned(),
            images: Vec::new(),
            tables: Vec::new(),
            codes: Vec::new(),
            img_alt: Vec::new(),
            annotation: Some(Annotation {
                topic: "installation".to_owned(),
                purpose_of_document: "Get the tool installed.".to_owned(),
                difficult_terms: BTreeSet::from(["installer".to_owned()]),
            }),
        }
    }

    fn echo() -> Arc<ScriptedService> {
        Arc::new(ScriptedService::with_fn(|request| Ok(request.input.clone())))
    }

    #[tokio::test]
    async fn links_survive_a_faithful_rewrite() {
        let service = echo();
        let client = client(Arc::clone(&service));
        let rewritten = rewrite_section(&client, &section("section-1"), Level::Beginner)
            .await
            .unwrap();

        assert_eq!(rewritten.level, Level::Beginner);
        assert_eq!(rewritten.content[0].kind, BlockKind::H2);
        assert_eq!(
            rewritten.content[1].links[0].href,
            "https://example.com/downloads"
        );

        let requests = service.requests.lock().unwrap();
        assert!(!requests[0].input.contains("example.com"));
        assert!(requests[0].input.contains("{{DL_LINK_000000}}"));
        assert!(requests[0].instructions.contains("no knowledge of the field"));
        assert!(requests[0].instructions.contains("installer"));
    }

    fn extracted(html: &str) -> Section {
        let mut sections =
            crate::extract::extract_sections(html, &Default::default()).unwrap();
        let mut section = sections.remove(0);
        section.annotation = section_annotation();
        section
    }

    fn section_annotation() -> Option<Annotation> {
        Some(Annotation {
            topic: "reference".to_owned(),
            purpose_of_document: "Point at details.".to_owned(),
            difficult_terms: BTreeSet::new(),
        })
    }

    const TABLE_AND_IMAGE_LINKS: &str = r#"<main><h1>A</h1><p>See below.</p>
<table><tr><td><a href="/t">ref</a></td></tr></table>
<p><a href="/img"><img src="chart.png" alt="Chart"></a></p></main>"#;

    #[tokio::test]
    async fn table_and_image_links_reach_the_model_and_survive() {
        let service = echo();
        let client = client(Arc::clone(&service));
        let section = extracted(TABLE_AND_IMAGE_LINKS);

        let rewritten = rewrite_section(&client, &section, Level::Beginner)
            .await
            .unwrap();

        let hrefs: Vec<&str> = rewritten
            .content
            .iter()
            .flat_map(|b| b.links.iter())
            .map(|l| l.href.as_str())
            .collect();
        assert!(hrefs.contains(&"/t"), "{hrefs:?}");
        assert!(hrefs.contains(&"/img"), "{hrefs:?}");
        let requests = service.requests.lock().unwrap();
        assert!(requests[0].input.contains("References:"));
    }

    #[tokio::test]
    async fn dropped_table_link_is_rejected() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            let kept = request.input.split("References:").next().unwrap_or_default();
            Ok(kept.to_owned())
        }));
        let client = client(service);
        let section = extracted(TABLE_AND_IMAGE_LINKS);

        let err = rewrite_section(&client, &section, Level::Intermediate)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            RewriteErrorKind::LinkLost { ref missing } if missing.contains(&"/t".to_owned())
        ));
    }

    #[tokio::test]
    async fn lost_tokens_are_retried_once_with_strict_instructions() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            if request.instructions.contains("CRITICAL") {
                Ok(request.input.clone())
            } else {
                Ok("Run the installer.".to_owned())
            }
        }));
        let client = client(Arc::clone(&service));
        let rewritten = rewrite_section(&client, &section("section-1"), Level::Intermediate)
            .await
            .unwrap();

        assert_eq!(service.calls(), 2);
        assert!(!rewritten.content[1].links.is_empty());
    }

    #[tokio::test]
    async fn persistent_link_loss_is_rejected() {
        let service = Arc::new(ScriptedService::replies(vec![Ok(
            "Run the installer.".to_owned()
        )]));
        let client = client(Arc::clone(&service));
        let err = rewrite_section(&client, &section("section-4"), Level::Beginner)
            .await
            .unwrap_err();

        assert_eq!(service.calls(), TOKEN_ATTEMPTS);
        assert_eq!(err.section_id, "section-4");
        assert_eq!(err.level, Level::Beginner);
        match err.kind {
            RewriteErrorKind::LinkLost { missing } => {
                assert_eq!(missing, vec!["https://example.com/downloads".to_owned()]);
            }
            other => panic!("unexpected error kind: {other}"),
        }
    }

    #[tokio::test]
    async fn advanced_passes_markup_through_without_a_call() {
        let service = echo();
        let client = client(Arc::clone(&service));
        let source = section("section-2");
        let rewritten = rewrite_section(&client, &source, Level::Advanced)
            .await
            .unwrap();

        assert_eq!(service.calls(), 0);
        assert_eq!(rewritten.content, vec![ContentBlock::paragraph(source.html)]);
    }

    #[tokio::test]
    async fn missing_annotation_fails_before_calling() {
        let service = echo();
        let client = client(Arc::clone(&service));
        let mut source = section("section-0");
        source.annotation = None;

        let err = rewrite_section(&client, &source, Level::Beginner)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, RewriteErrorKind::MissingAnnotation));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn blank_output_is_rejected() {
        let mut source = section("section-0");
        source.content[1].links.clear();
        let service = Arc::new(ScriptedService::replies(vec![Ok("  \n".to_owned())]));
        let client = client(service);

        let err = rewrite_section(&client, &source, Level::Beginner)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, RewriteErrorKind::EmptyOutput));
    }

    #[test]
    fn wrapping_fence_is_removed() {
        assert_eq!(strip_wrapping_fence("```markdown\n# A\n\ntext\n```"), "# A\n\ntext");
        assert_eq!(strip_wrapping_fence("plain"), "plain");
    }

    #[tokio::test]
    async fn omit_policy_drops_only_failed_sections() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            if request.input.contains("broken") {
                Err(ServiceError::Rejected {
                    status: 400,
                    message: "no".to_owned(),
                })
            } else {
                Ok(request.input.clone())
            }
        }));
        let client = client(service);
        let mut broken = section("section-1");
        broken.content.push(ContentBlock::paragraph("broken"));
        let sections = vec![section("section-0"), broken, section("section-2")];

        let report = rewrite_sections(
            &client,
            &sections,
            &StageOptions {
                on_section_failure: SectionFailurePolicy::Omit,
            },
        )
        .await
        .unwrap();

        let ids: Vec<_> = report.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["section-0", "section-2"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|e| e.section_id == "section-1"));
        assert_eq!(report.sections[0].get(Level::Advanced).level, Level::Advanced);

        let err = rewrite_sections(&client, &sections, &StageOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.section_id, "section-1");
    }
}
