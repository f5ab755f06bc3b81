use crate::client::LlmClient;
use crate::error::SummarizationError;
use crate::formats::{Level, Section, SummarySet};

pub const DEFAULT_MAX_INPUT_CHARS: usize = 48_000;

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub max_input_chars: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }
}

pub fn document_text(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|section| {
            section
                .content
                .iter()
                .map(|block| block.text.trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub async fn summarize(
    client: &LlmClient,
    sections: &[Section],
    options: &SummaryOptions,
) -> Result<SummarySet, SummarizationError> {
    let text = document_text(sections);
    if text.trim().is_empty() {
        return Err(SummarizationError::EmptyDocument);
    }

    let input = truncate_chars(&text, options.max_input_chars);
    if input.len() < text.len() {
        tracing::info!(
            chars = options.max_input_chars,
            "document text truncated for summarization"
        );
    }

    let (beginner, intermediate, advanced) = tokio::try_join!(
        summarize_level(client, Level::Beginner, input),
        summarize_level(client, Level::Intermediate, input),
        summarize_level(client, Level::Advanced, input),
    )?;

    let missing: Vec<Level> = [
        (Level::Beginner, &beginner),
        (Level::Intermediate, &intermediate),
        (Level::Advanced, &advanced),
    ]
    .into_iter()
    .filter(|(_, text)| text.is_empty())
    .map(|(level, _)| level)
    .collect();
    if !missing.is_empty() {
        return Err(SummarizationError::Incomplete { missing });
    }

    Ok(SummarySet {
        beginner_level_summary: beginner,
        intermediate_level_summary: intermediate,
        advanced_level_summary: advanced,
    })
}

async fn summarize_level(
    client: &LlmClient,
    level: Level,
    input: &str,
) -> Result<String, SummarizationError> {
    tracing::debug!(level = %level, "summarize document");
    let raw = client
        .generate(&summary_instructions(level), input)
        .await
        .map_err(|source| SummarizationError::Service { level, source })?;
    Ok(raw.trim().to_owned())
}

fn summary_instructions(level: Level) -> String {
    let style = match level {
        Level::Beginner => {
            "Write for readers with no background in the field: plain language, short sentences, no jargon."
        }
        Level::Intermediate => {
            "Write for professionals and students: keep the technical vocabulary and explain field jargon briefly."
        }
        Level::Advanced => {
            "Write for experts: be technically precise and dense; assume full familiarity with the field."
        }
    };
    format!(
        "You summarize a technical document.\n\
{style}\n\
\n\
Rules:\n\
- One or two paragraphs.\n\
- Cover the main purpose and the key points; do not invent facts.\n\
- Output ONLY the summary text.\n"
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::{ScriptedService, client};
    use crate::error::ServiceError;
    use crate::formats::{BlockKind, ContentBlock};

    fn sections() -> Vec<Section> {
        let make = |id: &str, blocks: Vec<ContentBlock>| Section {
            id: id.to_owned(),
            title: String::new(),
            content: blocks,
            html: String::new(),
            images: Vec::new(),
            tables: Vec::new(),
            codes: Vec::new(),
            img_alt: Vec::new(),
            annotation: None,
        };
        vec![
            make(
                "section-0",
                vec![
                    ContentBlock::new(BlockKind::H1, "Guide"),
                    ContentBlock::paragraph("First part."),
                ],
            ),
            make("section-1", vec![ContentBlock::paragraph("Second part.")]),
        ]
    }

    fn by_level(request: &crate::service::GenerateRequest) -> &'static str {
        if request.instructions.contains("no background") {
            "beginner"
        } else if request.instructions.contains("professionals") {
            "intermediate"
        } else {
            "advanced"
        }
    }

    #[test]
    fn document_text_follows_section_order() {
        assert_eq!(
            document_text(&sections()),
            "Guide\nFirst part.\n\nSecond part."
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn produces_exactly_three_summaries() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            Ok(format!(" {} summary ", by_level(request)))
        }));
        let client = client(Arc::clone(&service));

        let set = summarize(&client, &sections(), &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(set.get(Level::Beginner), "beginner summary");
        assert_eq!(set.get(Level::Intermediate), "intermediate summary");
        assert_eq!(set.get(Level::Advanced), "advanced summary");
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn an_empty_level_fails_the_whole_set() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            match by_level(request) {
                "intermediate" => Ok("   ".to_owned()),
                level => Ok(format!("{level} summary")),
            }
        }));
        let client = client(service);

        let err = summarize(&client, &sections(), &SummaryOptions::default())
            .await
            .unwrap_err();
        match err {
            SummarizationError::Incomplete { missing } => {
                assert_eq!(missing, vec![Level::Intermediate]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn service_failure_names_the_level() {
        let service = Arc::new(ScriptedService::with_fn(|request| {
            match by_level(request) {
                "advanced" => Err(ServiceError::Rejected {
                    status: 400,
                    message: "too long".to_owned(),
                }),
                level => Ok(format!("{level} summary")),
            }
        }));
        let client = client(service);

        let err = summarize(&client, &sections(), &SummaryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SummarizationError::Service {
                level: Level::Advanced,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_document_is_not_sent() {
        let service = Arc::new(ScriptedService::replies(vec![Ok("x".to_owned())]));
        let client = client(Arc::clone(&service));
        let err = summarize(&client, &[], &SummaryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizationError::EmptyDocument));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn long_documents_are_truncated() {
        let service = Arc::new(ScriptedService::with_fn(|_| Ok("ok".to_owned())));
        let client = client(Arc::clone(&service));
        let options = SummaryOptions { max_input_chars: 5 };

        summarize(&client, &sections(), &options).await.unwrap();
        let requests = service.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.input == "Guide"));
    }
}
