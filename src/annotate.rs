use std::collections::BTreeSet;

use serde::Deserialize;

use crate::client::LlmClient;
use crate::error::{AnnotationError, AnnotationErrorKind};
use crate::formats::{Annotation, Section};
use crate::markdown::render_blocks;
use crate::stage::{StageOptions, run_units};

const INSTRUCTIONS: &str = "You annotate one section of a technical document.\n\
Task: read the section and describe it for an editor who will rewrite it for readers of different skill levels.\n\
\n\
Output ONLY a JSON object with exactly these keys:\n\
- \"topic\": a short phrase naming what the section is about.\n\
- \"purpose_of_document\": one sentence on what the section is trying to achieve for the reader.\n\
- \"difficult_terms\": an array of words or phrases from the section that a newcomer to the field would not understand.\n\
\n\
Rules:\n\
- Use only the section text; do not guess from outside knowledge.\n\
- Copy difficult terms exactly as they appear in the section.\n\
- No commentary, no Markdown fences.\n";

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    topic: String,
    purpose_of_document: String,
    #[serde(default)]
    difficult_terms: Vec<String>,
}

pub async fn annotate_section(
    client: &LlmClient,
    section: &Section,
) -> Result<Annotation, AnnotationError> {
    let fail = |kind: AnnotationErrorKind| AnnotationError {
        section_id: section.id.clone(),
        kind,
    };

    let input = section_input(section);
    tracing::debug!(section_id = %section.id, chars = input.len(), "annotate section");
    let raw = client
        .generate(INSTRUCTIONS, &input)
        .await
        .map_err(|err| fail(err.into()))?;

    parse_annotation(&raw).map_err(|reason| fail(AnnotationErrorKind::Malformed(reason)))
}

pub async fn annotate_sections(
    client: &LlmClient,
    sections: &mut [Section],
    options: &StageOptions,
) -> Result<Vec<AnnotationError>, AnnotationError> {
    let inputs: Vec<Section> = sections.to_vec();
    let outcomes = match run_units(
        inputs,
        client.concurrency(),
        options.on_section_failure,
        |section| {
            let client = client.clone();
            async move { annotate_section(&client, &section).await }
        },
    )
    .await
    {
        Ok(outcomes) => outcomes,
        Err(aborted) => {
            for (idx, annotation) in aborted.completed {
                if let Some(section) = sections.get_mut(idx) {
                    section.annotation = Some(annotation);
                }
            }
            return Err(aborted.error);
        }
    };

    let mut failures = Vec::new();
    for (section, outcome) in sections.iter_mut().zip(outcomes) {
        match outcome {
            Ok(annotation) => {
                tracing::debug!(
                    section_id = %section.id,
                    terms = annotation.difficult_terms.len(),
                    "section annotated"
                );
                section.annotation = Some(annotation);
            }
            Err(err) => {
                tracing::warn!(section_id = %err.section_id, error = %err, "annotation failed; omitting section");
                failures.push(err);
            }
        }
    }
    Ok(failures)
}

fn section_input(section: &Section) -> String {
    let body = render_blocks(&section.content);
    if section.title.is_empty() {
        body
    } else {
        format!("Section title: {}\n\n{body}", section.title)
    }
}

fn parse_annotation(raw: &str) -> Result<Annotation, String> {
    let json = json_object(raw).ok_or_else(|| "no JSON object in response".to_owned())?;
    let parsed: RawAnnotation =
        serde_json::from_str(json).map_err(|err| format!("parse annotation json: {err}"))?;

    let difficult_terms: BTreeSet<String> = parsed
        .difficult_terms
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .map(str::to_owned)
        .collect();

    Ok(Annotation {
        topic: parsed.topic.trim().to_owned(),
        purpose_of_document: parsed.purpose_of_document.trim().to_owned(),
        difficult_terms,
    })
}

// Outermost `{...}` span; skips code fences and surrounding prose.
fn json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
