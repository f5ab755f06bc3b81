use std::future::Future;
use std::str::FromStr;

use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionFailurePolicy {
    #[default]
    Abort,
    Omit,
}

impl FromStr for SectionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "omit" => Ok(Self::Omit),
            other => Err(format!(
                "invalid section failure policy: {other} (expected abort or omit)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    pub on_section_failure: SectionFailurePolicy,
}

#[derive(Debug)]
pub(crate) struct Aborted<O, E> {
    pub error: E,
    pub completed: Vec<(usize, O)>,
}

/// Runs `task` over `inputs` with at most `concurrency` units in flight.
///
/// Outcomes come back in input order. Under [`SectionFailurePolicy::Abort`]
/// the first error aborts the remaining units and is returned instead.
pub(crate) async fn run_units<I, O, E, F, Fut>(
    inputs: Vec<I>,
    concurrency: usize,
    policy: SectionFailurePolicy,
    task: F,
) -> Result<Vec<Result<O, E>>, Aborted<O, E>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    let total = inputs.len();
    let concurrency = concurrency.max(1).min(total.max(1));
    let mut pending = inputs.into_iter().enumerate();
    let mut join_set = JoinSet::new();
    let mut results: Vec<Option<Result<O, E>>> = (0..total).map(|_| None).collect();

    loop {
        while join_set.len() < concurrency {
            let Some((idx, input)) = pending.next() else {
                break;
            };
            let unit = task(input);
            join_set.spawn(async move { (idx, unit.await) });
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let (idx, outcome) = match joined {
            Ok(done) => done,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => continue,
        };

        if let Err(err) = outcome {
            if policy == SectionFailurePolicy::Abort {
                join_set.abort_all();
                let completed = results
                    .into_iter()
                    .enumerate()
                    .filter_map(|(idx, outcome)| match outcome {
                        Some(Ok(output)) => Some((idx, output)),
                        _ => None,
                    })
                    .collect();
                return Err(Aborted {
                    error: err,
                    completed,
                });
            }
            results[idx] = Some(Err(err));
        } else {
            results[idx] = Some(outcome);
        }
    }

    Ok(results.into_iter().flatten().collect())
}
