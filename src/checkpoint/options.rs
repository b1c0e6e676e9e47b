//! Options offered at a checkpoint.

use async_trait::async_trait;

use crate::checkpoint::types::CheckpointOption;
use crate::core::{Findings, Plan};
use crate::error::CollaboratorError;
use crate::orchestration::gate::Conflict;

/// What an advisor sees when proposing options.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointContext<'a> {
    pub goal: &'a str,
    pub plan: &'a Plan,
    pub findings: &'a Findings,
    pub conflicts: &'a [Conflict],
}

/// Proposes context-aware checkpoint options, e.g. narrowing the scope to
/// the entities found so far.
#[async_trait]
pub trait OptionAdvisor: Send + Sync {
    async fn suggest(
        &self,
        ctx: &CheckpointContext<'_>,
    ) -> std::result::Result<Vec<CheckpointOption>, CollaboratorError>;
}

/// `continue`, one `skip:<source>` per source with open tasks,
/// `stop_and_export`, `abort`.
pub fn standard_options(plan: &Plan) -> Vec<CheckpointOption> {
    let mut options = vec![CheckpointOption::proceed()];
    options.extend(
        plan.open_sources()
            .iter()
            .map(|source| CheckpointOption::skip_source(source)),
    );
    options.push(CheckpointOption::stop_and_export());
    options.push(CheckpointOption::abort());
    options
}

/// Ask the advisor for options, keeping at most `max_options` and always
/// offering `abort`. Uses [`standard_options`] when there is no advisor, it
/// fails, or it proposes nothing.
pub async fn build_options(
    advisor: Option<&dyn OptionAdvisor>,
    ctx: &CheckpointContext<'_>,
    max_options: usize,
) -> Vec<CheckpointOption> {
    let Some(advisor) = advisor else {
        return standard_options(ctx.plan);
    };

    let suggested = match advisor.suggest(ctx).await {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!(error = %e, "option advisor failed, using standard options");
            return standard_options(ctx.plan);
        }
    };

    let mut options: Vec<CheckpointOption> = Vec::new();
    for option in suggested {
        if option.action_id == "abort" && !option.action.is_abort() {
            continue;
        }
        if options.iter().any(|o| o.action_id == option.action_id) {
            continue;
        }
        options.push(option);
    }

    if options.is_empty() {
        return standard_options(ctx.plan);
    }

    let cap = max_options.max(1);
    options.truncate(cap);
    if !options.iter().any(|o| o.action.is_abort()) {
        if options.len() == cap {
            options.pop();
        }
        options.push(CheckpointOption::abort());
    }
    options
}
