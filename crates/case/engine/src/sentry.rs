//! Sentry evaluation: join tracking over observed lifecycle signals
//!
//! Each node tracks, per sentry it owns, the on-parts observed since the
//! sentry last fired. A sentry is satisfied once every declared on-part has
//! been observed and its if-part (if any) holds against the variables
//! visible from the node. If-parts are evaluated only when checked and
//! decode only the variables their expression reads.

use crate::{ExecutionTree, ExpressionEvaluator, SentryPart};
use case_types::{ActivityId, CaseResult, ExecutionId, SentryDeclaration, SentryId, StandardEvent};
use case_variables::VariableScope;
use std::sync::Arc;

/// Evaluates sentries owned by execution nodes
pub struct SentryEvaluator {
    expressions: Arc<dyn ExpressionEvaluator>,
}

impl SentryEvaluator {
    pub fn new(expressions: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { expressions }
    }

    /// Record `event` of `source_activity` on the tracking table of
    /// `node_id` for `sentry`.
    ///
    /// Signals the sentry does not declare are ignored, as are repeats of
    /// an on-part already observed. Returns whether anything was recorded.
    pub fn record_signal(
        &self,
        tree: &mut ExecutionTree<'_>,
        node_id: &ExecutionId,
        sentry: &SentryDeclaration,
        source_activity: &ActivityId,
        source_execution: &ExecutionId,
        event: StandardEvent,
    ) -> CaseResult<bool> {
        if !sentry.listens_to(source_activity, event) {
            return Ok(false);
        }
        let seen = tree.node(node_id)?.parts_of(&sentry.id).any(|p| {
            &p.source_activity_id == source_activity && p.event == event
        });
        if seen {
            return Ok(false);
        }

        tree.node_mut(node_id)?.sentry_parts.push(SentryPart {
            sentry_id: sentry.id.clone(),
            source_activity_id: source_activity.clone(),
            source_execution_id: source_execution.clone(),
            event,
        });
        tracing::debug!(
            execution_id = %node_id,
            sentry = %sentry.id,
            source = %source_activity,
            event = %event,
            "Sentry signal recorded"
        );
        Ok(true)
    }

    /// All declared on-parts observed and the if-part true.
    ///
    /// A sentry with neither on-parts nor an if-part is never satisfied.
    pub fn is_satisfied(
        &self,
        tree: &mut ExecutionTree<'_>,
        node_id: &ExecutionId,
        sentry: &SentryDeclaration,
    ) -> CaseResult<bool> {
        if sentry.is_empty() {
            return Ok(false);
        }
        let node = tree.node(node_id)?;
        let all_observed = sentry.on_parts.iter().all(|on_part| {
            node.parts_of(&sentry.id)
                .any(|p| on_part.matches(&p.source_activity_id, p.event))
        });
        if !all_observed {
            return Ok(false);
        }
        self.if_part_holds(tree, node_id, sentry)
    }

    /// Whether `sentry` holds for a node that was just created, before any
    /// signal arrived.
    ///
    /// An entry sentry without on-parts holds unless its if-part is false.
    /// An exit sentry holds only through an if-part, so an empty exit
    /// sentry never ends a node at creation.
    pub fn is_satisfied_at_creation(
        &self,
        tree: &mut ExecutionTree<'_>,
        node_id: &ExecutionId,
        sentry: &SentryDeclaration,
        exit: bool,
    ) -> CaseResult<bool> {
        if !sentry.on_parts.is_empty() {
            return Ok(false);
        }
        if exit && sentry.if_part.is_none() {
            return Ok(false);
        }
        self.if_part_holds(tree, node_id, sentry)
    }

    /// Forget the observed on-parts of `sentry_id` so it can fire again
    pub fn reset_after_firing(
        &self,
        tree: &mut ExecutionTree<'_>,
        node_id: &ExecutionId,
        sentry_id: &SentryId,
    ) -> CaseResult<()> {
        tree.node_mut(node_id)?
            .sentry_parts
            .retain(|p| &p.sentry_id != sentry_id);
        Ok(())
    }

    fn if_part_holds(
        &self,
        tree: &mut ExecutionTree<'_>,
        node_id: &ExecutionId,
        sentry: &SentryDeclaration,
    ) -> CaseResult<bool> {
        let Some(if_part) = &sentry.if_part else {
            return Ok(true);
        };
        let variables = match self.expressions.referenced_variables(&if_part.expression) {
            Some(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                tree.get_variables(node_id, Some(names.as_slice()))?
            }
            None => tree.get_variables(node_id, None)?,
        };
        let result = self.expressions.evaluate(&if_part.expression, &variables)?;
        tracing::debug!(
            execution_id = %node_id,
            sentry = %sentry.id,
            expression = %if_part.expression,
            result,
            "If-part evaluated"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for SentryEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentryEvaluator").finish_non_exhaustive()
    }
}
