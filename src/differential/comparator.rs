//! Runs one scenario through both implementations

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::scenarios::ScenarioCase;
use super::{ComparisonResult, ErrorClass, Outcome, ReasonMap};
use crate::rpc::{RpcClient, RpcClientError, SubmitBlockOutcome};
use crate::validation::{Artifact, CandidateValidator, CandidateVerdict};

/// Reject strings from `submitblock` that carry no verdict about the block itself
const INCONCLUSIVE: &str = "inconclusive";

/// Compares a candidate validator against an optional reference node
pub struct DifferentialComparator<'a> {
    candidate: &'a dyn CandidateValidator,
    reference: Option<&'a RpcClient>,
}

impl<'a> DifferentialComparator<'a> {
    /// `reference` is `None` when no node could be obtained
    pub fn new(candidate: &'a dyn CandidateValidator, reference: Option<&'a RpcClient>) -> Self {
        Self {
            candidate,
            reference,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Validate the case on both sides and record whether they agree
    pub fn compare(&self, case: &ScenarioCase) -> ComparisonResult {
        let started = Instant::now();

        let (candidate_outcome, candidate_detail) = self.run_candidate(case);
        let (reference_outcome, reference_detail) = match self.reference {
            Some(client) => submit_to_reference(client, &case.artifact, &case.reference_map),
            None => (
                Outcome::Error(ErrorClass::Unavailable),
                Some("reference node unavailable".to_string()),
            ),
        };

        let result = ComparisonResult::new(
            case.name.clone(),
            candidate_outcome,
            reference_outcome,
            started.elapsed(),
        )
        .with_details(candidate_detail, reference_detail);

        if result.matches {
            debug!(scenario = %result.scenario_name, outcome = %result.candidate_outcome, "Outcomes match");
        } else if result.reference_outcome.is_unavailable() {
            info!(scenario = %result.scenario_name, "Reference unavailable, comparison skipped");
        } else {
            warn!(
                scenario = %result.scenario_name,
                candidate = %result.candidate_outcome,
                reference = %result.reference_outcome,
                "Divergence"
            );
        }
        result
    }

    fn run_candidate(&self, case: &ScenarioCase) -> (Outcome, Option<String>) {
        let verdict = catch_unwind(AssertUnwindSafe(|| {
            self.candidate.validate(&case.artifact, &case.context)
        }))
        .unwrap_or_else(|_| CandidateVerdict::Error("candidate panicked".to_string()));
        candidate_outcome(&verdict, &case.candidate_map)
    }
}

/// Reduce a candidate verdict through the scenario's candidate map
pub fn candidate_outcome(verdict: &CandidateVerdict, map: &ReasonMap) -> (Outcome, Option<String>) {
    match verdict {
        CandidateVerdict::Accepted => (Outcome::Valid, None),
        CandidateVerdict::Rejected(rejection) => (
            Outcome::Invalid(map.classify_reason(&rejection.code)),
            Some(rejection.to_string()),
        ),
        CandidateVerdict::Error(message) => {
            (Outcome::Error(ErrorClass::Internal), Some(message.clone()))
        }
    }
}

/// Reduce an RPC failure through the scenario's reference map
pub fn reference_error_outcome(error: &RpcClientError, map: &ReasonMap) -> Outcome {
    match error {
        RpcClientError::Transport(_) => Outcome::Error(ErrorClass::Transport),
        RpcClientError::Rpc { code, message } => match map.classify_rpc_error(*code, message) {
            Some(class) => Outcome::Invalid(class),
            None => Outcome::Error(ErrorClass::RpcFailure),
        },
    }
}

/// Submit the artifact (`submitblock` / `testmempoolaccept`) and reduce the reply
fn submit_to_reference(
    client: &RpcClient,
    artifact: &Artifact,
    map: &ReasonMap,
) -> (Outcome, Option<String>) {
    let hex = artifact.to_hex();
    match artifact {
        Artifact::Block(_) => match client.submitblock(&hex) {
            Ok(SubmitBlockOutcome::Accepted) => (Outcome::Valid, None),
            Ok(SubmitBlockOutcome::Rejected(reason)) if reason == INCONCLUSIVE => {
                (Outcome::Error(ErrorClass::Inconclusive), Some(reason))
            }
            Ok(SubmitBlockOutcome::Rejected(reason)) => {
                (Outcome::Invalid(map.classify_reason(&reason)), Some(reason))
            }
            Err(e) => (reference_error_outcome(&e, map), Some(e.to_string())),
        },
        Artifact::Transaction(_) => match client.testmempoolaccept(&[hex]) {
            Ok(results) => match results.into_iter().next() {
                Some(result) if result.allowed => (Outcome::Valid, None),
                Some(result) => {
                    let reason = result.reject_reason.unwrap_or_default();
                    (Outcome::Invalid(map.classify_reason(&reason)), Some(reason))
                }
                None => (
                    Outcome::Error(ErrorClass::Transport),
                    Some("empty testmempoolaccept reply".to_string()),
                ),
            },
            Err(e) => (reference_error_outcome(&e, map), Some(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differential::ReasonClass;
    use crate::rpc::TransportError;

    #[test]
    fn test_candidate_outcome_mapping() {
        let map = ReasonMap::new().exact("merkle-mutated", ReasonClass::DuplicateCoinbase);
        let (outcome, detail) = candidate_outcome(
            &CandidateVerdict::reject("merkle-mutated", "duplicated subtree"),
            &map,
        );
        assert_eq!(outcome, Outcome::Invalid(ReasonClass::DuplicateCoinbase));
        assert_eq!(detail.as_deref(), Some("merkle-mutated: duplicated subtree"));

        let (outcome, _) = candidate_outcome(&CandidateVerdict::reject("other", ""), &map);
        assert_eq!(outcome, Outcome::Invalid(ReasonClass::Unclassified));

        let (outcome, _) = candidate_outcome(&CandidateVerdict::Error("boom".into()), &map);
        assert_eq!(outcome, Outcome::Error(ErrorClass::Internal));
    }

    #[test]
    fn test_reference_error_mapping() {
        let map = ReasonMap::new().rpc_code(-22, ReasonClass::MalformedStructure);
        assert_eq!(
            reference_error_outcome(
                &RpcClientError::Rpc {
                    code: -22,
                    message: "TX decode failed".into()
                },
                &map
            ),
            Outcome::Invalid(ReasonClass::MalformedStructure)
        );
        assert_eq!(
            reference_error_outcome(
                &RpcClientError::Rpc {
                    code: -8,
                    message: "bad parameter".into()
                },
                &map
            ),
            Outcome::Error(ErrorClass::RpcFailure)
        );
        assert_eq!(
            reference_error_outcome(&RpcClientError::Transport(TransportError::Timeout), &map),
            Outcome::Error(ErrorClass::Transport)
        );
    }
}
