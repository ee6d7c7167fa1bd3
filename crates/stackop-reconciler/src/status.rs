//! Status recording: attempt outcome in, persisted status out.

use chrono::{DateTime, Utc};
use stackop_core::stack::{StackStatus, StackUpdateState};

use crate::lifecycle::{AttemptOutcome, OutputsChange};

/// Status to persist after `outcome`.
///
/// `lastSuccessfulCommit` only moves on success, so a failed attempt keeps
/// the previous value. Outputs follow [`OutputsChange`].
pub fn record(
    previous: Option<&StackStatus>,
    outcome: &AttemptOutcome,
    now: DateTime<Utc>,
) -> StackStatus {
    let previous_success = previous
        .and_then(|s| s.last_successful_commit())
        .map(str::to_string);

    let last_successful_commit = if outcome.is_success() {
        outcome.commit.clone().or(previous_success)
    } else {
        previous_success
    };

    let outputs = match &outcome.outputs {
        OutputsChange::Replace(outputs) => Some(outputs.clone()),
        OutputsChange::Clear => None,
        OutputsChange::Keep => previous.and_then(|s| s.outputs.clone()),
    };

    StackStatus {
        outputs,
        last_update: Some(StackUpdateState {
            state: outcome.status.state(),
            last_attempted_commit: outcome.commit.clone(),
            last_successful_commit,
            permalink: outcome.permalink.clone(),
            last_resync_time: Some(now),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use chrono::TimeZone;
    use serde_json::json;
    use stackop_core::stack::{Permalink, StackOutputs, StackUpdateStatus, UpdateState};
    use stackop_core::{AttemptId, Error};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn outcome(status: StackUpdateStatus, commit: &str, outputs: OutputsChange) -> AttemptOutcome {
        AttemptOutcome {
            attempt: AttemptId::new(),
            state: LifecycleState::Converged(status),
            status,
            commit: Some(commit.to_string()),
            permalink: None,
            outputs,
            error: (!status.is_success()).then(|| Error::EngineFailed("boom".into())),
        }
    }

    fn outputs(value: &str) -> StackOutputs {
        StackOutputs::from([("url".to_string(), json!(value))])
    }

    #[test]
    fn test_success_advances_commit_and_outputs() {
        let mut success = outcome(
            StackUpdateStatus::Succeeded,
            "c1",
            OutputsChange::Replace(outputs("https://one")),
        );
        success.permalink = Some(Permalink::new("https://app.pulumi.com/acme/app/dev/updates/3"));

        let status = record(None, &success, now());
        let update = status.last_update.as_ref().unwrap();
        assert_eq!(update.state, UpdateState::Succeeded);
        assert_eq!(update.last_attempted_commit.as_deref(), Some("c1"));
        assert_eq!(update.last_successful_commit.as_deref(), Some("c1"));
        assert_eq!(
            update.permalink.as_ref().map(Permalink::as_str),
            Some("https://app.pulumi.com/acme/app/dev/updates/3")
        );
        assert_eq!(update.last_resync_time, Some(now()));
        assert_eq!(status.outputs, Some(outputs("https://one")));
    }

    #[test]
    fn test_last_successful_commit_is_sticky() {
        let first = record(
            None,
            &outcome(
                StackUpdateStatus::Succeeded,
                "c1",
                OutputsChange::Replace(outputs("https://one")),
            ),
            now(),
        );

        for status in [
            StackUpdateStatus::Failed,
            StackUpdateStatus::Conflict,
            StackUpdateStatus::PendingOperations,
            StackUpdateStatus::NotFound,
        ] {
            let next = record(Some(&first), &outcome(status, "c2", OutputsChange::Keep), now());
            let update = next.last_update.as_ref().unwrap();
            assert_eq!(update.state, UpdateState::Failed);
            assert_eq!(update.last_attempted_commit.as_deref(), Some("c2"));
            assert_eq!(update.last_successful_commit.as_deref(), Some("c1"));
            assert_eq!(next.outputs, Some(outputs("https://one")));
        }
    }

    #[test]
    fn test_destroy_clears_outputs() {
        let previous = record(
            None,
            &outcome(
                StackUpdateStatus::Succeeded,
                "c1",
                OutputsChange::Replace(outputs("https://one")),
            ),
            now(),
        );

        let destroyed = record(
            Some(&previous),
            &outcome(StackUpdateStatus::Succeeded, "c2", OutputsChange::Clear),
            now(),
        );
        assert_eq!(destroyed.outputs, None);
        assert_eq!(destroyed.last_successful_commit(), Some("c2"));
    }

    #[test]
    fn test_failure_without_history() {
        let mut failed = outcome(StackUpdateStatus::Failed, "c1", OutputsChange::Keep);
        failed.commit = None;

        let status = record(None, &failed, now());
        let update = status.last_update.unwrap();
        assert_eq!(update.state, UpdateState::Failed);
        assert_eq!(update.last_attempted_commit, None);
        assert_eq!(update.last_successful_commit, None);
        assert_eq!(status.outputs, None);
    }
}
