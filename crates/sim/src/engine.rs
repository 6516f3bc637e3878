//! Decision engine: validation and state transitions for a session.
//!
//! Pure functions over `Session`. Invalid input is reported synchronously
//! and never mutates anything; advancement is edge-triggered on the last
//! response that makes `all_answered` flip true. The protocol layer owns
//! broadcasting the results.

use crate::error::{InvalidDecision, SyncError};
use crate::session::{Response, Session, SessionMode, SessionStatus};
use crate::{Millis, PlayerId};

/// Result of one `advance` pass, in the shape the protocol layer
/// broadcasts: who moved (with their new step), and whether the session
/// just completed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvanceOutcome {
    /// `(player_id, new_step)` for every player advanced this pass, in
    /// deterministic (sorted by player id) order.
    pub advanced: Vec<(PlayerId, usize)>,
    /// True when this pass moved the session to `Completed`.
    pub completed: bool,
}

/// Validate a candidate response against the player's current step.
///
/// A candidate is valid iff the player exists, their current step does
/// not already hold a response (a multi-mode player waiting on the room
/// resubmitting is rejected here), the decision id matches the decision
/// at the player's current step (stale submissions fail here), the
/// option is declared by that decision, and the confidence level is in
/// 1..=5. No mutation occurs on rejection.
pub fn validate_response(
    session: &Session,
    player_id: &str,
    candidate: &Response,
) -> Result<(), SyncError> {
    let player = session
        .player(player_id)
        .ok_or_else(|| SyncError::player_not_found(player_id))?;

    // A step that already holds a response never accepts another, even
    // before the room advances past it. The id comparison below cannot
    // catch this case: the duplicate matches the current decision too.
    if player.has_answered_current() {
        return Err(InvalidDecision::AlreadyAnswered {
            step: player.current_step,
        }
        .into());
    }

    let decision = session
        .scenario
        .decision_at(player.current_step)
        .ok_or(InvalidDecision::TimelineExhausted {
            step: player.current_step,
        })?;

    if candidate.decision_id != decision.id {
        return Err(InvalidDecision::DecisionMismatch {
            expected: decision.id.clone(),
            received: candidate.decision_id.clone(),
        }
        .into());
    }

    if !decision.has_option(&candidate.option_id) {
        return Err(InvalidDecision::UnknownOption(candidate.option_id.clone()).into());
    }

    if !(1..=5).contains(&candidate.confidence_level) {
        return Err(InvalidDecision::ConfidenceOutOfRange(candidate.confidence_level).into());
    }

    Ok(())
}

/// Append a validated response and stamp the player's activity.
///
/// Does not advance the step: after this call and before `advance`, the
/// player holds one more response than their current step.
pub fn record_response(
    session: &mut Session,
    player_id: &str,
    response: Response,
    now_ms: Millis,
) -> Result<(), SyncError> {
    let player = session
        .player_mut(player_id)
        .ok_or_else(|| SyncError::player_not_found(player_id))?;
    player.responses.push(response);
    player.last_activity_ms = now_ms;
    Ok(())
}

/// Whether every present player has answered the step they are on.
///
/// Single mode always answers true: the lone player auto-advances after
/// every valid response.
pub fn all_answered(session: &Session) -> bool {
    match session.mode {
        SessionMode::Single => true,
        SessionMode::Multi => session.players.values().all(|p| p.has_answered_current()),
    }
}

/// Advance every player whose response count exceeds their step, then
/// evaluate completion.
///
/// Each advanced player moves by exactly 1. The session completes iff
/// every player's step has reached the end of the timeline; `Completed`
/// is terminal and later calls are no-ops.
pub fn advance(session: &mut Session) -> AdvanceOutcome {
    if session.status == SessionStatus::Completed {
        return AdvanceOutcome::default();
    }

    let mut advanced: Vec<(PlayerId, usize)> = Vec::new();
    for player in session.players.values_mut() {
        if player.has_answered_current() {
            player.current_step += 1;
            advanced.push((player.id.clone(), player.current_step));
        }
    }
    // Deterministic broadcast order regardless of map iteration.
    advanced.sort();

    let timeline_len = session.scenario.len();
    let completed = !session.players.is_empty()
        && session
            .players
            .values()
            .all(|p| p.current_step >= timeline_len);
    if completed {
        session.status = SessionStatus::Completed;
    }

    AdvanceOutcome { advanced, completed }
}

/// Host-issued start: `Waiting → Active`.
///
/// Only the host may start; a completed session never restarts. Starting
/// an already-active session refreshes nothing but is not an error, so a
/// host retrying after a lost ack converges.
pub fn start(session: &mut Session, actor: &str, now_ms: Millis) -> Result<(), SyncError> {
    if actor != session.host_id {
        return Err(SyncError::Unauthorized {
            actor: actor.to_string(),
            action: "start the simulation",
        });
    }
    match session.status {
        SessionStatus::Completed => Err(SyncError::Unauthorized {
            actor: actor.to_string(),
            action: "restart a completed simulation",
        }),
        SessionStatus::Active => Ok(()),
        _ => {
            session.status = SessionStatus::Active;
            session.started_at_ms = Some(now_ms);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotFoundKind;
    use crate::scenario::{Decision, DecisionOption, Scenario};
    use crate::session::{Player, RoleSlot};
    use std::sync::Arc;

    fn scenario(steps: usize) -> Arc<Scenario> {
        Arc::new(Scenario {
            id: "s".into(),
            title: "test".into(),
            timeline: (0..steps)
                .map(|i| Decision {
                    id: format!("d{i}"),
                    prompt: format!("step {i}"),
                    time_limit_secs: 60,
                    options: vec![
                        DecisionOption {
                            id: "a".into(),
                            text: "option a".into(),
                        },
                        DecisionOption {
                            id: "b".into(),
                            text: "option b".into(),
                        },
                    ],
                    required_resources: vec![],
                })
                .collect(),
        })
    }

    fn response(decision_id: &str) -> Response {
        Response {
            decision_id: decision_id.into(),
            option_id: "a".into(),
            confidence_level: 3,
            response_time_ms: 1500,
            available_resources: vec!["ir-runbook".into()],
            timestamp_ms: 1000,
        }
    }

    fn single_session(steps: usize) -> Session {
        let host = Player::new("p1".into(), "Solo".into(), "CEO".into(), 1, true, 0);
        Session::new("SOLO".into(), host, scenario(steps), SessionMode::Single, vec![], 0)
    }

    fn duo_session(steps: usize) -> Session {
        let slots = vec![
            RoleSlot {
                role: "CEO".into(),
                display_name: "Chief Executive".into(),
                player_id: None,
            },
            RoleSlot {
                role: "CFO".into(),
                display_name: "Chief Financial".into(),
                player_id: None,
            },
        ];
        let host = Player::new("ceo".into(), "Alice".into(), "CEO".into(), 1, true, 0);
        let mut s =
            Session::new("DUO".into(), host, scenario(steps), SessionMode::Multi, slots, 0);
        s.seat(Player::new("cfo".into(), "Bob".into(), "CFO".into(), 2, false, 0));
        s.status = SessionStatus::Active;
        s
    }

    #[test]
    fn test_single_player_auto_advance() {
        let mut s = single_session(3);
        let r = response("d0");
        validate_response(&s, "p1", &r).unwrap();
        record_response(&mut s, "p1", r, 10).unwrap();

        // Step/response parity between record and advance.
        let p = s.player("p1").unwrap();
        assert_eq!(p.responses.len(), p.current_step + 1);

        assert!(all_answered(&s));
        let outcome = advance(&mut s);
        assert_eq!(outcome.advanced, vec![("p1".to_string(), 1)]);
        assert!(!outcome.completed);
        assert_eq!(s.player("p1").unwrap().current_step, 1);
    }

    #[test]
    fn test_multiplayer_gating() {
        let mut s = duo_session(2);

        let r = response("d0");
        validate_response(&s, "ceo", &r).unwrap();
        record_response(&mut s, "ceo", r, 10).unwrap();
        assert!(!all_answered(&s));
        assert_eq!(s.player("ceo").unwrap().current_step, 0);
        assert_eq!(s.player("cfo").unwrap().current_step, 0);

        let r = response("d0");
        validate_response(&s, "cfo", &r).unwrap();
        record_response(&mut s, "cfo", r, 20).unwrap();
        assert!(all_answered(&s));

        let outcome = advance(&mut s);
        assert_eq!(
            outcome.advanced,
            vec![("ceo".to_string(), 1), ("cfo".to_string(), 1)]
        );
        assert_eq!(s.player("ceo").unwrap().current_step, 1);
        assert_eq!(s.player("cfo").unwrap().current_step, 1);
    }

    #[test]
    fn test_duplicate_decision_rejected() {
        let mut s = single_session(2);
        let r = response("d0");
        record_response(&mut s, "p1", r, 10).unwrap();
        advance(&mut s);

        // Re-submitting step 0 is now a mismatch against step 1.
        let dup = response("d0");
        let err = validate_response(&s, "p1", &dup).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidInput(InvalidDecision::DecisionMismatch { .. })
        ));
        assert_eq!(s.player("p1").unwrap().responses.len(), 1);
    }

    #[test]
    fn test_resubmission_while_waiting_on_room_rejected() {
        let mut s = duo_session(2);
        record_response(&mut s, "ceo", response("d0"), 10).unwrap();

        // CFO has not answered, so CEO is still on step 0. The repeat
        // carries the matching decision id and must still be rejected.
        let err = validate_response(&s, "ceo", &response("d0")).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidInput(InvalidDecision::AlreadyAnswered { step: 0 })
        ));
        assert_eq!(s.player("ceo").unwrap().responses.len(), 1);
    }

    #[test]
    fn test_answered_step_never_pre_answers_the_next() {
        let mut s = duo_session(2);
        record_response(&mut s, "ceo", response("d0"), 10).unwrap();
        assert!(validate_response(&s, "ceo", &response("d0")).is_err());
        record_response(&mut s, "cfo", response("d0"), 20).unwrap();
        advance(&mut s);

        // Step/response parity holds after the advance: nobody carries a
        // stale extra record that would count as next step's answer.
        for id in ["ceo", "cfo"] {
            let p = s.player(id).unwrap();
            assert_eq!(p.current_step, 1);
            assert_eq!(p.responses.len(), 1);
            assert!(!p.has_answered_current());
        }
        assert!(!all_answered(&s));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let s = single_session(1);
        let mut r = response("d0");
        r.option_id = "nope".into();
        let err = validate_response(&s, "p1", &r).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidInput(InvalidDecision::UnknownOption(_))
        ));
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let s = single_session(1);
        for level in [0, 6, 100] {
            let mut r = response("d0");
            r.confidence_level = level;
            let err = validate_response(&s, "p1", &r).unwrap_err();
            assert!(matches!(
                err,
                SyncError::InvalidInput(InvalidDecision::ConfidenceOutOfRange(l)) if l == level
            ));
        }
        // Boundary values are valid.
        for level in [1, 5] {
            let mut r = response("d0");
            r.confidence_level = level;
            validate_response(&s, "p1", &r).unwrap();
        }
    }

    #[test]
    fn test_unknown_player_rejected() {
        let s = single_session(1);
        let err = validate_response(&s, "ghost", &response("d0")).unwrap_err();
        assert_eq!(err, SyncError::NotFound(NotFoundKind::Player("ghost".into())));
    }

    #[test]
    fn test_completion_is_terminal() {
        let mut s = single_session(1);
        record_response(&mut s, "p1", response("d0"), 10).unwrap();
        let outcome = advance(&mut s);
        assert!(outcome.completed);
        assert_eq!(s.status, SessionStatus::Completed);

        // Timeline exhausted: no further submissions.
        let err = validate_response(&s, "p1", &response("d0")).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidInput(InvalidDecision::TimelineExhausted { step: 1 })
        ));

        // Further advance passes are no-ops.
        let again = advance(&mut s);
        assert_eq!(again, AdvanceOutcome::default());
        assert_eq!(s.player("p1").unwrap().current_step, 1);
    }

    #[test]
    fn test_advance_moves_each_player_by_exactly_one() {
        let mut s = duo_session(3);
        // Both players answer twice without an advance in between; a
        // single pass still moves each by exactly 1.
        record_response(&mut s, "ceo", response("d0"), 1).unwrap();
        record_response(&mut s, "cfo", response("d0"), 2).unwrap();
        let before_ceo = s.player("ceo").unwrap().current_step;
        let outcome = advance(&mut s);
        assert_eq!(outcome.advanced.len(), 2);
        assert_eq!(s.player("ceo").unwrap().current_step, before_ceo + 1);
    }

    #[test]
    fn test_multiplayer_completion() {
        let mut s = duo_session(1);
        record_response(&mut s, "ceo", response("d0"), 1).unwrap();
        let outcome = advance(&mut s);
        // CFO has not answered: nobody lags behind the timeline end yet,
        // but CFO is still at step 0, so not complete.
        assert_eq!(outcome.advanced, vec![("ceo".to_string(), 1)]);
        assert!(!outcome.completed);

        record_response(&mut s, "cfo", response("d0"), 2).unwrap();
        let outcome = advance(&mut s);
        assert!(outcome.completed);
        assert_eq!(s.status, SessionStatus::Completed);
    }

    #[test]
    fn test_start_requires_host() {
        let mut s = duo_session(1);
        s.status = SessionStatus::Waiting;
        let err = start(&mut s, "cfo", 100).unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized { .. }));
        assert_eq!(s.status, SessionStatus::Waiting);

        start(&mut s, "ceo", 100).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.started_at_ms, Some(100));

        // Retried start converges without touching started_at.
        start(&mut s, "ceo", 200).unwrap();
        assert_eq!(s.started_at_ms, Some(100));
    }

    #[test]
    fn test_completed_session_never_restarts() {
        let mut s = single_session(1);
        record_response(&mut s, "p1", response("d0"), 1).unwrap();
        advance(&mut s);
        let err = start(&mut s, "p1", 500).unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized { .. }));
        assert_eq!(s.status, SessionStatus::Completed);
    }

    #[test]
    fn test_record_stamps_activity() {
        let mut s = single_session(1);
        record_response(&mut s, "p1", response("d0"), 777).unwrap();
        assert_eq!(s.player("p1").unwrap().last_activity_ms, 777);
    }
}
