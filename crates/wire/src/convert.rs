//! Conversions between wire messages and `tabletop-sim` types.
//!
//! Server side folds sessions into snapshots; client side rebuilds typed
//! state from incoming protos. Anything that can be malformed on the
//! wire converts via `TryFrom` with a static reason, matching how the
//! sim crate never sees unchecked data.

use tabletop_sim::{
    Player, Resource, Response, RoleSlot, Scenario, Session, SessionMode, SessionStatus, SyncError,
};

use crate::{
    DecisionProto, ErrorProto, OptionProto, PlayerProto, ResourceProto, ResponseProto,
    RoleSlotProto, ScenarioProto, SnapshotProto,
};

// ============================================================================
// Sim → wire
// ============================================================================

impl From<&Response> for ResponseProto {
    fn from(r: &Response) -> Self {
        Self {
            decision_id: r.decision_id.clone(),
            option_id: r.option_id.clone(),
            confidence_level: r.confidence_level,
            response_time_ms: r.response_time_ms,
            available_resources: r.available_resources.clone(),
            timestamp_ms: r.timestamp_ms,
        }
    }
}

impl From<&Player> for PlayerProto {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            role: p.role.clone(),
            is_host: p.is_host,
            current_step: p.current_step as u64,
            responses: p.responses.iter().map(Into::into).collect(),
            last_activity_ms: p.last_activity_ms,
        }
    }
}

impl From<&RoleSlot> for RoleSlotProto {
    fn from(s: &RoleSlot) -> Self {
        Self {
            role: s.role.clone(),
            display_name: s.display_name.clone(),
            player_id: s.player_id.clone(),
        }
    }
}

impl From<&Scenario> for ScenarioProto {
    fn from(s: &Scenario) -> Self {
        Self {
            id: s.id.clone(),
            title: s.title.clone(),
            timeline: s
                .timeline
                .iter()
                .map(|d| DecisionProto {
                    id: d.id.clone(),
                    prompt: d.prompt.clone(),
                    time_limit_secs: d.time_limit_secs,
                    options: d
                        .options
                        .iter()
                        .map(|o| OptionProto {
                            id: o.id.clone(),
                            text: o.text.clone(),
                        })
                        .collect(),
                    required_resources: d
                        .required_resources
                        .iter()
                        .map(|r| ResourceProto {
                            id: r.id.clone(),
                            name: r.name.clone(),
                            required: r.required,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl From<&Session> for SnapshotProto {
    fn from(session: &Session) -> Self {
        let mut players: Vec<PlayerProto> = session.players.values().map(Into::into).collect();
        // Deterministic order: identical states serialize identically.
        players.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            code: session.code.clone(),
            players,
            scenario: Some(session.scenario.as_ref().into()),
            status: session.status.as_str().to_string(),
            mode: session.mode.as_str().to_string(),
            started_at_ms: session.started_at_ms,
            role_slots: session.role_slots.iter().map(Into::into).collect(),
            host_id: session.host_id.clone(),
        }
    }
}

impl From<&SyncError> for ErrorProto {
    fn from(e: &SyncError) -> Self {
        Self {
            kind: e.kind().to_string(),
            detail: e.to_string(),
        }
    }
}

// ============================================================================
// Wire → sim
// ============================================================================

impl From<ResponseProto> for Response {
    fn from(r: ResponseProto) -> Self {
        Self {
            decision_id: r.decision_id,
            option_id: r.option_id,
            confidence_level: r.confidence_level,
            response_time_ms: r.response_time_ms,
            available_resources: r.available_resources,
            timestamp_ms: r.timestamp_ms,
        }
    }
}

impl From<RoleSlotProto> for RoleSlot {
    fn from(s: RoleSlotProto) -> Self {
        Self {
            role: s.role,
            display_name: s.display_name,
            player_id: s.player_id,
        }
    }
}

impl From<ScenarioProto> for Scenario {
    fn from(s: ScenarioProto) -> Self {
        Self {
            id: s.id,
            title: s.title,
            timeline: s
                .timeline
                .into_iter()
                .map(|d| tabletop_sim::Decision {
                    id: d.id,
                    prompt: d.prompt,
                    time_limit_secs: d.time_limit_secs,
                    options: d
                        .options
                        .into_iter()
                        .map(|o| tabletop_sim::DecisionOption {
                            id: o.id,
                            text: o.text,
                        })
                        .collect(),
                    required_resources: d
                        .required_resources
                        .into_iter()
                        .map(|r| Resource {
                            id: r.id,
                            name: r.name,
                            required: r.required,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl SnapshotProto {
    pub fn parse_status(&self) -> Result<SessionStatus, &'static str> {
        SessionStatus::parse(&self.status).ok_or("unknown session status")
    }

    pub fn parse_mode(&self) -> Result<SessionMode, &'static str> {
        SessionMode::parse(&self.mode).ok_or("unknown session mode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tabletop_sim::{Decision, DecisionOption};

    fn session() -> Session {
        let scenario = Arc::new(Scenario {
            id: "s1".into(),
            title: "Breach".into(),
            timeline: vec![Decision {
                id: "d0".into(),
                prompt: "First call".into(),
                time_limit_secs: 90,
                options: vec![DecisionOption {
                    id: "a".into(),
                    text: "Escalate".into(),
                }],
                required_resources: vec![],
            }],
        });
        let mut players = HashMap::new();
        for (id, conn) in [("zed", 2u64), ("amy", 1u64)] {
            let mut p = Player::new(id.into(), id.into(), "CEO".into(), conn, id == "amy", 5);
            p.responses.push(Response {
                decision_id: "d0".into(),
                option_id: "a".into(),
                confidence_level: 4,
                response_time_ms: 1200,
                available_resources: vec!["r1".into()],
                timestamp_ms: 99,
            });
            players.insert(id.to_string(), p);
        }
        Session {
            code: "AB12".into(),
            mode: SessionMode::Multi,
            status: SessionStatus::Active,
            scenario,
            role_slots: vec![],
            players,
            host_id: "amy".into(),
            started_at_ms: Some(10),
        }
    }

    #[test]
    fn test_snapshot_orders_players_by_id() {
        let snap: SnapshotProto = (&session()).into();
        let ids: Vec<_> = snap.players.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
        assert_eq!(snap.status, "active");
        assert_eq!(snap.mode, "multi");
        assert_eq!(snap.started_at_ms, Some(10));
    }

    #[test]
    fn test_snapshot_status_mode_parse() {
        let snap: SnapshotProto = (&session()).into();
        assert_eq!(snap.parse_status().unwrap(), SessionStatus::Active);
        assert_eq!(snap.parse_mode().unwrap(), SessionMode::Multi);

        let mut bad = snap.clone();
        bad.status = "sideways".into();
        assert!(bad.parse_status().is_err());
    }

    #[test]
    fn test_response_roundtrip_preserves_dedup_key() {
        let r = Response {
            decision_id: "d0".into(),
            option_id: "a".into(),
            confidence_level: 4,
            response_time_ms: 1200,
            available_resources: vec!["r1".into()],
            timestamp_ms: 99,
        };
        let proto: ResponseProto = (&r).into();
        let back: Response = proto.into();
        assert_eq!(back, r);
    }

    #[test]
    fn test_error_proto_carries_kind() {
        let err = SyncError::RoleUnavailable("CISO".into());
        let proto: ErrorProto = (&err).into();
        assert_eq!(proto.kind, "role_unavailable");
        assert!(proto.detail.contains("CISO"));
    }
}
