//! Incident records shared by the auction initiator and its participants

use crate::agent_framework::Jid;
use std::time::Duration;
use tokio::time::Instant;

/// How long the initiator collects proposals before evaluating
pub const PROPOSAL_DEADLINE: Duration = Duration::from_secs(2);
/// How long closed incidents stay around before cleanup
pub const INCIDENT_RETENTION: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncidentStatus {
    /// CFP out, collecting proposals
    Waiting,
    /// Contract awarded, mitigation running
    Awarded,
    Resolved,
    Failed,
}

impl IncidentStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Failed)
    }
}

/// A responder's bid on an incident
#[derive(Clone, Debug)]
pub struct Proposal {
    pub bidder: Jid,
    pub availability_score: f64,
}

/// Initiator-side view of one incident auction
#[derive(Clone, Debug)]
pub struct Incident {
    pub incident_id: String,
    pub threat_type: String,
    pub offender_jid: Jid,
    pub victim_jid: Jid,
    pub intensity: u8,
    pub proposals: Vec<Proposal>,
    pub refusals: usize,
    pub status: IncidentStatus,
    pub cfp_time: Instant,
    pub deadline: Instant,
    pub closed_at: Option<Instant>,
}

impl Incident {
    pub fn new(
        incident_id: String,
        threat_type: String,
        offender_jid: Jid,
        victim_jid: Jid,
        intensity: u8,
        now: Instant,
    ) -> Self {
        Incident {
            incident_id,
            threat_type,
            offender_jid,
            victim_jid,
            intensity,
            proposals: Vec::new(),
            refusals: 0,
            status: IncidentStatus::Waiting,
            cfp_time: now,
            deadline: now + PROPOSAL_DEADLINE,
            closed_at: None,
        }
    }

    /// Lowest availability score wins; earlier proposals win ties
    pub fn best_proposal(&self) -> Option<&Proposal> {
        let mut best: Option<&Proposal> = None;
        for p in &self.proposals {
            match best {
                Some(b) if p.availability_score >= b.availability_score => {}
                _ => best = Some(p),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_proposal_min_score_first_wins() {
        let mut incident = Incident::new(
            "incident_0".into(),
            "ddos".into(),
            Jid::new("attacker0@sim"),
            Jid::new("router1_node0@sim"),
            3,
            Instant::now(),
        );
        incident.proposals.push(Proposal {
            bidder: Jid::new("response0@sim"),
            availability_score: 25.0,
        });
        incident.proposals.push(Proposal {
            bidder: Jid::new("response1@sim"),
            availability_score: 10.0,
        });
        incident.proposals.push(Proposal {
            bidder: Jid::new("response2@sim"),
            availability_score: 10.0,
        });

        let best = incident.best_proposal().unwrap();
        assert_eq!(best.bidder, Jid::new("response1@sim"));
    }

    #[test]
    fn test_status_closed() {
        assert!(!IncidentStatus::Waiting.is_closed());
        assert!(!IncidentStatus::Awarded.is_closed());
        assert!(IncidentStatus::Resolved.is_closed());
        assert!(IncidentStatus::Failed.is_closed());
    }
}
