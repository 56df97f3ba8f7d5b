//! Cross-Project Matcher (C7): pairs outgoing connections in one project with incoming
//! connections in another using technology-aware similarity, producing `MatchCandidate`s the
//! store turns into `ConnectionMapping` rows.
//!
//! Pure and single-threaded per §5. Runs globally across every project in the store, not just
//! projects touched by the current run — the caller is responsible for supplying every
//! outgoing/incoming connection it wants considered.

use crate::domain::{Connection, ConnectionId, ProjectId};

/// A pairing the Matcher proposes. Carries no id — the store assigns `ConnectionMappingId` on
/// insert, consistent with the rest of this crate never inventing store-owned identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub outgoing_connection_id: ConnectionId,
    pub incoming_connection_id: ConnectionId,
    pub confidence: f64,
    pub technology_name: String,
    pub rationale: Option<String>,
}

/// Computes a similarity score in `[0, 1]` between an outgoing and an incoming connection of the
/// same `technology_name`. Implementations are technology-specific (e.g. HTTP path/method
/// matching, AMQP queue/routing-key matching); `TokenOverlapSimilarity` is the documented default
/// fallback when no technology-specific strategy is registered.
pub trait SimilarityStrategy: Send + Sync {
    fn similarity(&self, outgoing: &Connection, incoming: &Connection) -> f64;
}

/// Default similarity: Jaccard overlap of lowercased, punctuation-stripped description tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlapSimilarity;

fn tokenize(description: &str) -> std::collections::BTreeSet<String> {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_string())
        .collect()
}

impl SimilarityStrategy for TokenOverlapSimilarity {
    fn similarity(&self, outgoing: &Connection, incoming: &Connection) -> f64 {
        let a = tokenize(&outgoing.description);
        let b = tokenize(&incoming.description);
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(&b).count();
        let union = a.union(&b).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

/// A connection paired with the id of the project its file belongs to. Matching requires knowing
/// project membership, which `Connection` alone doesn't carry — callers (the orchestration layer,
/// which reads this from the store) supply it alongside the connection.
#[derive(Debug, Clone)]
pub struct ProjectConnection {
    pub connection: Connection,
    pub project_id: ProjectId,
}

/// Pairs every outgoing connection against every incoming connection in a *different* project
/// sharing the same `technology_name`, keeping pairs whose similarity score is `>= threshold`.
///
/// Idempotence (L4): iterates outgoing connections in ascending id order and, per outgoing
/// connection, incoming candidates in ascending id order, so re-running against an unchanged
/// connection set produces an identical, identically-ordered result.
pub fn match_connections(
    outgoing: &[ProjectConnection],
    incoming: &[ProjectConnection],
    strategy: &dyn SimilarityStrategy,
    threshold: f64,
) -> Vec<MatchCandidate> {
    let mut sorted_outgoing: Vec<&ProjectConnection> = outgoing.iter().collect();
    sorted_outgoing.sort_by_key(|pc| pc.connection.id);

    let mut sorted_incoming: Vec<&ProjectConnection> = incoming.iter().collect();
    sorted_incoming.sort_by_key(|pc| pc.connection.id);

    let mut matches = Vec::new();
    for out in &sorted_outgoing {
        for inc in &sorted_incoming {
            if out.project_id == inc.project_id {
                continue;
            }
            if out.connection.technology_name != inc.connection.technology_name {
                continue;
            }
            let score = strategy.similarity(&out.connection, &inc.connection);
            if score >= threshold {
                matches.push(MatchCandidate {
                    outgoing_connection_id: out.connection.id,
                    incoming_connection_id: inc.connection.id,
                    confidence: score,
                    technology_name: out.connection.technology_name.clone(),
                    rationale: None,
                });
            }
        }
    }
    matches
}
