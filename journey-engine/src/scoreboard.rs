//! Tenant scoreboard
//!
//! Every `done` node is worth [`NODE_POINTS`], except nodes of the
//! zero-score world. Users are ranked by total score, ties broken by user id.

use journey_core::{
    DoneNode, JourneyResult, PlaybookManager, TenantId, UserId, UserSummary, ZERO_SCORE_WORLD_ID,
};
use journey_storage::JourneyStore;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Points for one completed node.
pub const NODE_POINTS: i64 = 100;

/// Entries returned in `top5`.
pub const TOP_ENTRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ScoreEntry {
    pub user_id: UserId,
    pub name: String,
    pub avatar: String,
    pub total_score: i64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Scoreboard {
    pub top5: Vec<ScoreEntry>,
    pub average: i64,
    pub me: ScoreEntry,
    pub total_users: usize,
}

/// Points a completed node is worth; `None` for nodes the playbook does not know.
pub fn node_points(playbook: &PlaybookManager, node_id: &str) -> Option<i64> {
    playbook.node_definition(node_id)?;
    if playbook.node_world(node_id) == ZERO_SCORE_WORLD_ID {
        Some(0)
    } else {
        Some(NODE_POINTS)
    }
}

/// Total score per user. Users whose done nodes are all unknown still
/// appear with zero.
pub fn aggregate_scores(playbook: &PlaybookManager, done: &[DoneNode]) -> BTreeMap<UserId, i64> {
    let mut scores = BTreeMap::new();
    for entry in done {
        let total = scores.entry(entry.user_id).or_insert(0);
        *total += node_points(playbook, &entry.node_id).unwrap_or(0);
    }
    scores
}

/// Order by score descending then user id ascending, and number `1..=N`.
pub fn rank_scores(scores: &BTreeMap<UserId, i64>) -> Vec<(UserId, i64, usize)> {
    let mut ordered: Vec<(UserId, i64)> = scores.iter().map(|(u, s)| (*u, *s)).collect();
    // BTreeMap iteration is already user-id ascending; the sort is stable.
    ordered.sort_by(|a, b| b.1.cmp(&a.1));
    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, (user, score))| (user, score, idx + 1))
        .collect()
}

/// `floor(sum / n)`, zero for an empty board.
pub fn average_score(scores: &BTreeMap<UserId, i64>) -> i64 {
    if scores.is_empty() {
        return 0;
    }
    scores.values().sum::<i64>() / scores.len() as i64
}

fn entry_for(summary: Option<&UserSummary>, user_id: UserId, total_score: i64, rank: usize) -> ScoreEntry {
    let fallback;
    let summary = match summary {
        Some(s) => s,
        None => {
            fallback = UserSummary::unknown(user_id);
            &fallback
        }
    };
    ScoreEntry {
        user_id,
        name: summary.display_name(),
        avatar: summary.avatar(),
        total_score,
        rank,
    }
}

/// Build the scoreboard of a tenant as seen by `current_user`.
pub async fn build_scoreboard(
    store: &dyn JourneyStore,
    playbook: &PlaybookManager,
    tenant_id: TenantId,
    current_user: UserId,
) -> JourneyResult<Scoreboard> {
    let done = store.get_done_nodes(tenant_id).await?;
    let scores = aggregate_scores(playbook, &done);
    let ranked = rank_scores(&scores);

    let ids: Vec<UserId> = ranked.iter().map(|(u, _, _)| *u).collect();
    let users: HashMap<UserId, UserSummary> = store
        .get_users_by_ids(&ids)
        .await?
        .into_iter()
        .map(|u| (u.user_id, u))
        .collect();

    let entries: Vec<ScoreEntry> = ranked
        .into_iter()
        .map(|(user, score, rank)| entry_for(users.get(&user), user, score, rank))
        .collect();

    let me = match entries.iter().find(|e| e.user_id == current_user) {
        Some(entry) => entry.clone(),
        None => {
            let summary = store
                .get_users_by_ids(&[current_user])
                .await?
                .into_iter()
                .next();
            entry_for(summary.as_ref(), current_user, 0, entries.len() + 1)
        }
    };

    tracing::debug!(%tenant_id, total_users = entries.len(), "scoreboard built");

    Ok(Scoreboard {
        average: average_score(&scores),
        total_users: entries.len(),
        top5: entries.into_iter().take(TOP_ENTRIES).collect(),
        me,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::EntityIdType;
    use uuid::Uuid;

    const PLAYBOOK: &str = r#"{"worlds":[
        {"id":"W1","nodes":[{"id":"N1"}]},
        {"id":"W2","nodes":[{"id":"N2"}]},
        {"id":"W3","nodes":[{"id":"N3"}]}
    ]}"#;

    fn user(n: u128) -> UserId {
        UserId::new(Uuid::from_u128(n))
    }

    fn done(u: UserId, node: &str) -> DoneNode {
        DoneNode {
            user_id: u,
            node_id: node.to_string(),
        }
    }

    #[test]
    fn test_points_by_world() {
        let pb = PlaybookManager::from_bytes(PLAYBOOK.as_bytes()).unwrap();
        assert_eq!(node_points(&pb, "N1"), Some(100));
        assert_eq!(node_points(&pb, "N3"), Some(0));
        assert_eq!(node_points(&pb, "NX"), None);
    }

    #[test]
    fn test_unknown_only_user_scores_zero() {
        let pb = PlaybookManager::from_bytes(PLAYBOOK.as_bytes()).unwrap();
        let scores = aggregate_scores(&pb, &[done(user(1), "NX"), done(user(2), "N1"), done(user(2), "N2")]);
        assert_eq!(scores[&user(1)], 0);
        assert_eq!(scores[&user(2)], 200);
    }

    #[test]
    fn test_ties_break_on_user_id() {
        let scores: BTreeMap<UserId, i64> = [(user(3), 100), (user(1), 100), (user(2), 300)].into();
        let ranked = rank_scores(&scores);
        assert_eq!(
            ranked,
            vec![(user(2), 300, 1), (user(1), 100, 2), (user(3), 100, 3)]
        );
    }

    #[test]
    fn test_average_floors() {
        let scores: BTreeMap<UserId, i64> = [(user(1), 200), (user(2), 0), (user(3), 0)].into();
        assert_eq!(average_score(&scores), 66);
        assert_eq!(average_score(&BTreeMap::new()), 0);
    }

    #[test]
    fn test_missing_user_named_student() {
        let entry = entry_for(None, user(9), 0, 4);
        assert_eq!(entry.name, "Student");
        assert_eq!(entry.avatar, "");
        assert_eq!(entry.rank, 4);
    }
}
