//! Score validation and leaderboard ranking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time};

use crate::error::Error;
use crate::types::{IdentityId, Nickname};

/// Highest score a single run can produce.
pub const MAX_SCORE: u32 = 1_000_000;
/// Shortest accepted run, in seconds.
pub const MIN_DURATION_SECONDS: u32 = 1;
/// Longest accepted run, in seconds.
pub const MAX_DURATION_SECONDS: u32 = 3_600;
/// Number of leaderboard rows returned when no limit is given.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// A finished run, validated before it reaches the score store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ScoreSubmission {
    pub identity_id: IdentityId,
    pub nickname: Option<Nickname>,
    pub score: u32,
    pub duration_seconds: u32,
}

impl ScoreSubmission {
    /// # Errors
    ///
    /// Returns [`Error::InvalidScore`] if `score` exceeds [`MAX_SCORE`] or
    /// `duration_seconds` is outside `MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS`.
    pub fn new(
        identity_id: IdentityId,
        nickname: Option<Nickname>,
        score: u32,
        duration_seconds: u32,
    ) -> Result<Self, Error> {
        if score > MAX_SCORE {
            return Err(Error::InvalidScore(format!(
                "score {score} exceeds maximum {MAX_SCORE}"
            )));
        }
        if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&duration_seconds) {
            return Err(Error::InvalidScore(format!(
                "duration {duration_seconds}s outside {MIN_DURATION_SECONDS}..={MAX_DURATION_SECONDS}s"
            )));
        }
        Ok(Self {
            identity_id,
            nickname,
            score,
            duration_seconds,
        })
    }
}

/// Score row as persisted by the score store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct StoredScore {
    pub id: u64,
    pub identity_id: IdentityId,
    #[serde(default)]
    pub nickname: Option<Nickname>,
    pub score: u32,
    pub duration_seconds: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl StoredScore {
    #[must_use]
    pub fn new(id: u64, submission: ScoreSubmission, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            identity_id: submission.identity_id,
            nickname: submission.nickname,
            score: submission.score,
            duration_seconds: submission.duration_seconds,
            created_at,
        }
    }
}

/// Time window a leaderboard ranks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardWindow {
    /// Since UTC midnight.
    Today,
    /// Rolling seven days.
    #[default]
    ThisWeek,
    AllTime,
}

impl LeaderboardWindow {
    /// Earliest instant included in the window, `None` when unbounded.
    #[must_use]
    pub fn starts_at(self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let now = now.to_offset(time::UtcOffset::UTC);
        match self {
            Self::Today => Some(now.replace_time(Time::MIDNIGHT)),
            Self::ThisWeek => Some(now - Duration::days(7)),
            Self::AllTime => None,
        }
    }

    #[must_use]
    pub fn contains(self, at: OffsetDateTime, now: OffsetDateTime) -> bool {
        self.starts_at(now).is_none_or(|start| at >= start)
    }
}

/// Ranked leaderboard request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    pub window: LeaderboardWindow,
    pub limit: usize,
}

impl LeaderboardQuery {
    #[must_use]
    pub fn new(window: LeaderboardWindow) -> Self {
        Self {
            window,
            limit: DEFAULT_LEADERBOARD_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self::new(LeaderboardWindow::default())
    }
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct LeaderboardEntry {
    /// 1-indexed.
    pub rank: usize,
    pub identity_id: IdentityId,
    pub nickname: Option<Nickname>,
    pub score: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub achieved_at: OffsetDateTime,
}

/// Rank stored scores for a leaderboard query.
///
/// Keeps each player's best score inside the window, sorts descending by
/// score (earlier achievement wins ties) and truncates to `query.limit`.
#[must_use]
pub fn rank_scores(
    scores: &[StoredScore],
    query: LeaderboardQuery,
    now: OffsetDateTime,
) -> Vec<LeaderboardEntry> {
    let mut best: HashMap<&IdentityId, &StoredScore> = HashMap::new();
    for s in scores
        .iter()
        .filter(|s| query.window.contains(s.created_at, now))
    {
        best.entry(&s.identity_id)
            .and_modify(|current| {
                if beats(s, *current) {
                    *current = s;
                }
            })
            .or_insert(s);
    }

    let mut rows: Vec<&StoredScore> = best.into_values().collect();
    rows.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    rows.truncate(query.limit);

    rows.into_iter()
        .enumerate()
        .map(|(i, s)| LeaderboardEntry {
            rank: i + 1,
            identity_id: s.identity_id.clone(),
            nickname: s.nickname.clone(),
            score: s.score,
            achieved_at: s.created_at,
        })
        .collect()
}

fn beats(candidate: &StoredScore, current: &StoredScore) -> bool {
    candidate.score > current.score
        || (candidate.score == current.score && candidate.created_at < current.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-10 15:00 UTC);

    fn stored(id: u64, who: &str, score: u32, at: OffsetDateTime) -> StoredScore {
        let submission = ScoreSubmission::new(who.into(), None, score, 60).unwrap();
        StoredScore::new(id, submission, at)
    }

    #[test]
    fn submission_rejects_out_of_range() {
        assert!(ScoreSubmission::new("u1".into(), None, MAX_SCORE, 60).is_ok());
        assert!(matches!(
            ScoreSubmission::new("u1".into(), None, MAX_SCORE + 1, 60),
            Err(Error::InvalidScore(_))
        ));
        assert!(ScoreSubmission::new("u1".into(), None, 10, 0).is_err());
        assert!(ScoreSubmission::new("u1".into(), None, 10, MAX_DURATION_SECONDS + 1).is_err());
        assert!(ScoreSubmission::new("u1".into(), None, 0, 1).is_ok());
    }

    #[test]
    fn window_start() {
        assert_eq!(
            LeaderboardWindow::Today.starts_at(NOW),
            Some(datetime!(2026-03-10 00:00 UTC))
        );
        assert_eq!(
            LeaderboardWindow::ThisWeek.starts_at(NOW),
            Some(datetime!(2026-03-03 15:00 UTC))
        );
        assert_eq!(LeaderboardWindow::AllTime.starts_at(NOW), None);
    }

    #[test]
    fn ranks_best_score_per_player() {
        let scores = vec![
            stored(1, "u1", 100, datetime!(2026-03-10 09:00 UTC)),
            stored(2, "u1", 300, datetime!(2026-03-10 10:00 UTC)),
            stored(3, "u2", 200, datetime!(2026-03-10 11:00 UTC)),
        ];
        let rows = rank_scores(&scores, LeaderboardQuery::new(LeaderboardWindow::Today), NOW);

        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].rank, rows[0].score), (1, 300));
        assert_eq!(rows[0].identity_id, "u1".into());
        assert_eq!((rows[1].rank, rows[1].score), (2, 200));
    }

    #[test]
    fn ties_go_to_earlier_run() {
        let scores = vec![
            stored(1, "late", 500, datetime!(2026-03-10 12:00 UTC)),
            stored(2, "early", 500, datetime!(2026-03-10 08:00 UTC)),
        ];
        let rows = rank_scores(&scores, LeaderboardQuery::new(LeaderboardWindow::Today), NOW);
        assert_eq!(rows[0].identity_id, "early".into());
    }

    #[test]
    fn window_excludes_old_scores() {
        let scores = vec![
            stored(1, "u1", 900, datetime!(2026-03-01 12:00 UTC)),
            stored(2, "u2", 100, datetime!(2026-03-09 12:00 UTC)),
        ];
        let week = rank_scores(&scores, LeaderboardQuery::new(LeaderboardWindow::ThisWeek), NOW);
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].identity_id, "u2".into());

        let today = rank_scores(&scores, LeaderboardQuery::new(LeaderboardWindow::Today), NOW);
        assert!(today.is_empty());

        let all = rank_scores(&scores, LeaderboardQuery::new(LeaderboardWindow::AllTime), NOW);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn limit_truncates() {
        let scores: Vec<StoredScore> = (0..20)
            .map(|i| stored(i, &format!("p{i}"), i as u32 * 10, NOW))
            .collect();
        let rows = rank_scores(&scores, LeaderboardQuery::default(), NOW);
        assert_eq!(rows.len(), DEFAULT_LEADERBOARD_LIMIT);
        assert_eq!(rows[0].score, 190);
        assert_eq!(rows.last().unwrap().rank, DEFAULT_LEADERBOARD_LIMIT);
    }
}
