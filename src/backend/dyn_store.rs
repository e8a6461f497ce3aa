use std::future::Future;
use std::pin::Pin;

use super::BoxError;
use super::traits::ScoreStore;
use crate::score::{LeaderboardEntry, LeaderboardQuery, ScoreSubmission, StoredScore};
use crate::types::IdentityId;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Object-safe wrapper for ScoreStore (needed for Arc<dyn>).
pub(crate) trait ScoreStoreDyn: Send + Sync {
    fn submit_dyn(&self, submission: ScoreSubmission) -> BoxFuture<'_, Option<StoredScore>>;

    fn leaderboard_dyn(&self, query: LeaderboardQuery) -> BoxFuture<'_, Vec<LeaderboardEntry>>;

    fn personal_best_dyn<'a>(&'a self, id: &'a IdentityId) -> BoxFuture<'a, Option<StoredScore>>;
}

impl<T: ScoreStore> ScoreStoreDyn for T {
    fn submit_dyn(&self, submission: ScoreSubmission) -> BoxFuture<'_, Option<StoredScore>> {
        Box::pin(self.submit(submission))
    }

    fn leaderboard_dyn(&self, query: LeaderboardQuery) -> BoxFuture<'_, Vec<LeaderboardEntry>> {
        Box::pin(self.leaderboard(query))
    }

    fn personal_best_dyn<'a>(&'a self, id: &'a IdentityId) -> BoxFuture<'a, Option<StoredScore>> {
        Box::pin(self.personal_best(id))
    }
}
