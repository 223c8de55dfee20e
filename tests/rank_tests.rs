// tests/rank_tests.rs

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use truthvote::{
    error::AppError,
    services::{
        rank_engine::{
            RANK_ORDER, Rank, RankComponent, UserStats, accuracy_rate, calculate_rank_percentage,
            evaluate_upgrade,
        },
        rank_service::{
            RankSnapshot, RankStore, RankUpgrade, current_rank_view, recalculate_user_rank,
        },
    },
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn stats(rank: Rank, predictions: i64, resolved: i64, correct: i64, weekly: i64, days: i64) -> UserStats {
    UserStats {
        total_predictions: predictions,
        total_resolved_predictions: resolved,
        correct_predictions: correct,
        weekly_activity_count: weekly,
        account_created_at: now() - Duration::days(days),
        current_rank: rank,
        current_rank_start_date: now() - Duration::days(days),
        rank_updated_at: None,
    }
}

// --- engine ---

#[test]
fn tiers_are_ordered_and_stored_by_level() {
    assert_eq!(RANK_ORDER.len(), 6);
    for (level, rank) in RANK_ORDER.iter().enumerate() {
        assert_eq!(rank.level(), level as i16);
        assert_eq!(Rank::try_from(level as i16).unwrap(), *rank);
    }
    assert!(Rank::try_from(6).is_err());
    assert!(Rank::try_from(-1).is_err());
    assert_eq!(Rank::Novice.next(), Some(Rank::Amateur));
    assert_eq!(Rank::Master.next(), None);
    assert!(Rank::Expert > Rank::Analyst);
    assert_eq!(Rank::Master.config().name, "Master");
}

#[test]
fn accuracy_is_zero_until_something_resolves() {
    assert_eq!(accuracy_rate(0, 0), 0.0);
    assert_eq!(accuracy_rate(2, 5), 40.0);
    assert_eq!(accuracy_rate(1, 3), 33.33);
}

#[test]
fn fresh_account_has_no_progress() {
    let progress = calculate_rank_percentage(&stats(Rank::Novice, 0, 0, 0, 0, 0), now());

    assert_eq!(progress.percentage, 0);
    assert_eq!(progress.breakdown.len(), 6);
    assert_eq!(progress.breakdown.iter().map(|b| b.weight).sum::<u32>(), 100);
}

#[test]
fn partial_progress_is_weighted() {
    // Toward Amateur: half the predictions and half the weekly activity,
    // everything else met.
    let user = stats(Rank::Novice, 5, 5, 2, 1, 3);

    let progress = calculate_rank_percentage(&user, now());
    // 35 * 0.5 + 15 + 30 + 10 * 0.5 + 5 + 5 = 77.5
    assert_eq!(progress.percentage, 78);

    let evaluation = evaluate_upgrade(&user, now());
    assert!(!evaluation.eligible);
    assert_eq!(evaluation.next_rank, Some(Rank::Amateur));
    let blocked: Vec<RankComponent> = evaluation.blockers.iter().map(|b| b.requirement).collect();
    assert_eq!(
        blocked,
        vec![RankComponent::Predictions, RankComponent::WeeklyActivity]
    );
    assert_eq!(evaluation.blockers[0].have, 5.0);
    assert_eq!(evaluation.blockers[0].need, 10.0);
}

#[test]
fn meeting_every_requirement_is_one_hundred() {
    let user = stats(Rank::Novice, 10, 5, 2, 2, 3);

    assert_eq!(calculate_rank_percentage(&user, now()).percentage, 100);
    let evaluation = evaluate_upgrade(&user, now());
    assert!(evaluation.eligible);
    assert!(evaluation.blockers.is_empty());
}

#[test]
fn almost_there_is_capped_at_ninety_nine() {
    // Professional toward Expert, one day short in rank: 99.83 before the cap.
    let mut user = stats(Rank::Professional, 400, 200, 120, 7, 90);
    user.current_rank_start_date = now() - Duration::days(29);

    let progress = calculate_rank_percentage(&user, now());
    assert_eq!(progress.percentage, 99);
    assert!(!evaluate_upgrade(&user, now()).eligible);
}

#[test]
fn master_is_complete() {
    let user = stats(Rank::Master, 0, 0, 0, 0, 0);

    assert_eq!(calculate_rank_percentage(&user, now()).percentage, 100);
    let evaluation = evaluate_upgrade(&user, now());
    assert!(!evaluation.eligible);
    assert_eq!(evaluation.next_rank, None);
}

// --- service ---

#[derive(Default)]
struct MemoryStore {
    users: Mutex<HashMap<i64, UserStats>>,
    saves: Mutex<Vec<RankSnapshot>>,
    upgrades: Mutex<Vec<RankUpgrade>>,
}

impl MemoryStore {
    fn with_user(user_id: i64, stats: UserStats) -> Self {
        let store = Self::default();
        store.users.lock().unwrap().insert(user_id, stats);
        store
    }

    fn saves(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

#[async_trait]
impl RankStore for MemoryStore {
    async fn load_stats(
        &self,
        user_id: i64,
        _now: DateTime<Utc>,
    ) -> Result<Option<UserStats>, AppError> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn save_progress(
        &self,
        user_id: i64,
        snapshot: &RankSnapshot,
        upgrade: Option<&RankUpgrade>,
    ) -> Result<bool, AppError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or(AppError::NotFound("User not found".to_string()))?;
        if user.current_rank != snapshot.expected_rank
            || user.rank_updated_at != snapshot.expected_updated_at
        {
            return Ok(false);
        }
        user.current_rank = snapshot.rank;
        user.current_rank_start_date = snapshot.rank_start_date;
        user.rank_updated_at = Some(snapshot.recalculated_at);

        self.saves.lock().unwrap().push(snapshot.clone());
        if let Some(upgrade) = upgrade {
            self.upgrades.lock().unwrap().push(upgrade.clone());
        }
        Ok(true)
    }
}

type Interleave = Box<dyn Fn(&mut UserStats, &mut Vec<RankUpgrade>) + Send + Sync>;

/// Hands out the stored stats, then lets another writer change the row
/// before the caller gets to save.
struct RacingStore {
    inner: MemoryStore,
    races_left: Mutex<usize>,
    interleave: Interleave,
}

impl RacingStore {
    fn new(user_id: i64, stats: UserStats, races: usize, interleave: Interleave) -> Self {
        Self {
            inner: MemoryStore::with_user(user_id, stats),
            races_left: Mutex::new(races),
            interleave,
        }
    }

    fn stored(&self, user_id: i64) -> UserStats {
        self.inner.users.lock().unwrap()[&user_id].clone()
    }
}

#[async_trait]
impl RankStore for RacingStore {
    async fn load_stats(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<UserStats>, AppError> {
        let loaded = self.inner.load_stats(user_id, now).await?;

        let mut left = self.races_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            let mut users = self.inner.users.lock().unwrap();
            let mut upgrades = self.inner.upgrades.lock().unwrap();
            if let Some(user) = users.get_mut(&user_id) {
                (self.interleave)(user, &mut upgrades);
            }
        }
        Ok(loaded)
    }

    async fn save_progress(
        &self,
        user_id: i64,
        snapshot: &RankSnapshot,
        upgrade: Option<&RankUpgrade>,
    ) -> Result<bool, AppError> {
        self.inner.save_progress(user_id, snapshot, upgrade).await
    }
}

const COOLDOWN_MINUTES: i64 = 5;

fn cooldown() -> Duration {
    Duration::minutes(COOLDOWN_MINUTES)
}

#[tokio::test]
async fn promotion_moves_one_tier_and_restarts_the_clock() {
    // Numbers good enough for Master, still a Novice.
    let store = MemoryStore::with_user(1, stats(Rank::Novice, 2000, 1000, 900, 20, 400));

    let result = recalculate_user_rank(&store, 1, true, now(), cooldown())
        .await
        .expect("recalculation");

    assert_eq!(result.promoted_to, Some(Rank::Amateur));
    assert_eq!(result.rank, Rank::Amateur);
    assert_eq!(result.next_rank, Some(Rank::Analyst));
    assert!(!result.cached);

    let upgrades = store.upgrades.lock().unwrap().clone();
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].from_rank, Rank::Novice);
    assert_eq!(upgrades[0].to_rank, Rank::Amateur);
    assert_eq!(upgrades[0].percentage_at_upgrade, 100);

    // Time in rank restarted, so the next tier has to wait.
    assert!(!result.eligible_for_upgrade);
    assert!(
        result
            .blockers
            .iter()
            .any(|b| b.requirement == RankComponent::TimeInRank)
    );

    let again = recalculate_user_rank(&store, 1, true, now(), cooldown())
        .await
        .expect("second recalculation");
    assert_eq!(again.promoted_to, None);
    assert_eq!(again.rank, Rank::Amateur);
}

#[tokio::test]
async fn ranks_are_never_lowered() {
    let store = MemoryStore::with_user(2, stats(Rank::Expert, 3, 1, 0, 0, 1));

    let result = recalculate_user_rank(&store, 2, true, now(), cooldown())
        .await
        .expect("recalculation");

    assert_eq!(result.rank, Rank::Expert);
    assert_eq!(result.promoted_to, None);
    assert_eq!(store.users.lock().unwrap()[&2].current_rank, Rank::Expert);
    assert!(store.upgrades.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unforced_calls_respect_the_cooldown() {
    let store = MemoryStore::with_user(3, stats(Rank::Novice, 4, 0, 0, 1, 1));

    let first = recalculate_user_rank(&store, 3, false, now(), cooldown())
        .await
        .expect("first");
    assert!(!first.cached);
    assert_eq!(store.saves(), 1);

    let soon = now() + Duration::minutes(COOLDOWN_MINUTES - 1);
    let throttled = recalculate_user_rank(&store, 3, false, soon, cooldown())
        .await
        .expect("throttled");
    assert!(throttled.cached);
    assert_eq!(store.saves(), 1);

    let forced = recalculate_user_rank(&store, 3, true, soon, cooldown())
        .await
        .expect("forced");
    assert!(!forced.cached);
    assert_eq!(store.saves(), 2);

    let later = soon + Duration::minutes(COOLDOWN_MINUTES);
    let after = recalculate_user_rank(&store, 3, false, later, cooldown())
        .await
        .expect("after cooldown");
    assert!(!after.cached);
    assert_eq!(store.saves(), 3);
}

#[tokio::test]
async fn saved_snapshot_carries_the_counters() {
    let store = MemoryStore::with_user(4, stats(Rank::Novice, 5, 5, 2, 1, 3));

    let result = recalculate_user_rank(&store, 4, true, now(), cooldown())
        .await
        .expect("recalculation");

    let saved = store.saves.lock().unwrap()[0].clone();
    assert_eq!(saved.percentage, result.percentage);
    assert_eq!(saved.total_predictions, 5);
    assert_eq!(saved.accuracy_rate, 40.0);
    assert_eq!(saved.recalculated_at, now());
}

#[tokio::test]
async fn read_only_view_persists_nothing() {
    let store = MemoryStore::with_user(5, stats(Rank::Novice, 10, 5, 2, 2, 3));

    let view = current_rank_view(&store, 5, now()).await.expect("view");

    assert!(view.eligible_for_upgrade);
    assert_eq!(view.rank, Rank::Novice);
    assert_eq!(view.promoted_to, None);
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let store = MemoryStore::default();

    let err = recalculate_user_rank(&store, 404, true, now(), cooldown())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

fn promote_to_amateur_at(at: DateTime<Utc>) -> Interleave {
    Box::new(move |user: &mut UserStats, upgrades: &mut Vec<RankUpgrade>| {
        upgrades.push(RankUpgrade {
            from_rank: user.current_rank,
            to_rank: Rank::Amateur,
            percentage_at_upgrade: 100,
            upgraded_at: at,
        });
        user.current_rank = Rank::Amateur;
        user.current_rank_start_date = at;
        user.rank_updated_at = Some(at);
    })
}

#[tokio::test]
async fn stale_read_does_not_undo_a_concurrent_promotion() {
    // Weak numbers: this recalculation alone would keep the user a Novice.
    let store = RacingStore::new(
        6,
        stats(Rank::Novice, 1, 0, 0, 0, 1),
        1,
        promote_to_amateur_at(now() - Duration::minutes(1)),
    );

    let result = recalculate_user_rank(&store, 6, true, now(), cooldown())
        .await
        .expect("recalculation");

    assert_eq!(result.rank, Rank::Amateur);
    assert_eq!(result.promoted_to, None);
    let stored = store.stored(6);
    assert_eq!(stored.current_rank, Rank::Amateur);
    assert_eq!(stored.current_rank_start_date, now() - Duration::minutes(1));
    assert_eq!(store.inner.upgrades.lock().unwrap().len(), 1);
    assert_eq!(store.inner.saves(), 1);
}

#[tokio::test]
async fn racing_promotions_record_one_upgrade() {
    // Both writers see an eligible Novice; only one promotion may land.
    let store = RacingStore::new(
        7,
        stats(Rank::Novice, 2000, 1000, 900, 20, 400),
        1,
        promote_to_amateur_at(now()),
    );

    let result = recalculate_user_rank(&store, 7, false, now(), cooldown())
        .await
        .expect("recalculation");

    // The retry finds the fresh promotion inside the cooldown.
    assert!(result.cached);
    assert_eq!(result.rank, Rank::Amateur);
    assert_eq!(result.promoted_to, None);

    let upgrades = store.inner.upgrades.lock().unwrap().clone();
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].to_rank, Rank::Amateur);
    assert_eq!(store.stored(7).current_rank, Rank::Amateur);
    assert_eq!(store.inner.saves(), 0);
}

#[tokio::test]
async fn constant_contention_reports_the_stored_rank() {
    let bump: Interleave = Box::new(|user: &mut UserStats, _: &mut Vec<RankUpgrade>| {
        let last = user.rank_updated_at.unwrap_or_else(now);
        user.rank_updated_at = Some(last - Duration::seconds(1));
    });
    let store = RacingStore::new(8, stats(Rank::Analyst, 4, 2, 1, 1, 30), usize::MAX, bump);

    let result = recalculate_user_rank(&store, 8, true, now(), cooldown())
        .await
        .expect("recalculation");

    assert_eq!(result.rank, Rank::Analyst);
    assert_eq!(result.promoted_to, None);
    assert_eq!(store.inner.saves(), 0);
    assert_eq!(store.stored(8).current_rank, Rank::Analyst);
}
