// Reward ledger and level derivation.
//
// Balances only ever move through relative store updates (`credit`,
// `try_debit_coins`); level is a cached projection of xp, re-derived after
// every xp credit and never lowered.

use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::{RewardError, RewardResult};
use crate::store::RewardStore;
use crate::RewardEvent;

/// XP needed per level step
pub const XP_PER_LEVEL: u32 = 100;

/// What kind of action produced a payout (recorded on every reward_event row)
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardSource {
    ProblemAnswer,
    LoginBonus,
    GachaDuplicate,
    DailyMission,
    Task,
    Chapter,
}

/// Amounts to pay out in one settlement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reward {
    pub xp: u32,
    pub coins: u32,
    pub gems: u32,
}

impl Reward {
    pub fn new(xp: u32, coins: u32, gems: u32) -> Self {
        Self { xp, coins, gems }
    }

    pub fn xp(xp: u32) -> Self {
        Self { xp, ..Self::default() }
    }

    pub fn coins(coins: u32) -> Self {
        Self { coins, ..Self::default() }
    }

    pub fn gems(gems: u32) -> Self {
        Self { gems, ..Self::default() }
    }
}

/// Level before and after an xp credit, so callers can decide to celebrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub before: u32,
    pub after: u32,
}

impl LevelChange {
    pub fn unchanged(level: u32) -> Self {
        Self { before: level, after: level }
    }

    pub fn leveled_up(&self) -> bool {
        self.after > self.before
    }
}

/// Result of settling a reward: what was paid and what it did to the level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub reward: Reward,
    pub level: LevelChange,
}

/// level = floor(xp / 100) + 1
pub fn level_for_xp(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

/// Re-derive the cached level from the stored xp; only ever raises it
fn rederive_level<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, xp: u32, current: u32)
    -> RewardResult<LevelChange>
{
    let derived = level_for_xp(xp);
    if derived > current {
        store.raise_level(student_id, derived)?;
        Ok(LevelChange { before: current, after: derived })
    } else {
        Ok(LevelChange::unchanged(current))
    }
}

/// Credit xp and re-derive level
pub fn add_xp<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, amount: u32) -> RewardResult<LevelChange> {
    let updated = store.credit(student_id, Reward::xp(amount))?;
    rederive_level(store, student_id, updated.xp, updated.level)
}

/// Relative coin update. Negative deltas spend and fail with
/// `InsufficientFunds` (balance untouched) if they would go below zero.
/// Returns the balance afterwards.
pub fn add_coins<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, delta: i64) -> RewardResult<u32> {
    if delta >= 0 {
        let amount = u32::try_from(delta)
            .map_err(|_| RewardError::Validation(format!("coin credit {} out of range", delta)))?;
        return Ok(store.credit(student_id, Reward::coins(amount))?.coins);
    }

    let needed = u32::try_from(delta.unsigned_abs())
        .map_err(|_| RewardError::Validation(format!("coin debit {} out of range", delta)))?;
    if store.try_debit_coins(student_id, needed)? {
        store.student(student_id)
            .map(|s| s.coins)
            .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))
    } else {
        let available = store.student(student_id).map(|s| s.coins).unwrap_or(0);
        Err(RewardError::InsufficientFunds { needed, available })
    }
}

/// Credit gems. Returns the balance afterwards.
pub fn add_gems<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, amount: u32) -> RewardResult<u32> {
    Ok(store.credit(student_id, Reward::gems(amount))?.gems)
}

/// Pay a whole reward in one credit, re-derive level and append the history row
pub fn settle_reward<S: RewardStore + ?Sized>(
    store: &mut S,
    student_id: &str,
    source: RewardSource,
    source_id: Option<u64>,
    reward: Reward,
    now: Timestamp,
) -> RewardResult<Payout> {
    let updated = store.credit(student_id, reward)?;
    let level = rederive_level(store, student_id, updated.xp, updated.level)?;

    store.append_reward_event(RewardEvent {
        id: 0, // auto_inc
        student_id: student_id.to_string(),
        source,
        source_id,
        xp: reward.xp,
        coins: reward.coins,
        gems: reward.gems,
        level_before: level.before,
        level_after: level.after,
        created_at: now,
    });

    if level.leveled_up() {
        log::info!("[LEVEL] student={} level={}→{} xp={}",
            short_id(student_id), level.before, level.after, updated.xp);
    }

    Ok(Payout { reward, level })
}

/// First 8 chars of an id, for log lines (cut on a char boundary)
pub fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_short_id_cuts_on_char_boundary() {
        assert_eq!(short_id("abcdefgh1234"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("abcdefgé1"), "abcdefgé");
        assert_eq!(short_id("ééééééééé"), "éééééééé");
    }

    #[test]
    fn test_level_for_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(105), 2);
        assert_eq!(level_for_xp(999), 10);
    }

    #[test]
    fn test_level_invariant_holds_after_every_xp_credit() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);

        for amount in [3, 40, 57, 0, 100, 250, 1, 99] {
            add_xp(&mut store, "kid", amount).unwrap();
            let kid = store.student("kid").unwrap();
            assert_eq!(kid.level, kid.xp / 100 + 1, "after crediting {}", amount);
        }
    }

    #[test]
    fn test_add_xp_reports_level_up() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 95, 0);

        let change = add_xp(&mut store, "kid", 10).unwrap();
        assert_eq!(change, LevelChange { before: 1, after: 2 });
        assert!(change.leveled_up());

        let change = add_xp(&mut store, "kid", 10).unwrap();
        assert!(!change.leveled_up());
    }

    #[test]
    fn test_level_never_decreases() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);
        store.students.get_mut("kid").unwrap().level = 5;

        let change = add_xp(&mut store, "kid", 10).unwrap();
        assert_eq!(change, LevelChange::unchanged(5));
        assert_eq!(store.student("kid").unwrap().level, 5);
    }

    #[test]
    fn test_overspend_fails_and_leaves_balance() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 9);

        let err = add_coins(&mut store, "kid", -10).unwrap_err();
        assert_eq!(err, RewardError::InsufficientFunds { needed: 10, available: 9 });
        assert_eq!(store.student("kid").unwrap().coins, 9);

        assert_eq!(add_coins(&mut store, "kid", -9).unwrap(), 0);
        assert_eq!(add_coins(&mut store, "kid", 25).unwrap(), 25);
    }

    #[test]
    fn test_add_gems_and_missing_student() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);

        assert_eq!(add_gems(&mut store, "kid", 3).unwrap(), 3);
        assert_eq!(
            add_xp(&mut store, "ghost", 5).unwrap_err(),
            RewardError::StudentNotFound("ghost".to_string())
        );
    }

    #[test]
    fn test_settle_reward_records_history() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 90, 0);
        let now = store.now;

        let payout = settle_reward(
            &mut store, "kid", RewardSource::Task, Some(4), Reward::new(20, 5, 1), now,
        ).unwrap();

        assert!(payout.level.leveled_up());
        let kid = store.student("kid").unwrap();
        assert_eq!((kid.xp, kid.coins, kid.gems, kid.level), (110, 5, 1, 2));

        let event = store.reward_events.last().unwrap();
        assert_eq!(event.source, RewardSource::Task);
        assert_eq!(event.source_id, Some(4));
        assert_eq!((event.level_before, event.level_after), (1, 2));
    }
}
