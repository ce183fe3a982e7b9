// Login streak & daily bonus.
//
// Preview and claim share `quote_login_bonus`, so what the client is shown
// is exactly what the claim pays.

use chrono::NaiveDate;
use spacetimedb::Timestamp;

use crate::calendar::{day_of, days_between};
use crate::error::{RewardError, RewardResult};
use crate::missions::{increment_mission_progress, MissionType, MissionUpdate};
use crate::progression::{settle_reward, short_id, Payout, Reward, RewardSource};
use crate::store::RewardStore;
use crate::Student;

const LOGIN_BASE_COINS: u32 = 10;
const LOGIN_COINS_PER_STREAK_DAY: u32 = 2;
const LOGIN_BASE_XP: u32 = 5;

/// Streak days that count toward the bonus; longer streaks pay the same
pub const STREAK_BONUS_CAP: u32 = 7;

/// Streak length that earns the "7-day milestone" badge (presentation only)
pub const STREAK_MILESTONE: u32 = 7;

/// Login-bonus numbers for one student at one moment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginBonusQuote {
    pub eligible: bool,
    /// Streak after claiming (or the current streak when not eligible)
    pub streak: u32,
    /// Zero when not eligible
    pub reward: Reward,
    pub milestone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginBonusClaim {
    pub streak: u32,
    pub payout: Payout,
    pub milestone: bool,
    pub missions: Vec<MissionUpdate>,
}

/// Streak the student would have after claiming today, or None if today is
/// already claimed. A last login dated after today counts as claimed.
pub fn next_streak(last_login_day: Option<NaiveDate>, current_streak: u32, today: NaiveDate) -> Option<u32> {
    let Some(last) = last_login_day else {
        return Some(1);
    };
    match days_between(last, today) {
        gap if gap <= 0 => None,
        1 => Some(current_streak.saturating_add(1)),
        _ => Some(1),
    }
}

/// coins = 10 + 2 * min(streak, 7), xp = 5 + min(streak, 7)
pub fn streak_reward(streak: u32) -> Reward {
    let bonus = streak.min(STREAK_BONUS_CAP);
    Reward::new(LOGIN_BASE_XP + bonus, LOGIN_BASE_COINS + bonus * LOGIN_COINS_PER_STREAK_DAY, 0)
}

pub fn quote_login_bonus(student: &Student, now: Timestamp) -> LoginBonusQuote {
    let today = day_of(now);
    let last_day = student.last_login_at.map(day_of);

    match next_streak(last_day, student.login_streak, today) {
        Some(streak) => LoginBonusQuote {
            eligible: true,
            streak,
            reward: streak_reward(streak),
            milestone: streak >= STREAK_MILESTONE,
        },
        None => LoginBonusQuote {
            eligible: false,
            streak: student.login_streak,
            reward: Reward::default(),
            milestone: false,
        },
    }
}

/// Side-effect free eligibility check, safe to call repeatedly
pub fn check_login_bonus<S: RewardStore + ?Sized>(store: &S, student_id: &str, now: Timestamp)
    -> RewardResult<LoginBonusQuote>
{
    let student = store.student(student_id)
        .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))?;
    Ok(quote_login_bonus(&student, now))
}

/// Claim today's bonus. The login stamp is conditional on the last login we
/// quoted from, so a racing second claim finds it changed and is refused.
pub fn claim_login_bonus<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, now: Timestamp)
    -> RewardResult<LoginBonusClaim>
{
    let student = store.student(student_id)
        .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))?;
    let quote = quote_login_bonus(&student, now);
    if !quote.eligible {
        return Err(RewardError::AlreadyClaimedToday);
    }

    if !store.record_login(student_id, student.last_login_at, quote.streak, now)? {
        log::warn!("[LOGIN] concurrent claim refused student={}", short_id(student_id));
        return Err(RewardError::AlreadyClaimedToday);
    }

    let payout = settle_reward(store, student_id, RewardSource::LoginBonus, None, quote.reward, now)?;
    let missions = increment_mission_progress(store, student_id, MissionType::ClaimLogin, 1, now)?;

    log::info!("[LOGIN] student={} streak={} coins={} xp={} milestone={}",
        short_id(student_id), quote.streak, quote.reward.coins, quote.reward.xp, quote.milestone);

    Ok(LoginBonusClaim {
        streak: quote.streak,
        payout,
        milestone: quote.milestone,
        missions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::test_time::{school_day, utc};
    use crate::memory::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_next_streak_transitions() {
        let today = date(2026, 4, 10);
        assert_eq!(next_streak(None, 0, today), Some(1));
        assert_eq!(next_streak(Some(date(2026, 4, 9)), 4, today), Some(5));
        assert_eq!(next_streak(Some(date(2026, 4, 8)), 4, today), Some(1));
        assert_eq!(next_streak(Some(today), 4, today), None);
        assert_eq!(next_streak(Some(date(2026, 4, 11)), 4, today), None);
    }

    #[test]
    fn test_streak_reward_caps_at_seven_days() {
        assert_eq!(streak_reward(1), Reward::new(6, 12, 0));
        assert_eq!(streak_reward(7), Reward::new(12, 24, 0));
        assert_eq!(streak_reward(10), Reward::new(12, 24, 0));
    }

    #[test]
    fn test_claim_twice_same_day_pays_once() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);
        let morning = utc(2026, 4, 10, 15);
        let evening = utc(2026, 4, 11, 6); // still the 10th in Pacific time

        let claim = claim_login_bonus(&mut store, "kid", morning).unwrap();
        assert_eq!(claim.streak, 1);
        assert_eq!(claim.payout.reward, Reward::new(6, 12, 0));

        let err = claim_login_bonus(&mut store, "kid", evening).unwrap_err();
        assert_eq!(err, RewardError::AlreadyClaimedToday);

        let kid = store.student("kid").unwrap();
        assert_eq!((kid.coins, kid.xp), (12, 6));
        assert!(!check_login_bonus(&store, "kid", evening).unwrap().eligible);
    }

    #[test]
    fn test_streak_continues_and_resets() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);

        claim_login_bonus(&mut store, "kid", school_day(2026, 4, 10)).unwrap();
        let next = claim_login_bonus(&mut store, "kid", school_day(2026, 4, 11)).unwrap();
        assert_eq!(next.streak, 2);

        let after_gap = claim_login_bonus(&mut store, "kid", school_day(2026, 4, 14)).unwrap();
        assert_eq!(after_gap.streak, 1);
        assert_eq!(store.student("kid").unwrap().login_streak, 1);
    }

    #[test]
    fn test_preview_matches_claim() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);
        {
            let kid = store.students.get_mut("kid").unwrap();
            kid.login_streak = 9;
            kid.last_login_at = Some(school_day(2026, 4, 9));
        }
        let now = school_day(2026, 4, 10);

        let quote = check_login_bonus(&store, "kid", now).unwrap();
        assert_eq!(quote, LoginBonusQuote {
            eligible: true,
            streak: 10,
            reward: Reward::new(12, 24, 0),
            milestone: true,
        });
        // preview has no side effects
        assert_eq!(store.student("kid").unwrap().coins, 0);

        let claim = claim_login_bonus(&mut store, "kid", now).unwrap();
        assert_eq!(claim.streak, quote.streak);
        assert_eq!(claim.payout.reward, quote.reward);
        assert!(claim.milestone);
    }

    #[test]
    fn test_stale_login_stamp_refuses_claim() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);
        let now = school_day(2026, 4, 10);

        // Another request stamped the login between our read and our write
        assert!(store.record_login("kid", None, 1, now).unwrap());
        assert!(!store.record_login("kid", None, 1, now).unwrap());
    }

    #[test]
    fn test_claim_with_non_ascii_student_id() {
        // log arguments are only built when the level is enabled
        log::set_max_level(log::LevelFilter::Info);
        let mut store = MemoryStore::new();
        store.add_student("abcdefgé1", 0, 0);

        let claim = claim_login_bonus(&mut store, "abcdefgé1", school_day(2026, 4, 10)).unwrap();
        assert_eq!(claim.streak, 1);
        assert_eq!(store.student("abcdefgé1").unwrap().coins, 12);
    }

    #[test]
    fn test_claim_advances_login_mission() {
        let mut store = MemoryStore::new();
        store.add_student("kid", 0, 0);
        let mission = store.add_mission("Say hello", MissionType::ClaimLogin, 1, 10, 5);

        let claim = claim_login_bonus(&mut store, "kid", school_day(2026, 4, 10)).unwrap();
        assert_eq!(claim.missions.len(), 1);
        assert_eq!(claim.missions[0].mission_id, mission);
        assert!(claim.missions[0].just_completed);

        let kid = store.student("kid").unwrap();
        assert_eq!((kid.xp, kid.coins), (6 + 10, 12 + 5));
    }

    #[test]
    fn test_unknown_student() {
        let store = MemoryStore::new();
        assert_eq!(
            check_login_bonus(&store, "ghost", school_day(2026, 4, 10)).unwrap_err(),
            RewardError::StudentNotFound("ghost".to_string())
        );
    }
}
