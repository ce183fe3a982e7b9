// Daily missions.
//
// Progress rows are keyed by (student, mission, day). There is no reset job:
// the first qualifying event of a new day simply finds no row for that day.
// The completion reward is edge-triggered on the increment that first reaches
// the target, so it is paid at most once per (student, mission, day).

use chrono::NaiveDate;
use spacetimedb::{SpacetimeType, Timestamp};

use crate::calendar::{day_key, day_of};
use crate::error::{RewardError, RewardResult};
use crate::progression::{settle_reward, short_id, Payout, Reward, RewardSource};
use crate::store::RewardStore;
use crate::{DailyMission, DailyMissionProgress};

/// Gameplay events a mission can count
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionType {
    SolveProblems,
    RollGacha,
    CompleteChapter,
    CompleteTask,
    ClaimLogin,
}

impl MissionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solve_problems" | "problem_solved" => Some(MissionType::SolveProblems),
            "roll_gacha" | "gacha_roll" => Some(MissionType::RollGacha),
            "complete_chapter" | "story_complete" => Some(MissionType::CompleteChapter),
            "complete_task" | "task_complete" => Some(MissionType::CompleteTask),
            "claim_login" | "daily_login" => Some(MissionType::ClaimLogin),
            _ => None,
        }
    }
}

/// What one increment did to one mission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionUpdate {
    pub mission_id: u64,
    pub current_count: u32,
    pub target_count: u32,
    pub just_completed: bool,
    pub payout: Option<Payout>,
}

/// A mission as it stands for one student on one day
#[derive(Debug, Clone)]
pub struct MissionStatus {
    pub mission: DailyMission,
    pub current_count: u32,
    pub target_count: u32,
    pub is_completed: bool,
}

/// Apply an increment to a progress row. Returns true only on the increment
/// that first crosses the target.
pub fn advance_progress(progress: &mut DailyMissionProgress, by: u32, target: u32, now: Timestamp) -> bool {
    let was_completed = progress.is_completed;
    progress.current_count = progress.current_count.saturating_add(by);

    let reached = progress.current_count >= target;
    let just_completed = reached && !was_completed;

    progress.is_completed = was_completed || reached;
    if just_completed {
        progress.completed_at = Some(now);
    }
    just_completed
}

fn active_missions_of<S: RewardStore + ?Sized>(store: &S, mission_type: MissionType) -> Vec<DailyMission> {
    store.missions()
        .into_iter()
        .filter(|m| m.is_active && m.mission_type == mission_type)
        .collect()
}

/// Count a qualifying event against every active mission of that type
pub fn increment_mission_progress<S: RewardStore + ?Sized>(
    store: &mut S,
    student_id: &str,
    mission_type: MissionType,
    by: u32,
    now: Timestamp,
) -> RewardResult<Vec<MissionUpdate>> {
    if by == 0 {
        return Err(RewardError::Validation("mission increment must be at least 1".to_string()));
    }

    let day = day_key(day_of(now));
    let mut updates = Vec::new();

    for mission in active_missions_of(&*store, mission_type) {
        let mut progress = store.mission_progress(student_id, mission.id, day)
            .unwrap_or_else(|| DailyMissionProgress {
                id: 0, // auto_inc
                student_id: student_id.to_string(),
                mission_id: mission.id,
                day,
                current_count: 0,
                is_completed: false,
                completed_at: None,
            });

        let just_completed = advance_progress(&mut progress, by, mission.target_count, now);
        let progress = store.save_mission_progress(progress);

        let payout = if just_completed {
            let reward = Reward::new(mission.xp_reward, mission.coin_reward, 0);
            let payout = settle_reward(store, student_id, RewardSource::DailyMission, Some(mission.id), reward, now)?;
            log::info!("[MISSION] complete student={} mission={} \"{}\" xp={} coins={}",
                short_id(student_id), mission.id, mission.title, reward.xp, reward.coins);
            Some(payout)
        } else {
            log::debug!("[MISSION] progress student={} mission={} count={}/{}",
                short_id(student_id), mission.id, progress.current_count, mission.target_count);
            None
        };

        updates.push(MissionUpdate {
            mission_id: mission.id,
            current_count: progress.current_count,
            target_count: mission.target_count,
            just_completed,
            payout,
        });
    }

    Ok(updates)
}

/// Every active mission with the student's count for `day` (zero when untouched)
pub fn daily_mission_progress<S: RewardStore + ?Sized>(store: &S, student_id: &str, day: NaiveDate)
    -> Vec<MissionStatus>
{
    let key = day_key(day);
    store.missions()
        .into_iter()
        .filter(|m| m.is_active)
        .map(|mission| {
            let progress = store.mission_progress(student_id, mission.id, key);
            MissionStatus {
                current_count: progress.as_ref().map_or(0, |p| p.current_count),
                target_count: mission.target_count,
                is_completed: progress.as_ref().is_some_and(|p| p.is_completed),
                mission,
            }
        })
        .collect()
}
