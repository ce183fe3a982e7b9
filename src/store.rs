// Repository seam between the reward engine and the relational store.
//
// Engine operations take a `&mut impl RewardStore` and never reach the database
// on their own. `DbStore` backs it with SpacetimeDB tables; one reducer call is
// one transaction, so a whole engine operation commits or rolls back together.

use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::error::{RewardError, RewardResult};
use crate::gacha::ItemCatalog;
use crate::progression::Reward;
use crate::settlement::TaskStatus;
use crate::{
    ChapterProgress, DailyMission, DailyMissionProgress, GachaItem, GachaPull, Problem,
    ProblemAttempt, RewardEvent, StoryChapter, Student, StudentItem, Task, TaskAssignment,
};
use crate::{
    chapter_progress, daily_mission, daily_mission_progress, gacha_item, gacha_pull, problem,
    problem_attempt, reward_event, story_chapter, student, student_item, task, task_assignment,
};

pub trait RewardStore {
    // -------------------- Student ledger --------------------

    fn student(&self, student_id: &str) -> Option<Student>;

    /// Relative credit (`balance = balance + delta`) of xp, coins and gems.
    /// Returns the row after the credit; level is left untouched.
    fn credit(&mut self, student_id: &str, reward: Reward) -> RewardResult<Student>;

    /// Conditional debit: `coins = coins - amount WHERE coins >= amount`.
    /// Returns false (and changes nothing) when the balance is too small.
    fn try_debit_coins(&mut self, student_id: &str, amount: u32) -> RewardResult<bool>;

    /// Writes `level` only if it is above the stored level. Returns whether it wrote.
    fn raise_level(&mut self, student_id: &str, level: u32) -> RewardResult<bool>;

    /// Stamps a claimed login only if `last_login_at` still equals `previous`.
    fn record_login(
        &mut self,
        student_id: &str,
        previous: Option<Timestamp>,
        streak: u32,
        now: Timestamp,
    ) -> RewardResult<bool>;

    fn append_reward_event(&mut self, event: RewardEvent);

    // -------------------- Problems --------------------

    fn problem(&self, problem_id: u64) -> Option<Problem>;

    fn append_problem_attempt(&mut self, attempt: ProblemAttempt);

    // -------------------- Items --------------------

    fn gacha_items(&self, catalog: ItemCatalog) -> Vec<GachaItem>;

    fn gacha_item(&self, item_id: u64) -> Option<GachaItem>;

    fn student_items(&self, student_id: &str) -> Vec<StudentItem>;

    /// Inserts an ownership row, or bumps `copies` on the existing one
    fn grant_item(&mut self, student_id: &str, item_id: u64, now: Timestamp) -> StudentItem;

    fn update_student_item(&mut self, item: StudentItem);

    fn append_gacha_pull(&mut self, pull: GachaPull);

    // -------------------- Missions --------------------

    fn missions(&self) -> Vec<DailyMission>;

    fn mission_progress(&self, student_id: &str, mission_id: u64, day: u32)
        -> Option<DailyMissionProgress>;

    /// Inserts when `progress.id == 0`, otherwise updates in place
    fn save_mission_progress(&mut self, progress: DailyMissionProgress) -> DailyMissionProgress;

    // -------------------- Tasks & chapters --------------------

    fn task(&self, task_id: u64) -> Option<Task>;

    fn task_assignment(&self, student_id: &str, task_id: u64) -> Option<TaskAssignment>;

    fn insert_task_assignment(&mut self, assignment: TaskAssignment) -> TaskAssignment;

    /// Moves an assignment to `to` only if its status is one of `from`
    fn transition_task(
        &mut self,
        assignment_id: u64,
        from: &[TaskStatus],
        to: TaskStatus,
        now: Timestamp,
    ) -> RewardResult<bool>;

    fn chapter(&self, chapter_id: u64) -> Option<StoryChapter>;

    fn chapter_progress(&self, student_id: &str, chapter_id: u64) -> Option<ChapterProgress>;

    /// Marks a chapter completed unless it already is. Returns whether it did.
    fn complete_chapter_once(&mut self, student_id: &str, chapter_id: u64, now: Timestamp) -> bool;
}

// ==================== SPACETIMEDB STORE ====================

/// Store backed by the module's tables, scoped to one reducer transaction
pub struct DbStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> DbStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }

    fn student_row(&self, student_id: &str) -> RewardResult<Student> {
        self.student(student_id)
            .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))
    }
}

impl RewardStore for DbStore<'_> {
    fn student(&self, student_id: &str) -> Option<Student> {
        self.ctx.db.student().id().find(student_id.to_string())
    }

    fn credit(&mut self, student_id: &str, reward: Reward) -> RewardResult<Student> {
        let mut row = self.student_row(student_id)?;
        row.xp = row.xp.saturating_add(reward.xp);
        row.coins = row.coins.saturating_add(reward.coins);
        row.gems = row.gems.saturating_add(reward.gems);
        Ok(self.ctx.db.student().id().update(row))
    }

    fn try_debit_coins(&mut self, student_id: &str, amount: u32) -> RewardResult<bool> {
        let mut row = self.student_row(student_id)?;
        match row.coins.checked_sub(amount) {
            Some(remaining) => {
                row.coins = remaining;
                self.ctx.db.student().id().update(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn raise_level(&mut self, student_id: &str, level: u32) -> RewardResult<bool> {
        let mut row = self.student_row(student_id)?;
        if level <= row.level {
            return Ok(false);
        }
        row.level = level;
        self.ctx.db.student().id().update(row);
        Ok(true)
    }

    fn record_login(
        &mut self,
        student_id: &str,
        previous: Option<Timestamp>,
        streak: u32,
        now: Timestamp,
    ) -> RewardResult<bool> {
        let mut row = self.student_row(student_id)?;
        if row.last_login_at != previous {
            return Ok(false);
        }
        row.login_streak = streak;
        row.last_login_at = Some(now);
        self.ctx.db.student().id().update(row);
        Ok(true)
    }

    fn append_reward_event(&mut self, event: RewardEvent) {
        self.ctx.db.reward_event().insert(event);
    }

    fn problem(&self, problem_id: u64) -> Option<Problem> {
        self.ctx.db.problem().id().find(problem_id)
    }

    fn append_problem_attempt(&mut self, attempt: ProblemAttempt) {
        self.ctx.db.problem_attempt().insert(attempt);
    }

    fn gacha_items(&self, catalog: ItemCatalog) -> Vec<GachaItem> {
        self.ctx.db.gacha_item()
            .iter()
            .filter(|item| item.catalog == catalog)
            .collect()
    }

    fn gacha_item(&self, item_id: u64) -> Option<GachaItem> {
        self.ctx.db.gacha_item().id().find(item_id)
    }

    fn student_items(&self, student_id: &str) -> Vec<StudentItem> {
        self.ctx.db.student_item()
            .student_id()
            .filter(&student_id.to_string())
            .collect()
    }

    fn grant_item(&mut self, student_id: &str, item_id: u64, now: Timestamp) -> StudentItem {
        let existing = self.student_items(student_id)
            .into_iter()
            .find(|owned| owned.item_id == item_id);

        match existing {
            Some(mut owned) => {
                owned.copies = owned.copies.saturating_add(1);
                self.ctx.db.student_item().id().update(owned)
            }
            None => self.ctx.db.student_item().insert(StudentItem {
                id: 0, // auto_inc
                student_id: student_id.to_string(),
                item_id,
                copies: 1,
                is_equipped: false,
                character_id: None,
                acquired_at: now,
            }),
        }
    }

    fn update_student_item(&mut self, item: StudentItem) {
        self.ctx.db.student_item().id().update(item);
    }

    fn append_gacha_pull(&mut self, pull: GachaPull) {
        self.ctx.db.gacha_pull().insert(pull);
    }

    fn missions(&self) -> Vec<DailyMission> {
        self.ctx.db.daily_mission().iter().collect()
    }

    fn mission_progress(&self, student_id: &str, mission_id: u64, day: u32)
        -> Option<DailyMissionProgress>
    {
        self.ctx.db.daily_mission_progress()
            .student_id()
            .filter(&student_id.to_string())
            .find(|p| p.mission_id == mission_id && p.day == day)
    }

    fn save_mission_progress(&mut self, progress: DailyMissionProgress) -> DailyMissionProgress {
        if progress.id == 0 {
            self.ctx.db.daily_mission_progress().insert(progress)
        } else {
            self.ctx.db.daily_mission_progress().id().update(progress)
        }
    }

    fn task(&self, task_id: u64) -> Option<Task> {
        self.ctx.db.task().id().find(task_id)
    }

    fn task_assignment(&self, student_id: &str, task_id: u64) -> Option<TaskAssignment> {
        self.ctx.db.task_assignment()
            .student_id()
            .filter(&student_id.to_string())
            .find(|a| a.task_id == task_id)
    }

    fn insert_task_assignment(&mut self, assignment: TaskAssignment) -> TaskAssignment {
        self.ctx.db.task_assignment().insert(assignment)
    }

    fn transition_task(
        &mut self,
        assignment_id: u64,
        from: &[TaskStatus],
        to: TaskStatus,
        now: Timestamp,
    ) -> RewardResult<bool> {
        let mut assignment = self.ctx.db.task_assignment()
            .id()
            .find(assignment_id)
            .ok_or_else(|| RewardError::InvalidTransition(format!("assignment {} missing", assignment_id)))?;
        if !from.contains(&assignment.status) {
            return Ok(false);
        }
        if to == TaskStatus::Completed {
            assignment.completed_at = Some(now);
        }
        assignment.status = to;
        self.ctx.db.task_assignment().id().update(assignment);
        Ok(true)
    }

    fn chapter(&self, chapter_id: u64) -> Option<StoryChapter> {
        self.ctx.db.story_chapter().id().find(chapter_id)
    }

    fn chapter_progress(&self, student_id: &str, chapter_id: u64) -> Option<ChapterProgress> {
        self.ctx.db.chapter_progress()
            .student_id()
            .filter(&student_id.to_string())
            .find(|p| p.chapter_id == chapter_id)
    }

    fn complete_chapter_once(&mut self, student_id: &str, chapter_id: u64, now: Timestamp) -> bool {
        match self.chapter_progress(student_id, chapter_id) {
            Some(progress) if progress.is_completed => false,
            Some(mut progress) => {
                progress.is_completed = true;
                progress.completed_at = Some(now);
                self.ctx.db.chapter_progress().id().update(progress);
                true
            }
            None => {
                self.ctx.db.chapter_progress().insert(ChapterProgress {
                    id: 0, // auto_inc
                    student_id: student_id.to_string(),
                    chapter_id,
                    is_completed: true,
                    completed_at: Some(now),
                });
                true
            }
        }
    }
}
