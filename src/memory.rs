// In-memory RewardStore for unit tests. `&mut self` serializes every call,
// which stands in for the single reducer transaction of the real store.

use std::collections::HashMap;

use spacetimedb::Timestamp;

use crate::calendar::test_time::school_day;
use crate::error::{RewardError, RewardResult};
use crate::gacha::{ItemCatalog, Rarity};
use crate::missions::MissionType;
use crate::progression::{level_for_xp, Reward};
use crate::settlement::TaskStatus;
use crate::store::RewardStore;
use crate::{
    ChapterProgress, DailyMission, DailyMissionProgress, GachaItem, GachaPull, Problem,
    ProblemAttempt, RewardEvent, StoryChapter, Student, StudentItem, Task, TaskAssignment,
};

pub struct MemoryStore {
    pub now: Timestamp,
    next_id: u64,
    pub students: HashMap<String, Student>,
    pub reward_events: Vec<RewardEvent>,
    pub problems: Vec<Problem>,
    pub attempts: Vec<ProblemAttempt>,
    pub items: Vec<GachaItem>,
    pub owned: Vec<StudentItem>,
    pub pulls: Vec<GachaPull>,
    pub mission_rows: Vec<DailyMission>,
    pub mission_progress_rows: Vec<DailyMissionProgress>,
    pub tasks: Vec<Task>,
    pub assignments: Vec<TaskAssignment>,
    pub chapters: Vec<StoryChapter>,
    pub chapter_rows: Vec<ChapterProgress>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            now: school_day(2026, 1, 5),
            next_id: 1,
            students: HashMap::new(),
            reward_events: Vec::new(),
            problems: Vec::new(),
            attempts: Vec::new(),
            items: Vec::new(),
            owned: Vec::new(),
            pulls: Vec::new(),
            mission_rows: Vec::new(),
            mission_progress_rows: Vec::new(),
            tasks: Vec::new(),
            assignments: Vec::new(),
            chapters: Vec::new(),
            chapter_rows: Vec::new(),
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn student_mut(&mut self, student_id: &str) -> RewardResult<&mut Student> {
        self.students
            .get_mut(student_id)
            .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))
    }

    // -------------------- Fixtures --------------------

    pub fn add_student(&mut self, id: &str, xp: u32, coins: u32) {
        self.students.insert(id.to_string(), Student {
            id: id.to_string(),
            name: format!("Student {}", id),
            avatar: None,
            level: level_for_xp(xp),
            xp,
            coins,
            gems: 0,
            login_streak: 0,
            last_login_at: None,
            created_at: self.now,
        });
    }

    pub fn add_item(&mut self, name: &str, rarity: Rarity, catalog: ItemCatalog) -> u64 {
        let id = self.take_id();
        self.items.push(GachaItem { id, name: name.to_string(), catalog, rarity, image_url: None });
        id
    }

    pub fn add_mission(&mut self, title: &str, mission_type: MissionType, target_count: u32, xp_reward: u32, coin_reward: u32) -> u64 {
        let id = self.take_id();
        self.mission_rows.push(DailyMission {
            id,
            title: title.to_string(),
            mission_type,
            target_count,
            xp_reward,
            coin_reward,
            is_active: true,
        });
        id
    }

    pub fn add_problem(&mut self, question: &str, answer: &str, xp_reward: u32, coin_reward: u32) -> u64 {
        let id = self.take_id();
        self.problems.push(Problem {
            id,
            question: question.to_string(),
            answer: answer.to_string(),
            skill: None,
            xp_reward,
            coin_reward,
        });
        id
    }

    pub fn add_task(&mut self, title: &str, xp_reward: u32, coin_reward: u32, gem_reward: u32) -> u64 {
        let id = self.take_id();
        self.tasks.push(Task {
            id,
            title: title.to_string(),
            description: None,
            xp_reward,
            coin_reward,
            gem_reward,
        });
        id
    }

    pub fn add_chapter(&mut self, title: &str, required_level: u32, xp_reward: u32, coin_reward: u32) -> u64 {
        let id = self.take_id();
        let sequence = self.chapters.len() as u32 + 1;
        self.chapters.push(StoryChapter {
            id,
            title: title.to_string(),
            sequence,
            required_level,
            xp_reward,
            coin_reward,
        });
        id
    }
}

impl RewardStore for MemoryStore {
    fn student(&self, student_id: &str) -> Option<Student> {
        self.students.get(student_id).cloned()
    }

    fn credit(&mut self, student_id: &str, reward: Reward) -> RewardResult<Student> {
        let row = self.student_mut(student_id)?;
        row.xp = row.xp.saturating_add(reward.xp);
        row.coins = row.coins.saturating_add(reward.coins);
        row.gems = row.gems.saturating_add(reward.gems);
        Ok(row.clone())
    }

    fn try_debit_coins(&mut self, student_id: &str, amount: u32) -> RewardResult<bool> {
        let row = self.student_mut(student_id)?;
        match row.coins.checked_sub(amount) {
            Some(remaining) => {
                row.coins = remaining;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn raise_level(&mut self, student_id: &str, level: u32) -> RewardResult<bool> {
        let row = self.student_mut(student_id)?;
        if level <= row.level {
            return Ok(false);
        }
        row.level = level;
        Ok(true)
    }

    fn record_login(
        &mut self,
        student_id: &str,
        previous: Option<Timestamp>,
        streak: u32,
        now: Timestamp,
    ) -> RewardResult<bool> {
        let row = self.student_mut(student_id)?;
        if row.last_login_at != previous {
            return Ok(false);
        }
        row.login_streak = streak;
        row.last_login_at = Some(now);
        Ok(true)
    }

    fn append_reward_event(&mut self, mut event: RewardEvent) {
        event.id = self.take_id();
        self.reward_events.push(event);
    }

    fn problem(&self, problem_id: u64) -> Option<Problem> {
        self.problems.iter().find(|p| p.id == problem_id).cloned()
    }

    fn append_problem_attempt(&mut self, mut attempt: ProblemAttempt) {
        attempt.id = self.take_id();
        self.attempts.push(attempt);
    }

    fn gacha_items(&self, catalog: ItemCatalog) -> Vec<GachaItem> {
        self.items.iter().filter(|i| i.catalog == catalog).cloned().collect()
    }

    fn gacha_item(&self, item_id: u64) -> Option<GachaItem> {
        self.items.iter().find(|i| i.id == item_id).cloned()
    }

    fn student_items(&self, student_id: &str) -> Vec<StudentItem> {
        self.owned.iter().filter(|o| o.student_id == student_id).cloned().collect()
    }

    fn grant_item(&mut self, student_id: &str, item_id: u64, now: Timestamp) -> StudentItem {
        if let Some(owned) = self.owned.iter_mut().find(|o| o.student_id == student_id && o.item_id == item_id) {
            owned.copies = owned.copies.saturating_add(1);
            return owned.clone();
        }
        let row = StudentItem {
            id: self.take_id(),
            student_id: student_id.to_string(),
            item_id,
            copies: 1,
            is_equipped: false,
            character_id: None,
            acquired_at: now,
        };
        self.owned.push(row.clone());
        row
    }

    fn update_student_item(&mut self, item: StudentItem) {
        if let Some(row) = self.owned.iter_mut().find(|o| o.id == item.id) {
            *row = item;
        }
    }

    fn append_gacha_pull(&mut self, mut pull: GachaPull) {
        pull.id = self.take_id();
        self.pulls.push(pull);
    }

    fn missions(&self) -> Vec<DailyMission> {
        self.mission_rows.clone()
    }

    fn mission_progress(&self, student_id: &str, mission_id: u64, day: u32) -> Option<DailyMissionProgress> {
        self.mission_progress_rows
            .iter()
            .find(|p| p.student_id == student_id && p.mission_id == mission_id && p.day == day)
            .cloned()
    }

    fn save_mission_progress(&mut self, mut progress: DailyMissionProgress) -> DailyMissionProgress {
        if progress.id == 0 {
            progress.id = self.take_id();
            self.mission_progress_rows.push(progress.clone());
        } else if let Some(row) = self.mission_progress_rows.iter_mut().find(|p| p.id == progress.id) {
            *row = progress.clone();
        }
        progress
    }

    fn task(&self, task_id: u64) -> Option<Task> {
        self.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    fn task_assignment(&self, student_id: &str, task_id: u64) -> Option<TaskAssignment> {
        self.assignments
            .iter()
            .find(|a| a.student_id == student_id && a.task_id == task_id)
            .cloned()
    }

    fn insert_task_assignment(&mut self, mut assignment: TaskAssignment) -> TaskAssignment {
        assignment.id = self.take_id();
        self.assignments.push(assignment.clone());
        assignment
    }

    fn transition_task(
        &mut self,
        assignment_id: u64,
        from: &[TaskStatus],
        to: TaskStatus,
        now: Timestamp,
    ) -> RewardResult<bool> {
        let assignment = self.assignments
            .iter_mut()
            .find(|a| a.id == assignment_id)
            .ok_or_else(|| RewardError::InvalidTransition(format!("assignment {} missing", assignment_id)))?;
        if !from.contains(&assignment.status) {
            return Ok(false);
        }
        if to == TaskStatus::Completed {
            assignment.completed_at = Some(now);
        }
        assignment.status = to;
        Ok(true)
    }

    fn chapter(&self, chapter_id: u64) -> Option<StoryChapter> {
        self.chapters.iter().find(|c| c.id == chapter_id).cloned()
    }

    fn chapter_progress(&self, student_id: &str, chapter_id: u64) -> Option<ChapterProgress> {
        self.chapter_rows
            .iter()
            .find(|p| p.student_id == student_id && p.chapter_id == chapter_id)
            .cloned()
    }

    fn complete_chapter_once(&mut self, student_id: &str, chapter_id: u64, now: Timestamp) -> bool {
        if let Some(row) = self.chapter_rows
            .iter_mut()
            .find(|p| p.student_id == student_id && p.chapter_id == chapter_id)
        {
            if row.is_completed {
                return false;
            }
            row.is_completed = true;
            row.completed_at = Some(now);
            return true;
        }
        let id = self.take_id();
        self.chapter_rows.push(ChapterProgress {
            id,
            student_id: student_id.to_string(),
            chapter_id,
            is_completed: true,
            completed_at: Some(now),
        });
        true
    }
}
