// One-time reward settlement for answered problems, teacher tasks and story
// chapters. Fixed rewards are only paid on the transition into "completed";
// the transition itself is a conditional store write, so a repeat is refused
// instead of paid twice.

use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::{RewardError, RewardResult};
use crate::missions::{increment_mission_progress, MissionType, MissionUpdate};
use crate::progression::{settle_reward, short_id, LevelChange, Payout, Reward, RewardSource};
use crate::store::RewardStore;
use crate::{ProblemAttempt, TaskAssignment};

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

// -------------------- Problems --------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub xp_earned: u32,
    pub coins_earned: u32,
    pub correct_answer: String,
    pub level: LevelChange,
    pub missions: Vec<MissionUpdate>,
}

fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().eq_ignore_ascii_case(expected.trim())
}

/// Grade an answer, pay the problem's reward if correct, and log the attempt
pub fn submit_problem_answer<S: RewardStore + ?Sized>(
    store: &mut S,
    student_id: &str,
    problem_id: u64,
    answer: &str,
    time_spent_secs: u32,
    now: Timestamp,
) -> RewardResult<AnswerOutcome> {
    let student = store.student(student_id)
        .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))?;
    let problem = store.problem(problem_id)
        .ok_or(RewardError::ProblemNotFound(problem_id))?;

    let is_correct = answers_match(answer, &problem.answer);
    let (level, missions, reward) = if is_correct {
        let reward = Reward::new(problem.xp_reward, problem.coin_reward, 0);
        let payout = settle_reward(store, student_id, RewardSource::ProblemAnswer, Some(problem_id), reward, now)?;
        let missions = increment_mission_progress(store, student_id, MissionType::SolveProblems, 1, now)?;
        (payout.level, missions, reward)
    } else {
        (LevelChange::unchanged(student.level), Vec::new(), Reward::default())
    };

    store.append_problem_attempt(ProblemAttempt {
        id: 0, // auto_inc
        student_id: student_id.to_string(),
        problem_id,
        answer: answer.to_string(),
        correct_answer: problem.answer.clone(),
        is_correct,
        time_spent_secs,
        xp_earned: reward.xp,
        coins_earned: reward.coins,
        answered_at: now,
    });

    log::info!("[ANSWER] student={} problem={} correct={} xp={} coins={} secs={}",
        short_id(student_id), problem_id, is_correct, reward.xp, reward.coins, time_spent_secs);

    Ok(AnswerOutcome {
        is_correct,
        xp_earned: reward.xp,
        coins_earned: reward.coins,
        correct_answer: problem.answer,
        level,
        missions,
    })
}

// -------------------- Tasks --------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payout: Payout,
    pub missions: Vec<MissionUpdate>,
}

/// Assign a task to a student. Assigning twice keeps the existing assignment.
pub fn assign_task<S: RewardStore + ?Sized>(store: &mut S, task_id: u64, student_id: &str, now: Timestamp)
    -> RewardResult<TaskAssignment>
{
    if store.task(task_id).is_none() {
        return Err(RewardError::TaskNotFound(task_id));
    }
    if store.student(student_id).is_none() {
        return Err(RewardError::StudentNotFound(student_id.to_string()));
    }
    if let Some(existing) = store.task_assignment(student_id, task_id) {
        return Ok(existing);
    }
    Ok(store.insert_task_assignment(TaskAssignment {
        id: 0, // auto_inc
        task_id,
        student_id: student_id.to_string(),
        status: TaskStatus::Pending,
        assigned_at: now,
        completed_at: None,
    }))
}

/// pending -> in_progress
pub fn start_task<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, task_id: u64, now: Timestamp)
    -> RewardResult<()>
{
    let assignment = store.task_assignment(student_id, task_id)
        .ok_or(RewardError::TaskNotFound(task_id))?;
    match assignment.status {
        TaskStatus::Pending => {}
        TaskStatus::InProgress => return Ok(()),
        TaskStatus::Completed => return Err(RewardError::AlreadyCompleted),
    }
    if !store.transition_task(assignment.id, &[TaskStatus::Pending], TaskStatus::InProgress, now)? {
        return Err(RewardError::InvalidTransition(format!("task {} is no longer pending", task_id)));
    }
    Ok(())
}

/// pending/in_progress -> completed, paying the task's xp, coins and gems once
pub fn complete_task<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, task_id: u64, now: Timestamp)
    -> RewardResult<Settlement>
{
    if store.student(student_id).is_none() {
        return Err(RewardError::StudentNotFound(student_id.to_string()));
    }
    // A task the student was never assigned is invisible to them
    let task = store.task(task_id).ok_or(RewardError::TaskNotFound(task_id))?;
    let assignment = store.task_assignment(student_id, task_id)
        .ok_or(RewardError::TaskNotFound(task_id))?;
    if assignment.status == TaskStatus::Completed {
        return Err(RewardError::AlreadyCompleted);
    }

    let open = [TaskStatus::Pending, TaskStatus::InProgress];
    if !store.transition_task(assignment.id, &open, TaskStatus::Completed, now)? {
        return Err(RewardError::AlreadyCompleted);
    }

    let reward = Reward::new(task.xp_reward, task.coin_reward, task.gem_reward);
    let payout = settle_reward(store, student_id, RewardSource::Task, Some(task_id), reward, now)?;
    let missions = increment_mission_progress(store, student_id, MissionType::CompleteTask, 1, now)?;

    log::info!("[TASK] complete student={} task={} \"{}\" xp={} coins={} gems={}",
        short_id(student_id), task_id, task.title, reward.xp, reward.coins, reward.gems);

    Ok(Settlement { payout, missions })
}

// -------------------- Chapters --------------------

/// Complete a story chapter once, if the student's level unlocks it
pub fn complete_chapter<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, chapter_id: u64, now: Timestamp)
    -> RewardResult<Settlement>
{
    let student = store.student(student_id)
        .ok_or_else(|| RewardError::StudentNotFound(student_id.to_string()))?;
    let chapter = store.chapter(chapter_id).ok_or(RewardError::ChapterNotFound(chapter_id))?;

    if student.level < chapter.required_level {
        return Err(RewardError::LevelTooLow { required: chapter.required_level, current: student.level });
    }
    if !store.complete_chapter_once(student_id, chapter_id, now) {
        log::warn!("[CHAPTER] repeat completion refused student={} chapter={}", short_id(student_id), chapter_id);
        return Err(RewardError::AlreadyCompleted);
    }

    let reward = Reward::new(chapter.xp_reward, chapter.coin_reward, 0);
    let payout = settle_reward(store, student_id, RewardSource::Chapter, Some(chapter_id), reward, now)?;
    let missions = increment_mission_progress(store, student_id, MissionType::CompleteChapter, 1, now)?;

    log::info!("[CHAPTER] complete student={} chapter={} \"{}\" xp={} coins={}",
        short_id(student_id), chapter_id, chapter.title, reward.xp, reward.coins);

    Ok(Settlement { payout, missions })
}
