use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp,
    table, reducer, view,
};

mod calendar;
mod error;
mod gacha;
mod missions;
mod progression;
mod settlement;
mod store;
mod streak;

// Admin reducers that load content (items, missions, tasks, chapters, problems)
mod catalog;

#[cfg(test)]
mod memory;

pub use error::RewardError;
pub use gacha::{ItemCatalog, Rarity};
pub use missions::MissionType;
pub use progression::RewardSource;
pub use settlement::TaskStatus;

use progression::short_id;
use store::DbStore;

// ==================== CONSTANTS ====================

/// Longest display name we keep (names come from the client)
const MAX_NAME_LEN: usize = 32;

// ==================== HELPER FUNCTIONS ====================

/// Get the student bound to the sender's session
/// This abstracts the session lookup pattern used throughout reducers
fn get_student(ctx: &ReducerContext) -> Result<Student, String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found".to_string())?;

    ctx.db.student()
        .id()
        .find(&session.student_id)
        .ok_or_else(|| RewardError::StudentNotFound(session.student_id.clone()).into())
}

/// Only authorized workers (module owner, auth gateway, admin tools) may call admin reducers
fn require_worker(ctx: &ReducerContext, action: &str) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized {} attempt by {}", action, ctx.sender);
        return Err("Unauthorized".to_string());
    }
    Ok(())
}

/// Cache the latest login-bonus quote so the client can render it
fn save_login_offer(ctx: &ReducerContext, student_id: &str, quote: &streak::LoginBonusQuote) {
    let offer = LoginBonusOffer {
        student_id: student_id.to_string(),
        eligible: quote.eligible,
        streak: quote.streak,
        coins: quote.reward.coins,
        xp: quote.reward.xp,
        milestone: quote.milestone,
        checked_at: ctx.timestamp,
    };
    if ctx.db.login_bonus_offer().student_id().find(student_id.to_string()).is_some() {
        ctx.db.login_bonus_offer().student_id().update(offer);
    } else {
        ctx.db.login_bonus_offer().insert(offer);
    }
}

fn clean_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LEN).collect()
}

// ==================== TABLES ====================

/// Session links ephemeral connection to stable student
/// PRIVATE: Links connection identity to student ID (no PII)
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable student ID - verified by the auth gateway
    pub student_id: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Identities allowed to call admin reducers
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Student profile and reward balances
/// PRIVATE: Clients access via my_student view
#[table(name = student)]
#[derive(Clone, Debug)]
pub struct Student {
    #[primary_key]
    pub id: String,

    pub name: String,

    /// Avatar key chosen in the client
    pub avatar: Option<String>,

    /// Cached: always floor(xp / 100) + 1, recomputed on every xp credit
    pub level: u32,

    /// Total XP earned (never decreases)
    pub xp: u32,

    /// Spendable currency
    pub coins: u32,

    /// Premium currency, earned from tasks
    pub gems: u32,

    /// Consecutive calendar days with a claimed login bonus
    pub login_streak: u32,

    /// Last claimed login bonus (None = never claimed)
    pub last_login_at: Option<Timestamp>,

    pub created_at: Timestamp,
}

/// Append-only payout history (audit + analytics, never used for balances)
#[table(name = reward_event)]
#[derive(Clone, Debug)]
pub struct RewardEvent {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    pub source: RewardSource,

    /// Problem / item / mission / task / chapter that paid out
    pub source_id: Option<u64>,

    pub xp: u32,
    pub coins: u32,
    pub gems: u32,

    pub level_before: u32,
    pub level_after: u32,

    pub created_at: Timestamp,
}

/// Practice problem
#[table(name = problem, public)]
#[derive(Clone, Debug)]
pub struct Problem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Prompt shown to the student (e.g. "3 + 4")
    pub question: String,

    /// Expected answer, compared trimmed and case-insensitive
    pub answer: String,

    /// Skill tag for reporting (e.g. "addition")
    pub skill: Option<String>,

    pub xp_reward: u32,
    pub coin_reward: u32,
}

/// Append-only answer history
#[table(name = problem_attempt)]
#[derive(Clone, Debug)]
pub struct ProblemAttempt {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    #[index(btree)]
    pub problem_id: u64,

    pub answer: String,

    /// Expected answer, shown back to the student after grading
    pub correct_answer: String,

    pub is_correct: bool,
    pub time_spent_secs: u32,
    pub xp_earned: u32,
    pub coins_earned: u32,
    pub answered_at: Timestamp,
}

/// Catalog entry that can be drawn from the gacha
#[table(name = gacha_item, public)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GachaItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,

    /// Which machine the item drops from (each has its own odds)
    pub catalog: ItemCatalog,

    pub rarity: Rarity,

    pub image_url: Option<String>,
}

/// Ownership + equip state of one item for one student
#[table(name = student_item)]
#[derive(Clone, Debug)]
pub struct StudentItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    #[index(btree)]
    pub item_id: u64,

    /// Times drawn (duplicates add a copy instead of a row)
    pub copies: u32,

    /// At most one item per student is worn at a time
    pub is_equipped: bool,

    /// Owned character item this is worn on, if any
    pub character_id: Option<u64>,

    pub acquired_at: Timestamp,
}

/// Append-only draw history
#[table(name = gacha_pull)]
#[derive(Clone, Debug)]
pub struct GachaPull {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    pub item_id: u64,
    pub catalog: ItemCatalog,
    pub rarity: Rarity,
    pub is_duplicate: bool,
    pub cost: u32,
    pub bonus_coins: u32,
    pub pulled_at: Timestamp,
}

/// Daily goal (e.g. "solve 3 problems")
#[table(name = daily_mission, public)]
#[derive(Clone, Debug)]
pub struct DailyMission {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub title: String,

    /// Which gameplay event counts toward the goal
    pub mission_type: MissionType,

    pub target_count: u32,
    pub xp_reward: u32,
    pub coin_reward: u32,

    /// Inactive missions stop counting but keep their history
    pub is_active: bool,
}

/// Progress of one student on one mission for one calendar day
/// No reset job: a missing row for today means a fresh start
#[table(name = daily_mission_progress)]
#[derive(Clone, Debug)]
pub struct DailyMissionProgress {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    #[index(btree)]
    pub mission_id: u64,

    /// Calendar day as YYYYMMDD (day boundary = calendar::DAY_RESET_HOUR_UTC)
    pub day: u32,

    pub current_count: u32,

    /// Set once, when current_count first reaches the target
    pub is_completed: bool,
    pub completed_at: Option<Timestamp>,
}

/// Teacher-authored task
#[table(name = task, public)]
#[derive(Clone, Debug)]
pub struct Task {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub title: String,
    pub description: Option<String>,
    pub xp_reward: u32,
    pub coin_reward: u32,
    pub gem_reward: u32,
}

/// A task assigned to one student
#[table(name = task_assignment)]
#[derive(Clone, Debug)]
pub struct TaskAssignment {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub task_id: u64,

    #[index(btree)]
    pub student_id: String,

    pub status: TaskStatus,
    pub assigned_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Story chapter, unlocked by level
#[table(name = story_chapter, public)]
#[derive(Clone, Debug)]
pub struct StoryChapter {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub title: String,

    /// Reading order
    pub sequence: u32,

    pub required_level: u32,
    pub xp_reward: u32,
    pub coin_reward: u32,
}

/// Chapter completion for one student
#[table(name = chapter_progress)]
#[derive(Clone, Debug)]
pub struct ChapterProgress {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub student_id: String,

    #[index(btree)]
    pub chapter_id: u64,

    pub is_completed: bool,
    pub completed_at: Option<Timestamp>,
}

/// Latest login-bonus preview per student (display only, not part of the ledger)
#[table(name = login_bonus_offer)]
#[derive(Clone, Debug)]
pub struct LoginBonusOffer {
    #[primary_key]
    pub student_id: String,

    pub eligible: bool,

    /// Streak after claiming (current streak when not eligible)
    pub streak: u32,

    pub coins: u32,
    pub xp: u32,

    /// 7-day milestone badge
    pub milestone: bool,

    pub checked_at: Timestamp,
}

// ==================== VIEWS ====================
// Private per-student tables are read through these, keyed on the caller's session

#[view(name = my_student, public)]
fn my_student(ctx: &spacetimedb::ViewContext) -> Option<Student> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.student().id().find(&session.student_id)
}

#[view(name = my_items, public)]
fn my_items(ctx: &spacetimedb::ViewContext) -> Vec<StudentItem> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.student_item().student_id().filter(&session.student_id).collect()
}

#[view(name = my_gacha_pulls, public)]
fn my_gacha_pulls(ctx: &spacetimedb::ViewContext) -> Vec<GachaPull> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.gacha_pull().student_id().filter(&session.student_id).collect()
}

/// Graded answers: correctness, expected answer and what each paid
#[view(name = my_problem_attempts, public)]
fn my_problem_attempts(ctx: &spacetimedb::ViewContext) -> Vec<ProblemAttempt> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.problem_attempt().student_id().filter(&session.student_id).collect()
}

/// Every payout with level before/after, for reward and level-up toasts
#[view(name = my_reward_events, public)]
fn my_reward_events(ctx: &spacetimedb::ViewContext) -> Vec<RewardEvent> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.reward_event().student_id().filter(&session.student_id).collect()
}

/// All of the caller's mission rows; clients pick today's by `day`
#[view(name = my_mission_progress, public)]
fn my_mission_progress(ctx: &spacetimedb::ViewContext) -> Vec<DailyMissionProgress> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.daily_mission_progress().student_id().filter(&session.student_id).collect()
}

#[view(name = my_task_assignments, public)]
fn my_task_assignments(ctx: &spacetimedb::ViewContext) -> Vec<TaskAssignment> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.task_assignment().student_id().filter(&session.student_id).collect()
}

#[view(name = my_chapter_progress, public)]
fn my_chapter_progress(ctx: &spacetimedb::ViewContext) -> Vec<ChapterProgress> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.chapter_progress().student_id().filter(&session.student_id).collect()
}

#[view(name = my_login_bonus_offer, public)]
fn my_login_bonus_offer(ctx: &spacetimedb::ViewContext) -> Option<LoginBonusOffer> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.login_bonus_offer().student_id().find(&session.student_id)
}

// ==================== REDUCERS ====================

/// Create a verified session for a client identity
/// Called by the auth gateway AFTER it has verified the student's token
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, student_id: String) -> Result<(), String> {
    require_worker(ctx, "create_session")?;

    let identity = Identity::from_hex(&client_identity)
        .map_err(|e| format!("Invalid identity hex string: {}", e))?;

    // Delete stale sessions: same student (unclean reconnect) OR same connection_id (prevents PK conflict)
    let stale_sessions: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.student_id == student_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        student_id: student_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created student:{} ws:{}", short_id(&student_id), short_id(&client_identity));
    Ok(())
}

/// Student opens the app. Auto-provisions the student record on first access.
#[reducer]
pub fn connect(ctx: &ReducerContext, name: String, avatar: Option<String>) -> Result<(), String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("Session not found - verify with gateway first".to_string())?;
    let student_id = session.student_id;
    let name = clean_name(&name);

    if let Some(mut existing) = ctx.db.student().id().find(&student_id) {
        existing.name = name;
        if avatar.is_some() {
            existing.avatar = avatar;
        }
        log::info!("[CONNECT] student=\"{}\" student_id={} type=returning level={} xp={} coins={} streak={}",
            existing.name, short_id(&student_id), existing.level, existing.xp, existing.coins, existing.login_streak);
        ctx.db.student().id().update(existing);
    } else {
        let student = Student {
            id: student_id.clone(),
            name,
            avatar,
            level: 1,
            xp: 0,
            coins: 0,
            gems: 0,
            login_streak: 0,
            last_login_at: None,
            created_at: ctx.timestamp,
        };
        log::info!("[CONNECT] student=\"{}\" student_id={} type=new", student.name, short_id(&student_id));
        ctx.db.student().insert(student);
    }
    Ok(())
}

#[reducer]
pub fn submit_problem_answer(ctx: &ReducerContext, problem_id: u64, answer: String, time_spent_secs: u32) -> Result<(), String> {
    let student = get_student(ctx)?;
    let mut store = DbStore::new(ctx);
    settlement::submit_problem_answer(
        &mut store, &student.id, problem_id, &answer, time_spent_secs, ctx.timestamp,
    )?;
    Ok(())
}

/// Preview today's login bonus without paying it (result lands in login_bonus_offer)
#[reducer]
pub fn check_login_bonus(ctx: &ReducerContext) -> Result<(), String> {
    let student = get_student(ctx)?;
    let quote = streak::check_login_bonus(&DbStore::new(ctx), &student.id, ctx.timestamp)?;
    save_login_offer(ctx, &student.id, &quote);
    Ok(())
}

#[reducer]
pub fn claim_login_bonus(ctx: &ReducerContext) -> Result<(), String> {
    let student = get_student(ctx)?;
    let mut store = DbStore::new(ctx);
    let claim = streak::claim_login_bonus(&mut store, &student.id, ctx.timestamp)?;

    // Offer now reads "claimed" for the rest of the day
    let claimed = streak::LoginBonusQuote {
        eligible: false,
        streak: claim.streak,
        reward: progression::Reward::default(),
        milestone: claim.milestone,
    };
    save_login_offer(ctx, &student.id, &claimed);
    Ok(())
}

#[reducer]
pub fn roll_gacha(ctx: &ReducerContext, catalog: ItemCatalog) -> Result<(), String> {
    let student = get_student(ctx)?;
    let mut store = DbStore::new(ctx);
    let mut rng = ctx.rng();
    gacha::roll_gacha(&mut store, &mut rng, &student.id, catalog, ctx.timestamp)?;
    Ok(())
}

#[reducer]
pub fn equip_item(ctx: &ReducerContext, item_id: u64, character_id: Option<u64>) -> Result<(), String> {
    let student = get_student(ctx)?;
    gacha::equip_item(&mut DbStore::new(ctx), &student.id, item_id, character_id)?;
    Ok(())
}

#[reducer]
pub fn unequip_item(ctx: &ReducerContext, item_id: u64) -> Result<(), String> {
    let student = get_student(ctx)?;
    gacha::unequip_item(&mut DbStore::new(ctx), &student.id, item_id)?;
    Ok(())
}

/// Teacher assigns a task (through an authorized gateway/admin identity)
#[reducer]
pub fn assign_task(ctx: &ReducerContext, task_id: u64, student_id: String) -> Result<(), String> {
    require_worker(ctx, "assign_task")?;
    let assignment = settlement::assign_task(&mut DbStore::new(ctx), task_id, &student_id, ctx.timestamp)?;
    log::info!("[TASK] assigned task={} student={} assignment={}", task_id, short_id(&student_id), assignment.id);
    Ok(())
}

#[reducer]
pub fn start_task(ctx: &ReducerContext, task_id: u64) -> Result<(), String> {
    let student = get_student(ctx)?;
    settlement::start_task(&mut DbStore::new(ctx), &student.id, task_id, ctx.timestamp)?;
    Ok(())
}

#[reducer]
pub fn complete_task(ctx: &ReducerContext, task_id: u64) -> Result<(), String> {
    let student = get_student(ctx)?;
    settlement::complete_task(&mut DbStore::new(ctx), &student.id, task_id, ctx.timestamp)?;
    Ok(())
}

#[reducer]
pub fn complete_chapter(ctx: &ReducerContext, chapter_id: u64) -> Result<(), String> {
    let student = get_student(ctx)?;
    settlement::complete_chapter(&mut DbStore::new(ctx), &student.id, chapter_id, ctx.timestamp)?;
    Ok(())
}

/// Turn a daily mission on or off without losing its history
#[reducer]
pub fn set_mission_active(ctx: &ReducerContext, mission_id: u64, is_active: bool) -> Result<(), String> {
    require_worker(ctx, "set_mission_active")?;
    let mut mission = ctx.db.daily_mission()
        .id()
        .find(mission_id)
        .ok_or(format!("Mission {} not found", mission_id))?;
    mission.is_active = is_active;
    ctx.db.daily_mission().id().update(mission);
    log::info!("[MISSION] mission={} active={}", mission_id, is_active);
    Ok(())
}

/// Initialize module
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    log::info!("Star Quest module initialized successfully");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  Maya  "), "Maya");
        assert_eq!(clean_name(&"x".repeat(50)).len(), MAX_NAME_LEN);
        assert_eq!(clean_name("🦊 Fox"), "🦊 Fox");
    }
}
