// Content import reducers for the admin panel.
// Each accepts a JSON array (camelCase keys, as the TypeScript SDK exports them)
// and appends rows. Any bad entry fails the whole reducer, so nothing is half-loaded.

use spacetimedb::{reducer, ReducerContext, Table};
use serde_json::Value;

use crate::gacha::{ItemCatalog, Rarity};
use crate::missions::MissionType;
use crate::{DailyMission, GachaItem, Problem, StoryChapter, Task};
use crate::{daily_mission, gacha_item, problem, story_chapter, task};

fn parse_array(json_data: &str, what: &str) -> Result<Vec<Value>, String> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    match data {
        Value::Array(entries) => Ok(entries),
        _ => Err(format!("Expected JSON array of {}", what)),
    }
}

fn req_str(val: &Value, key: &str, label: &str, i: usize) -> Result<String, String> {
    val.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(format!("{} {}: missing {}", label, i, key))
}

fn opt_str(val: &Value, key: &str) -> Option<String> {
    val.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Missing counts default to 0; present ones must fit in u32
fn u32_or_zero(val: &Value, key: &str, label: &str, i: usize) -> Result<u32, String> {
    match val.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v.as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(format!("{} {}: invalid {}", label, i, key)),
    }
}

pub fn parse_gacha_items(json_data: &str) -> Result<Vec<GachaItem>, String> {
    parse_array(json_data, "gacha items")?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let rarity = req_str(v, "rarity", "Item", i)?;
            let catalog = opt_str(v, "catalog").unwrap_or_else(|| "gacha".to_string());
            let catalog = ItemCatalog::parse(&catalog)
                .ok_or(format!("Item {}: unknown catalog {}", i, catalog))?;
            let rarity = Rarity::parse(&rarity)
                .ok_or(format!("Item {}: unknown rarity {}", i, rarity))?;
            // A tier with no weight in this catalog would never be drawn
            if catalog.odds().weight(rarity) == 0 {
                return Err(format!("Item {}: {:?} catalog has no {} tier", i, catalog, rarity.name()));
            }
            Ok(GachaItem {
                id: 0, // auto_inc
                name: req_str(v, "name", "Item", i)?,
                catalog,
                rarity,
                image_url: opt_str(v, "imageUrl"),
            })
        })
        .collect()
}

pub fn parse_daily_missions(json_data: &str) -> Result<Vec<DailyMission>, String> {
    parse_array(json_data, "daily missions")?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let kind = req_str(v, "missionType", "Mission", i)?;
            let target_count = u32_or_zero(v, "targetCount", "Mission", i)?;
            if target_count == 0 {
                return Err(format!("Mission {}: targetCount must be at least 1", i));
            }
            Ok(DailyMission {
                id: 0, // auto_inc
                title: req_str(v, "title", "Mission", i)?,
                mission_type: MissionType::parse(&kind)
                    .ok_or(format!("Mission {}: unknown missionType {}", i, kind))?,
                target_count,
                xp_reward: u32_or_zero(v, "xpReward", "Mission", i)?,
                coin_reward: u32_or_zero(v, "coinReward", "Mission", i)?,
                is_active: v.get("isActive").and_then(|b| b.as_bool()).unwrap_or(true),
            })
        })
        .collect()
}

pub fn parse_tasks(json_data: &str) -> Result<Vec<Task>, String> {
    parse_array(json_data, "tasks")?
        .iter()
        .enumerate()
        .map(|(i, v)| Ok(Task {
            id: 0, // auto_inc
            title: req_str(v, "title", "Task", i)?,
            description: opt_str(v, "description"),
            xp_reward: u32_or_zero(v, "xpReward", "Task", i)?,
            coin_reward: u32_or_zero(v, "coinReward", "Task", i)?,
            gem_reward: u32_or_zero(v, "gemReward", "Task", i)?,
        }))
        .collect()
}

pub fn parse_story_chapters(json_data: &str) -> Result<Vec<StoryChapter>, String> {
    parse_array(json_data, "story chapters")?
        .iter()
        .enumerate()
        .map(|(i, v)| Ok(StoryChapter {
            id: 0, // auto_inc
            title: req_str(v, "title", "Chapter", i)?,
            // Unnumbered chapters keep file order
            sequence: match v.get("sequence") {
                Some(_) => u32_or_zero(v, "sequence", "Chapter", i)?,
                None => i as u32 + 1,
            },
            required_level: u32_or_zero(v, "requiredLevel", "Chapter", i)?.max(1),
            xp_reward: u32_or_zero(v, "xpReward", "Chapter", i)?,
            coin_reward: u32_or_zero(v, "coinReward", "Chapter", i)?,
        }))
        .collect()
}

pub fn parse_problems(json_data: &str) -> Result<Vec<Problem>, String> {
    parse_array(json_data, "problems")?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            // Numeric answers are common in exports; store them as text
            let answer = match v.get("answer") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(format!("Problem {}: missing answer", i)),
            };
            if answer.trim().is_empty() {
                return Err(format!("Problem {}: empty answer", i));
            }
            Ok(Problem {
                id: 0, // auto_inc
                question: req_str(v, "question", "Problem", i)?,
                answer,
                skill: opt_str(v, "skill"),
                xp_reward: u32_or_zero(v, "xpReward", "Problem", i)?,
                coin_reward: u32_or_zero(v, "coinReward", "Problem", i)?,
            })
        })
        .collect()
}

#[reducer]
pub fn import_gacha_items(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_worker(ctx, "import_gacha_items")?;
    let items = parse_gacha_items(&json_data)?;
    let count = items.len();
    for item in items {
        ctx.db.gacha_item().insert(item);
    }
    log::info!("[IMPORT] gacha_items count={}", count);
    Ok(())
}

#[reducer]
pub fn import_daily_missions(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_worker(ctx, "import_daily_missions")?;
    let missions = parse_daily_missions(&json_data)?;
    let count = missions.len();
    for mission in missions {
        ctx.db.daily_mission().insert(mission);
    }
    log::info!("[IMPORT] daily_missions count={}", count);
    Ok(())
}

#[reducer]
pub fn import_tasks(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_worker(ctx, "import_tasks")?;
    let tasks = parse_tasks(&json_data)?;
    let count = tasks.len();
    for t in tasks {
        ctx.db.task().insert(t);
    }
    log::info!("[IMPORT] tasks count={}", count);
    Ok(())
}

#[reducer]
pub fn import_story_chapters(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_worker(ctx, "import_story_chapters")?;
    let chapters = parse_story_chapters(&json_data)?;
    let count = chapters.len();
    for chapter in chapters {
        ctx.db.story_chapter().insert(chapter);
    }
    log::info!("[IMPORT] story_chapters count={}", count);
    Ok(())
}

#[reducer]
pub fn import_problems(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_worker(ctx, "import_problems")?;
    let problems = parse_problems(&json_data)?;
    let count = problems.len();
    for p in problems {
        ctx.db.problem().insert(p);
    }
    log::info!("[IMPORT] problems count={}", count);
    Ok(())
}
