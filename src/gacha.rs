// ==================== GACHA ====================
//
// Weighted-rarity item draws paid in coins. Unowned items are drawn first;
// once a student owns the whole catalog, duplicates are allowed and pay a
// rarity-keyed coin refund.

use std::collections::HashSet;

use rand::Rng;
use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::{RewardError, RewardResult};
use crate::missions::{increment_mission_progress, MissionType, MissionUpdate};
use crate::progression::{add_coins, settle_reward, short_id, Reward, RewardSource};
use crate::store::RewardStore;
use crate::{GachaItem, GachaPull};

/// Coins per draw
pub const GACHA_COST: u32 = 10;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Coins refunded when a draw lands on an item the student already owns
    pub fn duplicate_bonus(self) -> u32 {
        match self {
            Rarity::Common => 5,
            Rarity::Uncommon => 10,
            Rarity::Rare => 20,
            Rarity::Epic => 50,
            Rarity::Legendary => 100,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "common" => Some(Rarity::Common),
            "uncommon" => Some(Rarity::Uncommon),
            "rare" => Some(Rarity::Rare),
            "epic" => Some(Rarity::Epic),
            "legendary" => Some(Rarity::Legendary),
            _ => None,
        }
    }
}

/// Which item catalog a draw comes from. Each catalog has its own odds.
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCatalog {
    /// Cosmetic gacha items, 5-tier odds
    Gacha,
    /// Collectible characters, 4-tier odds (no uncommon tier)
    Character,
}

impl ItemCatalog {
    pub fn odds(self) -> &'static RarityTable {
        match self {
            ItemCatalog::Gacha => &GACHA_ITEM_ODDS,
            ItemCatalog::Character => &CHARACTER_ODDS,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gacha" | "item" => Some(ItemCatalog::Gacha),
            "character" => Some(ItemCatalog::Character),
            _ => None,
        }
    }
}

/// Rarity tiers with integer weights, walked in declaration order
#[derive(Debug)]
pub struct RarityTable {
    tiers: &'static [(Rarity, u32)],
}

/// common 60 / uncommon 25 / rare 10 / epic 4 / legendary 1
pub static GACHA_ITEM_ODDS: RarityTable = RarityTable {
    tiers: &[
        (Rarity::Common, 60),
        (Rarity::Uncommon, 25),
        (Rarity::Rare, 10),
        (Rarity::Epic, 4),
        (Rarity::Legendary, 1),
    ],
};

/// common 60 / rare 30 / epic 9 / legendary 1
pub static CHARACTER_ODDS: RarityTable = RarityTable {
    tiers: &[
        (Rarity::Common, 60),
        (Rarity::Rare, 30),
        (Rarity::Epic, 9),
        (Rarity::Legendary, 1),
    ],
};

impl RarityTable {
    pub fn total_weight(&self) -> u32 {
        self.tiers.iter().map(|(_, w)| w).sum()
    }

    pub fn weight(&self, rarity: Rarity) -> u32 {
        self.tiers
            .iter()
            .find(|(r, _)| *r == rarity)
            .map_or(0, |(_, w)| *w)
    }

    /// Tier for a roll in `[0, total_weight)`: the first tier whose cumulative
    /// weight exceeds the roll. Out-of-range rolls land on the last tier.
    pub fn select(&self, roll: u32) -> Rarity {
        let mut cumulative = 0;
        for (rarity, weight) in self.tiers {
            cumulative += weight;
            if roll < cumulative {
                return *rarity;
            }
        }
        self.tiers.last().map_or(Rarity::Common, |(r, _)| *r)
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Rarity {
        let total = self.total_weight();
        if total == 0 {
            return Rarity::Common;
        }
        self.select(rng.gen_range(0..total))
    }
}

/// Pick uniformly among pool items of `rarity`, falling back to common,
/// then to anything in the pool. None only for an empty pool.
pub fn pick_item<'a, R: Rng + ?Sized>(pool: &[&'a GachaItem], rarity: Rarity, rng: &mut R)
    -> Option<&'a GachaItem>
{
    let of_rarity = |wanted: Rarity| -> Vec<&'a GachaItem> {
        pool.iter().copied().filter(|item| item.rarity == wanted).collect()
    };

    let mut candidates = of_rarity(rarity);
    if candidates.is_empty() {
        candidates = of_rarity(Rarity::Common);
    }
    if candidates.is_empty() {
        candidates = pool.to_vec();
    }
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GachaOutcome {
    pub item: GachaItem,
    pub rarity: Rarity,
    pub is_duplicate: bool,
    pub bonus_coins: u32,
    pub missions: Vec<MissionUpdate>,
}

/// Spend `GACHA_COST` coins and draw one item from `catalog`
pub fn roll_gacha<S, R>(store: &mut S, rng: &mut R, student_id: &str, catalog: ItemCatalog, now: Timestamp)
    -> RewardResult<GachaOutcome>
where
    S: RewardStore + ?Sized,
    R: Rng + ?Sized,
{
    if store.student(student_id).is_none() {
        return Err(RewardError::StudentNotFound(student_id.to_string()));
    }

    let items = store.gacha_items(catalog);
    if items.is_empty() {
        return Err(RewardError::EmptyCatalog);
    }

    if let Err(err) = add_coins(store, student_id, -i64::from(GACHA_COST)) {
        log::warn!("[GACHA] charge refused student={} reason={}", short_id(student_id), err);
        return Err(err);
    }

    let owned: HashSet<u64> = store.student_items(student_id)
        .iter()
        .map(|owned| owned.item_id)
        .collect();
    let unowned: Vec<&GachaItem> = items.iter().filter(|item| !owned.contains(&item.id)).collect();
    let pool: Vec<&GachaItem> = if unowned.is_empty() {
        items.iter().collect()
    } else {
        unowned
    };

    let drawn_rarity = catalog.odds().draw(rng);
    let item = pick_item(&pool, drawn_rarity, rng)
        .cloned()
        .ok_or(RewardError::EmptyCatalog)?;

    // Ownership before this draw is the duplicate signal, not which pool we used
    let is_duplicate = owned.contains(&item.id);
    store.grant_item(student_id, item.id, now);

    let bonus_coins = if is_duplicate {
        let bonus = item.rarity.duplicate_bonus();
        settle_reward(store, student_id, RewardSource::GachaDuplicate, Some(item.id), Reward::coins(bonus), now)?;
        bonus
    } else {
        0
    };

    store.append_gacha_pull(GachaPull {
        id: 0, // auto_inc
        student_id: student_id.to_string(),
        item_id: item.id,
        catalog,
        rarity: item.rarity,
        is_duplicate,
        cost: GACHA_COST,
        bonus_coins,
        pulled_at: now,
    });

    let missions = increment_mission_progress(store, student_id, MissionType::RollGacha, 1, now)?;

    log::info!("[GACHA] student={} catalog={:?} item={} rarity={} duplicate={} bonus={}",
        short_id(student_id), catalog, item.id, item.rarity.name(), is_duplicate, bonus_coins);

    Ok(GachaOutcome {
        rarity: item.rarity,
        item,
        is_duplicate,
        bonus_coins,
        missions,
    })
}

/// Wear an owned item. Only one item is worn at a time, so any other
/// equipped item is taken off.
pub fn equip_item<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, item_id: u64, character_id: Option<u64>)
    -> RewardResult<()>
{
    if store.gacha_item(item_id).is_none() {
        return Err(RewardError::ItemNotFound(item_id));
    }
    if let Some(character_id) = character_id {
        let owns_character = store.student_items(student_id)
            .iter()
            .any(|owned| owned.item_id == character_id);
        if !owns_character {
            return Err(RewardError::NotOwned(character_id));
        }
    }

    let owned = store.student_items(student_id);
    if !owned.iter().any(|o| o.item_id == item_id) {
        return Err(RewardError::NotOwned(item_id));
    }

    for mut other in owned {
        let wear = other.item_id == item_id;
        if other.is_equipped == wear && (!wear || other.character_id == character_id) {
            continue;
        }
        other.is_equipped = wear;
        other.character_id = if wear { character_id } else { None };
        store.update_student_item(other);
    }

    log::info!("[ITEM] equip student={} item={} character={:?}", short_id(student_id), item_id, character_id);
    Ok(())
}

pub fn unequip_item<S: RewardStore + ?Sized>(store: &mut S, student_id: &str, item_id: u64) -> RewardResult<()> {
    if store.gacha_item(item_id).is_none() {
        return Err(RewardError::ItemNotFound(item_id));
    }
    let mut owned = store.student_items(student_id)
        .into_iter()
        .find(|o| o.item_id == item_id)
        .ok_or(RewardError::NotOwned(item_id))?;

    if owned.is_equipped {
        owned.is_equipped = false;
        owned.character_id = None;
        store.update_student_item(owned);
    }
    Ok(())
}
