//! XP to level arithmetic. Every level spans a flat [`XP_PER_LEVEL`].

pub const XP_PER_LEVEL: u64 = 100;

/// `floor(xp / 100) + 1`, saturating at `u32::MAX`.
#[must_use]
pub fn level_for_xp(xp: u64) -> u32 {
    u32::try_from(xp / XP_PER_LEVEL)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

/// Total XP at which `level` is complete, i.e. the XP needed to reach `level + 1`.
#[must_use]
pub fn xp_threshold_for_level(level: u32) -> u64 {
    u64::from(level).saturating_mul(XP_PER_LEVEL)
}

#[must_use]
pub fn xp_into_current_level(xp: u64, level: u32) -> u64 {
    xp.saturating_sub(xp_threshold_for_level(level.saturating_sub(1)))
}

#[must_use]
pub fn xp_to_next_level(xp: u64, level: u32) -> u64 {
    xp_threshold_for_level(level).saturating_sub(xp)
}

/// Rounded share of the current level already earned, clamped to `0..=100`.
#[must_use]
pub fn progress_percent(xp: u64, level: u32) -> u8 {
    let into_level = xp_into_current_level(xp, level);
    let rounded = into_level
        .saturating_mul(100)
        .saturating_add(XP_PER_LEVEL / 2)
        / XP_PER_LEVEL;
    u8::try_from(rounded.min(100)).unwrap_or(100)
}
