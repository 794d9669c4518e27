//! Score calculation
//!
//! A correct answer is worth a fixed base plus a time bonus that decays
//! linearly over the round interval. Streak bonuses are added separately
//! by the game engine.

/// Points for any correct answer
pub const BASE_SCORE: u32 = 1000;

/// Bonus for an instant answer
pub const MAX_TIME_BONUS: u32 = 500;

/// Bonus per consecutive correct answer beyond the first
pub const STREAK_BONUS_STEP: u32 = 100;

/// Score for a correct answer given after `elapsed_ms`
///
/// Late answers keep the base score; the bonus never goes negative.
pub fn calculate_score(elapsed_ms: u64, interval_secs: u32) -> u32 {
    let max_time_ms = u64::from(interval_secs) * 1000;
    if max_time_ms == 0 || elapsed_ms >= max_time_ms {
        return BASE_SCORE;
    }

    let remaining = max_time_ms - elapsed_ms;
    let bonus = remaining * u64::from(MAX_TIME_BONUS) / max_time_ms;
    BASE_SCORE + bonus as u32
}

/// Bonus for reaching `streak` consecutive correct answers
pub fn streak_bonus(streak: u32) -> u32 {
    if streak > 1 {
        (streak - 1).saturating_mul(STREAK_BONUS_STEP)
    } else {
        0
    }
}
