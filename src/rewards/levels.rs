//! Level percentage table
//!
//! Fixed shares per chain level in basis points. Levels beyond the table pay
//! nothing; the table deliberately sums to well under 100% of the event
//! amount, the remainder stays with the house.

use rust_decimal::Decimal;

/// Share of the event amount per level, level 1 first
pub const LEVEL_BPS: [u32; 10] = [500, 300, 200, 100, 100, 50, 50, 50, 50, 50];

/// Share for a 1-indexed chain level, as a fraction of the event amount
pub fn level_share(level: u32) -> Decimal {
    if level == 0 {
        return Decimal::ZERO;
    }
    match LEVEL_BPS.get(level as usize - 1) {
        Some(&bps) => Decimal::from(bps) / Decimal::from(10_000u32),
        None => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_table_values() {
        assert_eq!(level_share(1), dec!(0.05));
        assert_eq!(level_share(2), dec!(0.03));
        assert_eq!(level_share(3), dec!(0.02));
        assert_eq!(level_share(4), dec!(0.01));
        assert_eq!(level_share(5), dec!(0.01));
        assert_eq!(level_share(6), dec!(0.005));
        assert_eq!(level_share(10), dec!(0.005));
    }

    #[test]
    fn test_beyond_table_pays_zero() {
        assert_eq!(level_share(11), Decimal::ZERO);
        assert_eq!(level_share(20), Decimal::ZERO);
        assert_eq!(level_share(0), Decimal::ZERO);
    }
}
