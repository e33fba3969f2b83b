//! Spreading tabulated rates over the ages of one policy

use std::collections::BTreeMap;

use super::Sex;

/// Highest age copied out of a mortality lookup
pub const MAX_TABLE_AGE: u32 = 112;

/// Longest payment period with its own lapse column
const MAX_LAPSE_PERIOD: u32 = 30;
/// Last tabulated lapse duration
const MAX_LAPSE_DURATION: u32 = 44;

const REINSTATEMENT_RATE: f64 = 0.5;

/// Rates keyed by attained age
pub type RateByAge = BTreeMap<u32, f64>;

/// Copy ages `0..=MAX_TABLE_AGE` of each of `table_count` mortality tables.
///
/// `lookup` receives `(table_number, table_index, sex, age)`; the result is
/// indexed `[table_index][age]`.
pub fn distribute_mortality_table(
    table_count: usize,
    lookup: impl Fn(i32, usize, Sex, u32) -> f64,
    table_number: i32,
    sex: Sex,
) -> Vec<Vec<f64>> {
    (0..table_count)
        .map(|table| {
            (0..=MAX_TABLE_AGE)
                .map(|age| lookup(table_number, table, sex, age))
                .collect()
        })
        .collect()
}

/// Lapse and reinstatement rates for ages `x..=x+n`.
///
/// `rate` is looked up by `(payment period, duration)`, with the period
/// capped at 30 and the duration at 44. Reinstatement is zero while
/// premiums are still due and one half afterwards. A `flag` below 2 turns
/// the feature off and yields two empty maps.
pub fn distribute_lapse_and_reinstatement(
    x: u32,
    n: u32,
    payment_period: u32,
    rate: impl Fn(u32, u32) -> f64,
    flag: i32,
) -> (RateByAge, RateByAge) {
    let mut lapse = RateByAge::new();
    let mut reinstatement = RateByAge::new();
    if flag < 2 {
        return (lapse, reinstatement);
    }

    let period = payment_period.min(MAX_LAPSE_PERIOD);
    for offset in 0..=n {
        lapse.insert(x + offset, rate(period, offset.min(MAX_LAPSE_DURATION)));
        let reinstated = if offset < payment_period { 0.0 } else { REINSTATEMENT_RATE };
        reinstatement.insert(x + offset, reinstated);
    }
    (lapse, reinstatement)
}

/// Same distribution on the standard payment period of the product
pub fn distribute_standard_lapse_and_reinstatement(
    x: u32,
    n: u32,
    standard_period: u32,
    rate: impl Fn(u32, u32) -> f64,
    flag: i32,
) -> (RateByAge, RateByAge) {
    distribute_lapse_and_reinstatement(x, n, standard_period, rate, flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mortality_distribution_shape() {
        let tables = distribute_mortality_table(
            3,
            |number, table, sex, age| {
                number as f64 * 100_000.0 + table as f64 * 1000.0 + sex.index() as f64 * 500.0 + age as f64
            },
            2,
            Sex::Female,
        );
        assert_eq!(tables.len(), 3);
        assert!(tables.iter().all(|t| t.len() == 113));
        assert_eq!(tables[1][0], 201_500.0);
        assert_eq!(tables[2][112], 202_612.0);
    }

    #[test]
    fn test_flag_gates_lapse() {
        let (lapse, reinstatement) = distribute_lapse_and_reinstatement(30, 20, 10, |_, _| 0.1, 1);
        assert!(lapse.is_empty());
        assert!(reinstatement.is_empty());
    }

    #[test]
    fn test_reinstatement_switches_at_payment_end() {
        let (lapse, reinstatement) = distribute_lapse_and_reinstatement(30, 20, 10, |_, _| 0.1, 2);
        assert_eq!(lapse.len(), 21);
        assert_eq!(reinstatement[&(30 + 9)], 0.0);
        assert_eq!(reinstatement[&(30 + 10)], 0.5);
        assert_eq!(reinstatement[&50], 0.5);
    }

    #[test]
    fn test_lookup_arguments_are_capped() {
        let (lapse, _) = distribute_lapse_and_reinstatement(
            20,
            60,
            40,
            |period, duration| period as f64 * 1000.0 + duration as f64,
            2,
        );
        assert_eq!(lapse[&20], 30_000.0);
        assert_eq!(lapse[&(20 + 44)], 30_044.0);
        assert_eq!(lapse[&(20 + 60)], 30_044.0);

        let (standard, _) = distribute_standard_lapse_and_reinstatement(
            20,
            5,
            12,
            |period, duration| period as f64 * 1000.0 + duration as f64,
            3,
        );
        assert_eq!(standard[&25], 12_005.0);
    }
}
