//! One-hot values for categorical feature groups.
//!
//! A group of k indicator variables encodes one categorical feature; its k
//! one-hot values pin one indicator to 1 and the rest to 0. Enumeration order
//! is the index order of the group, so logs and queue contents are stable
//! across runs.

use crate::{Formula, Variable};

/// One value of a one-hot encoded feature: the indicator that carries the 1,
/// paired with the full pinning assumption over the whole group.
#[derive(Clone, Debug)]
pub struct OneHot1 {
    pub var: Variable,
    pub formula: Formula,
}

/// One one-hot value per group, in group order.
pub type OneHotN = Vec<OneHot1>;

/// All one-hot values for a group of indicator variables.
///
/// The i-th result imposes `1 <= vars[i] <= 1` and `0 <= vars[j] <= 0` for
/// every other j, conjoined in index order. An empty group has no values.
pub fn one_hots(vars: &[Variable]) -> Vec<OneHot1> {
    (0..vars.len())
        .map(|i| {
            let atoms = vars.iter().enumerate().map(|(j, var)| {
                if j == i {
                    Formula::band(1.0, var, 1.0)
                } else {
                    Formula::band(0.0, var, 0.0)
                }
            });
            OneHot1 {
                var: vars[i].clone(),
                formula: Formula::conjoin(atoms).expect("one-hot group is non-empty"),
            }
        })
        .collect()
}

/// Cartesian product over groups in odometer order (last group varies
/// fastest). The product over zero groups is the single empty combination;
/// any empty group empties the whole product.
pub fn cartesian<T: Clone>(groups: &[Vec<T>]) -> impl Iterator<Item = Vec<T>> + '_ {
    let mut odometer = vec![0usize; groups.len()];
    let mut exhausted = groups.iter().any(Vec::is_empty);
    std::iter::from_fn(move || {
        if exhausted {
            return None;
        }
        let combination = groups
            .iter()
            .zip(&odometer)
            .map(|(group, &digit)| group[digit].clone())
            .collect();
        exhausted = true;
        for position in (0..groups.len()).rev() {
            odometer[position] += 1;
            if odometer[position] < groups[position].len() {
                exhausted = false;
                break;
            }
            odometer[position] = 0;
        }
        Some(combination)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn group(names: &[&str]) -> Vec<Variable> {
        names.iter().map(|n| Variable::new(n)).collect()
    }

    /// Assignment setting exactly `hot` to 1 within the group.
    fn assignment(vars: &[Variable], hot: usize) -> BTreeMap<Variable, f64> {
        vars.iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), if i == hot { 1.0 } else { 0.0 }))
            .collect()
    }

    #[test]
    fn one_value_per_indicator_in_index_order() {
        let vars = group(&["a01", "a02", "a03"]);
        let values = one_hots(&vars);
        assert_eq!(values.len(), 3);
        for (i, value) in values.iter().enumerate() {
            assert_eq!(value.var, vars[i]);
        }
    }

    #[test]
    fn values_are_mutually_exclusive() {
        let vars = group(&["a01", "a02", "a03"]);
        let values = one_hots(&vars);
        for hot in 0..vars.len() {
            let env = assignment(&vars, hot);
            for (i, value) in values.iter().enumerate() {
                assert_eq!(value.formula.eval(&env), i == hot);
            }
        }
    }

    #[test]
    fn empty_group_has_no_values() {
        assert!(one_hots(&[]).is_empty());
    }

    #[test]
    fn cartesian_covers_the_full_product() {
        let groups = vec![vec![1, 2], vec![10, 20, 30]];
        let combos: Vec<Vec<i32>> = cartesian(&groups).collect();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![1, 10]);
        assert_eq!(combos[5], vec![2, 30]);
    }

    #[test]
    fn cartesian_of_no_groups_is_one_empty_combination() {
        let groups: Vec<Vec<i32>> = Vec::new();
        let combos: Vec<Vec<i32>> = cartesian(&groups).collect();
        assert_eq!(combos, vec![Vec::<i32>::new()]);
    }
}
