//! Property tests for one-hot enumeration.

use core_expr::{Formula, Variable, one_hots};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn group(arity: usize) -> Vec<Variable> {
    (0..arity)
        .map(|i| Variable::new(format!("a{i:02}")))
        .collect()
}

proptest! {
    /// Exactly one one-hot value holds under any 0/1 assignment of the group
    /// that sums to 1, and none holds when the group is all zero.
    #[test]
    fn exclusivity_over_indicator_assignments(arity in 1usize..6, hot in 0usize..6) {
        let vars = group(arity);
        let values = one_hots(&vars);
        prop_assert_eq!(values.len(), arity);

        let hot = hot % arity;
        let env: BTreeMap<Variable, f64> = vars
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), if i == hot { 1.0 } else { 0.0 }))
            .collect();
        let holding: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.formula.eval(&env))
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(holding, vec![hot]);

        let zeroed: BTreeMap<Variable, f64> =
            vars.iter().map(|v| (v.clone(), 0.0)).collect();
        prop_assert!(values.iter().all(|value| !value.formula.eval(&zeroed)));
    }

    /// The disjunction of all one-hot values holds exactly on the valid
    /// indicator assignments of the group.
    #[test]
    fn disjunction_matches_valid_encodings(arity in 1usize..5) {
        let vars = group(arity);
        let values = one_hots(&vars);
        let whole = Formula::disjoin(values.into_iter().map(|v| v.formula))
            .expect("non-empty group");

        for mask in 0u32..(1 << arity) {
            let env: BTreeMap<Variable, f64> = vars
                .iter()
                .enumerate()
                .map(|(i, v)| (v.clone(), f64::from((mask >> i) & 1)))
                .collect();
            let valid = mask.count_ones() == 1;
            prop_assert_eq!(whole.eval(&env), valid);
        }
    }
}
