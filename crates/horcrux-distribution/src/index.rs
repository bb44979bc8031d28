//! Deterministic steward index assignment (spec section 4.7,
//! SPEC_FULL.md C.3). A pure function over the plan's current steward list
//! so it's trivially testable without any engine state.

use horcrux_core::steward::Steward;

/// Assign the smallest unused integer in `[1, n]` to every steward lacking
/// an `assigned_index`, in insertion order (spec section 4.7's tie-breaking
/// rule). Stewards that already carry an index (retained across a
/// redistribution) are left untouched, so reconstruction stays over a
/// consistent coordinate system.
pub fn assign_indices(stewards: &mut [Steward]) {
    let mut used: std::collections::HashSet<u8> =
        stewards.iter().filter_map(|s| s.assigned_index).collect();

    let mut next_candidate = 1u8;
    for steward in stewards.iter_mut() {
        if steward.assigned_index.is_some() {
            continue;
        }
        while used.contains(&next_candidate) {
            next_candidate += 1;
        }
        steward.assigned_index = Some(next_candidate);
        used.insert(next_candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invited(name: &str) -> Steward {
        Steward::invited(name, "code")
    }

    #[test]
    fn assigns_smallest_unused_integers_in_order() {
        let mut stewards = vec![invited("a"), invited("b"), invited("c")];
        assign_indices(&mut stewards);
        assert_eq!(
            stewards.iter().map(|s| s.assigned_index.unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn retained_stewards_keep_their_existing_index() {
        let mut stewards = vec![invited("a"), invited("b"), invited("c")];
        stewards[1].assigned_index = Some(7);

        assign_indices(&mut stewards);

        assert_eq!(stewards[1].assigned_index, Some(7));
        assert_eq!(stewards[0].assigned_index, Some(1));
        assert_eq!(stewards[2].assigned_index, Some(2));
    }
}
