use proptest::prelude::*;

/// Number of events and the point after which the active member fails over
pub fn failover_scenario_strategy() -> impl Strategy<Value = (u8, u8)> {
    (1u8..40).prop_flat_map(|n| (Just(n), 0..=n))
}

/// Terminal update sequences for one tracking ID, in arrival order
pub fn terminal_update_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..6)
}
