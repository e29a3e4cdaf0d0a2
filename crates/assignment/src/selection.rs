//! Candidate ranking.

use crate::inventory::DealerAvailability;

/// Dealers able to cover `needed` units, best first.
///
/// Order: `priority_override` descending, then `quantity_available`
/// descending. The sort is stable, so full ties keep the inventory service's
/// order.
pub fn rank_candidates(dealers: Vec<DealerAvailability>, needed: u32) -> Vec<DealerAvailability> {
    let needed = i64::from(needed);
    let mut eligible: Vec<DealerAvailability> = dealers
        .into_iter()
        .filter(|d| d.quantity_available >= needed)
        .collect();

    eligible.sort_by(|a, b| {
        b.priority_override
            .cmp(&a.priority_override)
            .then_with(|| b.quantity_available.cmp(&a.quantity_available))
    });
    eligible
}
