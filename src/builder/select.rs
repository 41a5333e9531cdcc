//! Greatest-first, first-fit coin selection.

use crate::types::Utxo;

/// UTXOs that plain BTC may be spent from: above `floor` and carrying no
/// inscription, rune or alkane. Sorted largest first.
pub fn spendable_utxos(utxos: Vec<Utxo>, floor: u64) -> Vec<Utxo> {
    let mut spendable: Vec<Utxo> = utxos
        .into_iter()
        .filter(|u| u.value > floor && !u.carries_asset())
        .collect();
    spendable.sort_by(|a, b| b.value.cmp(&a.value));
    spendable
}

/// Walks `candidates` in order, adding each to the selection until
/// `covered(selection, total)` holds. Stops at the first covering prefix,
/// so the result is deterministic for a given ordering. `None` when even
/// the full set does not cover.
pub fn select_utxos<F>(candidates: &[Utxo], mut covered: F) -> Option<Vec<Utxo>>
where
    F: FnMut(&[Utxo], u64) -> bool,
{
    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in candidates {
        selected.push(utxo.clone());
        total += utxo.value;
        if covered(&selected, total) {
            return Some(selected);
        }
    }
    None
}
