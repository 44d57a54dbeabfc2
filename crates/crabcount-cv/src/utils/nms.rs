//! Non-maximum suppression utilities

use crate::bbox::BBox;

/// Greedy NMS over anything that carries a [`BBox`].
///
/// Items are visited by descending `confidence`; an item is dropped when its
/// IoU with an already kept item reaches `threshold`. Equal confidences keep
/// their input order.
pub fn suppress<T, F>(items: Vec<T>, bbox_of: F, threshold: f64) -> Vec<T>
where
    F: Fn(&T) -> &BBox,
{
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| bbox_of(&items[b]).confidence.total_cmp(&bbox_of(&items[a]).confidence));

    let mut kept: Vec<usize> = Vec::new();
    for &i in &order {
        let candidate = bbox_of(&items[i]);
        if kept.iter().any(|&k| bbox_of(&items[k]).overlaps(candidate, threshold)) {
            continue;
        }
        kept.push(i);
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    kept.into_iter().filter_map(|i| slots[i].take()).collect()
}
