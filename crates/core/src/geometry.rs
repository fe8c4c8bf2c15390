//! Axis-aligned box arithmetic for figure regions and text blocks.
//!
//! Boxes use page coordinates with the origin at the top-left corner and y
//! growing downward, in PDF points.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Builds a box from two arbitrary corners, normalizing the order so that
    /// `x1 <= x2` and `y1 <= y2`.
    pub fn from_corners(ax: f32, ay: f32, bx: f32, by: f32) -> Self {
        Self {
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }

    pub fn pad(&self, padding: f32) -> BBox {
        BBox {
            x1: self.x1 - padding,
            y1: self.y1 - padding,
            x2: self.x2 + padding,
            y2: self.y2 + padding,
        }
    }

    /// Clips the box to `bounds`. A box entirely outside collapses to zero area.
    pub fn clamp(&self, bounds: &BBox) -> BBox {
        let x1 = self.x1.clamp(bounds.x1, bounds.x2);
        let y1 = self.y1.clamp(bounds.y1, bounds.y2);
        BBox {
            x1,
            y1,
            x2: self.x2.clamp(x1, bounds.x2),
            y2: self.y2.clamp(y1, bounds.y2),
        }
    }
}

/// Euclidean distance between the nearest edges of two boxes; zero when they
/// overlap or touch.
pub fn box_distance(a: &BBox, b: &BBox) -> f32 {
    let dx = (a.x1 - b.x2).max(b.x1 - a.x2).max(0.0);
    let dy = (a.y1 - b.y2).max(b.y1 - a.y2).max(0.0);
    dx.hypot(dy)
}

/// Merges every pair of boxes within `threshold` of each other into their
/// bounding union until no such pair remains.
///
/// The final partition does not depend on the merge order. The result is
/// sorted by `(y1, x1, y2, x2)` so repeated runs emit boxes in the same order.
pub fn merge_overlapping(boxes: &[BBox], threshold: f32) -> Vec<BBox> {
    let mut pending = boxes.to_vec();
    let mut changed = true;

    while changed {
        changed = false;
        let mut merged = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let mut current = pending.remove(0);
            let mut index = 0;
            while index < pending.len() {
                if box_distance(&current, &pending[index]) <= threshold {
                    current = current.union(&pending[index]);
                    pending.remove(index);
                    changed = true;
                } else {
                    index += 1;
                }
            }
            merged.push(current);
        }

        pending = merged;
    }

    pending.sort_by(|left, right| {
        left.y1
            .total_cmp(&right.y1)
            .then(left.x1.total_cmp(&right.x1))
            .then(left.y2.total_cmp(&right.y2))
            .then(left.x2.total_cmp(&right.x2))
    });
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox { x1, y1, x2, y2 }
    }

    #[test]
    fn distance_is_zero_for_touching_and_overlapping_boxes() {
        assert_eq!(box_distance(&bbox(0.0, 0.0, 10.0, 10.0), &bbox(10.0, 0.0, 20.0, 10.0)), 0.0);
        assert_eq!(box_distance(&bbox(0.0, 0.0, 10.0, 10.0), &bbox(5.0, 5.0, 20.0, 20.0)), 0.0);
    }

    #[test]
    fn distance_uses_nearest_corners_diagonally() {
        let distance = box_distance(&bbox(0.0, 0.0, 5.0, 5.0), &bbox(8.0, 9.0, 15.0, 15.0));
        assert!((distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn touching_boxes_merge_at_zero_threshold() {
        let merged = merge_overlapping(&[bbox(0.0, 0.0, 10.0, 10.0), bbox(10.0, 0.0, 20.0, 10.0)], 0.0);
        assert_eq!(merged, vec![bbox(0.0, 0.0, 20.0, 10.0)]);
    }

    #[test]
    fn separated_boxes_stay_apart_at_zero_threshold() {
        let merged = merge_overlapping(&[bbox(0.0, 0.0, 5.0, 5.0), bbox(10.0, 10.0, 15.0, 15.0)], 0.0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merging_reaches_fixed_point_through_chains() {
        // a touches c only after a and b have been merged.
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(0.0, 12.0, 30.0, 20.0);
        let c = bbox(32.0, 0.0, 40.0, 5.0);
        let merged = merge_overlapping(&[a, c, b], 2.0);
        assert_eq!(merged, vec![bbox(0.0, 0.0, 40.0, 20.0)]);
    }

    #[test]
    fn merge_result_is_independent_of_input_order() {
        let boxes = vec![
            bbox(0.0, 0.0, 4.0, 4.0),
            bbox(50.0, 50.0, 60.0, 60.0),
            bbox(5.0, 0.0, 9.0, 4.0),
            bbox(61.0, 61.0, 70.0, 70.0),
            bbox(200.0, 0.0, 210.0, 10.0),
        ];
        let mut reversed = boxes.clone();
        reversed.reverse();

        assert_eq!(merge_overlapping(&boxes, 2.0), merge_overlapping(&reversed, 2.0));
        assert_eq!(merge_overlapping(&boxes, 2.0).len(), 3);
    }

    #[test]
    fn clamp_and_pad_stay_inside_page() {
        let page = bbox(0.0, 0.0, 100.0, 100.0);
        let padded = bbox(5.0, 90.0, 20.0, 98.0).pad(10.0).clamp(&page);
        assert_eq!(padded, bbox(0.0, 80.0, 30.0, 100.0));

        let outside = bbox(120.0, 120.0, 130.0, 130.0).clamp(&page);
        assert!(outside.is_empty());
    }
}
