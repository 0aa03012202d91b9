//! Connected-component labeling and label equivalence tracking

use ndarray::{ArrayView3, ArrayViewMut3};
use std::collections::HashMap;

/// Disjoint-set forest over label ids
#[derive(Debug, Default, Clone)]
pub struct LabelUnion {
    parent: Vec<u32>,
}

impl LabelUnion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure ids `0..=id` exist
    pub fn reserve_to(&mut self, id: u32) {
        let needed = id as usize + 1;
        if self.parent.len() < needed {
            let start = self.parent.len() as u32;
            self.parent.extend(start..=id);
        }
    }

    pub fn find(&mut self, id: u32) -> u32 {
        self.reserve_to(id);
        let mut root = id;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut node = id;
        while self.parent[node as usize] != root {
            let next = self.parent[node as usize];
            self.parent[node as usize] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Keep the smaller id as root so relabeling is stable
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child as usize] = root;
        }
    }
}

/// Label 6-connected foreground components of `mask`, numbering them 1..=n in scan order
///
/// Returns the label volume and the component count.
#[must_use]
pub fn label_components(mask: ArrayView3<'_, bool>) -> (ndarray::Array3<i32>, u32) {
    let (nz, ny, nx) = mask.dim();
    let mut labels = ndarray::Array3::<i32>::zeros((nz, ny, nx));
    let mut union = LabelUnion::new();
    let mut next: u32 = 1;

    // First pass: provisional labels from the three backward neighbours
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                if !mask[[z, y, x]] {
                    continue;
                }
                let neighbours = [
                    (z > 0).then(|| labels[[z - 1, y, x]]),
                    (y > 0).then(|| labels[[z, y - 1, x]]),
                    (x > 0).then(|| labels[[z, y, x - 1]]),
                ];
                let mut current = 0u32;
                for label in neighbours.into_iter().flatten().filter(|&l| l > 0) {
                    let label = label as u32;
                    if current == 0 {
                        current = label;
                    } else {
                        union.union(current, label);
                    }
                }
                if current == 0 {
                    current = next;
                    union.reserve_to(current);
                    next += 1;
                }
                labels[[z, y, x]] = current as i32;
            }
        }
    }

    let count = compact_labels(labels.view_mut(), &mut union);
    (labels, count)
}

/// Replace each label by its root, renumbered consecutively from 1 in scan order
///
/// Returns the number of distinct labels.
pub fn compact_labels(mut labels: ArrayViewMut3<'_, i32>, union: &mut LabelUnion) -> u32 {
    let mut remap: HashMap<u32, i32> = HashMap::new();
    for value in labels.iter_mut() {
        if *value <= 0 {
            continue;
        }
        let root = union.find(*value as u32);
        let next_id = remap.len() as i32 + 1;
        *value = *remap.entry(root).or_insert(next_id);
    }
    remap.len() as u32
}

/// Union labels of 6-adjacent foreground voxels that disagree
pub fn union_adjacent(labels: ArrayView3<'_, i32>, union: &mut LabelUnion) {
    let (nz, ny, nx) = labels.dim();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let here = labels[[z, y, x]];
                if here <= 0 {
                    continue;
                }
                let forward = [
                    (z + 1 < nz).then(|| labels[[z + 1, y, x]]),
                    (y + 1 < ny).then(|| labels[[z, y + 1, x]]),
                    (x + 1 < nx).then(|| labels[[z, y, x + 1]]),
                ];
                for other in forward.into_iter().flatten() {
                    if other > 0 && other != here {
                        union.union(here as u32, other as u32);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_union_find() {
        let mut union = LabelUnion::new();
        union.union(3, 7);
        union.union(7, 9);
        assert_eq!(union.find(9), 3);
        assert_eq!(union.find(7), 3);
        assert_eq!(union.find(4), 4);
    }

    #[test]
    fn test_two_separate_components() {
        let mut mask = Array3::from_elem((3, 3, 3), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 0, 1]] = true;
        mask[[2, 2, 2]] = true;

        let (labels, count) = label_components(mask.view());
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 0, 1]], 1);
        assert_eq!(labels[[2, 2, 2]], 2);
        assert_eq!(labels[[1, 1, 1]], 0);
    }

    #[test]
    fn test_diagonal_is_not_connected() {
        let mut mask = Array3::from_elem((1, 2, 2), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 1, 1]] = true;

        let (_, count) = label_components(mask.view());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_u_shape_merges() {
        // Two arms joined only at the bottom row get provisional labels first
        let mut mask = Array3::from_elem((1, 3, 3), false);
        for y in 0..3 {
            mask[[0, y, 0]] = true;
            mask[[0, y, 2]] = true;
        }
        mask[[0, 2, 1]] = true;

        let (labels, count) = label_components(mask.view());
        assert_eq!(count, 1);
        assert!(labels.iter().all(|&l| l == 0 || l == 1));
    }

    #[test]
    fn test_union_adjacent_merges_touching_labels() {
        let mut labels = Array3::<i32>::zeros((1, 1, 4));
        labels[[0, 0, 0]] = 5;
        labels[[0, 0, 1]] = 8;
        labels[[0, 0, 3]] = 9;

        let mut union = LabelUnion::new();
        union_adjacent(labels.view(), &mut union);
        let count = compact_labels(labels.view_mut(), &mut union);

        assert_eq!(count, 2);
        assert_eq!(labels.as_slice().unwrap(), &[1, 1, 0, 2]);
    }
}
