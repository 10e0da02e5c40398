use crate::{mesh::FaceId, Scalar};

/// Max-heap of faces keyed by error, supporting removal and update of arbitrary entries.
///
/// Equal keys pop in ascending face id order.
#[derive(Debug, Default, Clone)]
pub struct FaceQueue {
    heap: Vec<(Scalar, FaceId)>,
    positions: Vec<Option<usize>>,
}

impl FaceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, face: FaceId) -> bool {
        self.position(face).is_some()
    }

    pub fn peek(&self) -> Option<(FaceId, Scalar)> {
        self.heap.first().map(|(k, f)| (*f, *k))
    }

    /// Inserts face or updates its key.
    pub fn push(&mut self, face: FaceId, key: Scalar) {
        if let Some(index) = self.position(face) {
            let old = self.heap[index].0;
            self.heap[index].0 = key;
            if key > old {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
            return;
        }
        if self.positions.len() <= face.0 {
            self.positions.resize(face.0 + 1, None);
        }
        self.heap.push((key, face));
        let index = self.heap.len() - 1;
        self.positions[face.0] = Some(index);
        self.sift_up(index);
    }

    pub fn pop(&mut self) -> Option<(FaceId, Scalar)> {
        let (key, face) = *self.heap.first()?;
        self.remove(face);
        Some((face, key))
    }

    /// Removes face and returns its key.
    pub fn remove(&mut self, face: FaceId) -> Option<Scalar> {
        let index = self.position(face)?;
        let last = self.heap.len() - 1;
        self.swap(index, last);
        let (key, _) = self.heap.pop()?;
        self.positions[face.0] = None;
        if index < self.heap.len() {
            self.sift_down(index);
            self.sift_up(index);
        }
        Some(key)
    }

    fn position(&self, face: FaceId) -> Option<usize> {
        self.positions.get(face.0).copied().flatten()
    }

    fn higher(&self, a: usize, b: usize) -> bool {
        let (ka, fa) = self.heap[a];
        let (kb, fb) = self.heap[b];
        ka > kb || (ka == kb && fa < fb)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions[self.heap[a].1 .0] = Some(a);
        self.positions[self.heap[b].1 .0] = Some(b);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.higher(index, parent) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut best = index;
            if left < self.heap.len() && self.higher(left, best) {
                best = left;
            }
            if right < self.heap.len() && self.higher(right, best) {
                best = right;
            }
            if best == index {
                break;
            }
            self.swap(index, best);
            index = best;
        }
    }
}
