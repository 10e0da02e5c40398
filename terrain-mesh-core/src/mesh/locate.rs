use super::{predicates, FaceId, TerrainMesh, VertexId};
use crate::coord::Coord;

/// Result of locating a point in the triangulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Point coincides with an existing vertex.
    Vertex(VertexId),
    /// Point lies on the given edge of the face.
    Edge(FaceId, usize),
    /// Point lies strictly inside the face.
    Face(FaceId),
    /// Point lies outside of the triangulated area.
    Outside,
}

impl TerrainMesh {
    /// Locates a point by walking from the hint face (or the last face) towards it.
    pub fn locate(&self, p: Coord, hint: Option<FaceId>) -> Location {
        if self.faces.is_empty() {
            return Location::Outside;
        }
        let mut f = hint
            .filter(|f| f.0 < self.faces.len())
            .unwrap_or(FaceId(self.faces.len() - 1));
        let mut rotation = 0;
        for _ in 0..=self.faces.len() {
            match self.classify(f, p, rotation) {
                Step::Found(location) => return location,
                Step::Move(Some(g)) => f = g,
                Step::Move(None) => return Location::Outside,
            }
            rotation = (rotation + 1) % 3;
        }
        self.locate_scan(p)
    }

    /// Exhaustive point location for when walking does not terminate.
    fn locate_scan(&self, p: Coord) -> Location {
        log::debug!("Point location walk failed at {:?}, scanning all faces", p);
        for f in self.face_ids() {
            if let Step::Found(location) = self.classify(f, p, 0) {
                return location;
            }
        }
        Location::Outside
    }

    fn classify(&self, f: FaceId, p: Coord, rotation: usize) -> Step {
        let face = &self.faces[f.0];
        let coords = self.face_coords(f);
        for (k, c) in coords.iter().enumerate() {
            if predicates::coincident(*c, p) {
                return Step::Found(Location::Vertex(face.vertices[k]));
            }
        }
        let mut zero = None;
        let mut zeros = 0;
        for n in 0..3 {
            let i = (n + rotation) % 3;
            let a = coords[(i + 1) % 3];
            let b = coords[(i + 2) % 3];
            match predicates::orient_sign(a, b, p) {
                -1 => return Step::Move(face.neighbors[i]),
                0 => {
                    zero = Some(i);
                    zeros += 1;
                }
                _ => {}
            }
        }
        match (zero, zeros) {
            (None, _) => Step::Found(Location::Face(f)),
            (Some(i), 1) => Step::Found(Location::Edge(f, i)),
            // collinear with two edges means it sits on their shared corner
            (Some(i), _) => {
                let corner = (0..3)
                    .filter(|k| *k != i)
                    .min_by(|a, b| {
                        let da = (coords[*a] - p).sqr_magnitude();
                        let db = (coords[*b] - p).sqr_magnitude();
                        da.total_cmp(&db)
                    })
                    .unwrap_or(i);
                Step::Found(Location::Vertex(face.vertices[corner]))
            }
        }
    }
}

enum Step {
    Found(Location),
    Move(Option<FaceId>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Bounds;

    fn mesh() -> TerrainMesh {
        let bounds = Bounds::new(10.0, 40.0, 11.0, 41.0);
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, 0.0))
            .collect::<Vec<_>>();
        TerrainMesh::from_seed(bounds, &seeds).unwrap()
    }

    #[test]
    fn test_locate_kinds() {
        let mesh = mesh();
        assert!(matches!(
            mesh.locate(Coord::new(10.0, 40.0), None),
            Location::Vertex(_)
        ));
        assert!(matches!(
            mesh.locate(Coord::new(10.5, 40.0), None),
            Location::Edge(_, _)
        ));
        assert!(matches!(
            mesh.locate(Coord::new(10.2, 40.7), None),
            Location::Face(_)
        ));
        assert_eq!(mesh.locate(Coord::new(9.0, 40.5), None), Location::Outside);
    }

    #[test]
    fn test_locate_on_diagonal() {
        let mesh = mesh();
        assert!(matches!(
            mesh.locate(Coord::new(10.5, 40.5), None),
            Location::Edge(_, _)
        ));
    }
}
