use super::{predicates, EdgeFlags, FaceId, Location, MeshFace, TerrainMesh, VertexId};
use crate::{
    coord::Coord,
    error::{MeshError, MeshResult},
    Scalar,
};

/// Outcome of a point insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub vertex: VertexId,
    /// `false` when the point coincided with an existing vertex.
    pub created: bool,
    /// Faces created or reshaped by the insertion.
    pub affected: Vec<FaceId>,
}

impl Insertion {
    fn existing(vertex: VertexId) -> Self {
        Self {
            vertex,
            created: false,
            affected: vec![],
        }
    }
}

impl TerrainMesh {
    /// Inserts a point and restores the constrained Delaunay property around it.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
    /// let seeds = bounds.corners().iter().map(|c| (*c, 0.0)).collect::<Vec<_>>();
    /// let mut mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
    /// let ins = mesh.insert_point(Coord::new(0.25, 0.5), 3.0, None).unwrap();
    /// assert!(ins.created);
    /// assert_eq!(mesh.vertex(ins.vertex).height, 3.0);
    /// assert_eq!(mesh.face_count(), 4);
    /// assert!(mesh.is_delaunay());
    /// ```
    pub fn insert_point(
        &mut self,
        p: Coord,
        height: Scalar,
        hint: Option<FaceId>,
    ) -> MeshResult<Insertion> {
        match self.locate(p, hint) {
            Location::Vertex(v) => Ok(Insertion::existing(v)),
            Location::Edge(f, i) => Ok(self.split_edge(f, i, p, height)),
            Location::Face(f) => Ok(self.split_face(f, p, height)),
            Location::Outside => Err(MeshError::OutsideTile(p.x, p.y)),
        }
    }

    /// Splits edge `i` of face `f` at point `p`. Both halves keep the edge flags.
    pub fn split_edge(&mut self, f: FaceId, i: usize, p: Coord, height: Scalar) -> Insertion {
        let v = self.push_vertex(p, height);
        let face = self.faces[f.0].clone();
        let o = face.vertices[i];
        let u = face.vertices[(i + 1) % 3];
        let w = face.vertices[(i + 2) % 3];
        let flags = face.edges[i];
        let n_ou = face.neighbors[(i + 2) % 3];
        let n_wo = face.neighbors[(i + 1) % 3];
        let e_ou = face.edges[(i + 2) % 3];
        let e_wo = face.edges[(i + 1) % 3];
        let fa = f;
        let fb = FaceId(self.faces.len());
        let d = EdgeFlags::default();

        let twin = face.neighbors[i].and_then(|g| {
            let other = self.faces[g.0].clone();
            (0..3)
                .find(|j| other.edge(*j) == (w, u))
                .map(|j| (g, j, other))
        });

        let (ga, gb) = match &twin {
            Some((g, _, _)) => (Some(*g), Some(FaceId(fb.0 + 1))),
            None => (None, None),
        };

        self.faces[fa.0] = MeshFace::child(
            &face,
            [o, u, v],
            [gb, Some(fb), n_ou],
            [flags, d, e_ou],
        );
        self.faces.push(MeshFace::child(
            &face,
            [o, v, w],
            [ga, n_wo, Some(fa)],
            [flags, e_wo, d],
        ));
        self.relink(n_wo, w, o, fb);
        self.vertices[o.0].face = fa;
        self.vertices[u.0].face = fa;
        self.vertices[w.0].face = fb;
        self.vertices[v.0].face = fa;

        let mut stack = vec![(fa, 0), (fb, 0)];
        let mut affected = vec![fa, fb];
        if let (Some((g, j, other)), Some(ga), Some(gb)) = (twin, ga, gb) {
            let q = other.vertices[j];
            let n_qw = other.neighbors[(j + 2) % 3];
            let n_uq = other.neighbors[(j + 1) % 3];
            let e_qw = other.edges[(j + 2) % 3];
            let e_uq = other.edges[(j + 1) % 3];
            self.faces[g.0] = MeshFace::child(
                &other,
                [q, w, v],
                [Some(fb), Some(gb), n_qw],
                [flags, d, e_qw],
            );
            self.faces.push(MeshFace::child(
                &other,
                [q, v, u],
                [Some(fa), n_uq, Some(ga)],
                [flags, e_uq, d],
            ));
            self.relink(n_uq, u, q, gb);
            self.vertices[q.0].face = ga;
            stack.push((ga, 0));
            stack.push((gb, 0));
            affected.push(ga);
            affected.push(gb);
        }
        // legalize the outer edges opposite to the new vertex
        let stack = stack
            .into_iter()
            .filter_map(|(f, _)| self.faces[f.0].index_of(v).map(|k| (f, k)))
            .collect();
        self.legalize(v, stack, &mut affected);
        Insertion {
            vertex: v,
            created: true,
            affected,
        }
    }

    /// Splits face `f` into three faces around the new point `p`.
    pub(crate) fn split_face(&mut self, f: FaceId, p: Coord, height: Scalar) -> Insertion {
        let v = self.push_vertex(p, height);
        let face = self.faces[f.0].clone();
        let [a, b, c] = face.vertices;
        let [n0, n1, n2] = face.neighbors;
        let [e0, e1, e2] = face.edges;
        let d = EdgeFlags::default();
        let f0 = f;
        let f1 = FaceId(self.faces.len());
        let f2 = FaceId(self.faces.len() + 1);
        self.faces[f0.0] = MeshFace::child(&face, [v, b, c], [n0, Some(f1), Some(f2)], [e0, d, d]);
        self.faces.push(MeshFace::child(
            &face,
            [a, v, c],
            [Some(f0), n1, Some(f2)],
            [d, e1, d],
        ));
        self.faces.push(MeshFace::child(
            &face,
            [a, b, v],
            [Some(f0), Some(f1), n2],
            [d, d, e2],
        ));
        self.relink(n1, c, a, f1);
        self.relink(n2, a, b, f2);
        self.vertices[a.0].face = f1;
        self.vertices[b.0].face = f0;
        self.vertices[c.0].face = f0;
        self.vertices[v.0].face = f0;
        let mut affected = vec![f0, f1, f2];
        self.legalize(v, vec![(f0, 0), (f1, 1), (f2, 2)], &mut affected);
        Insertion {
            vertex: v,
            created: true,
            affected,
        }
    }

    /// Lawson flips of edges opposite to the freshly inserted vertex `v`.
    fn legalize(&mut self, v: VertexId, mut stack: Vec<(FaceId, usize)>, affected: &mut Vec<FaceId>) {
        let mut guard = 0;
        let limit = 16 * (self.faces.len() + 16);
        while let Some((f, i)) = stack.pop() {
            guard += 1;
            if guard > limit {
                log::warn!("Legalization did not converge around vertex {}", v.0);
                break;
            }
            if self.faces[f.0].vertices[i] != v || !self.should_flip(f, i) {
                continue;
            }
            if let Some((f, g)) = self.flip(f, i) {
                push_unique(affected, f);
                push_unique(affected, g);
                for h in [f, g] {
                    if let Some(k) = self.faces[h.0].index_of(v) {
                        stack.push((h, k));
                    }
                }
            }
        }
    }

    /// Lawson flips over arbitrary edges until all of them are locally Delaunay.
    pub(crate) fn legalize_edges(
        &mut self,
        mut stack: Vec<(VertexId, VertexId)>,
        affected: &mut Vec<FaceId>,
    ) {
        let mut guard = 0;
        let limit = 16 * (self.faces.len() + 16) + 4 * stack.len();
        while let Some((a, b)) = stack.pop() {
            guard += 1;
            if guard > limit {
                log::warn!("Edge legalization did not converge");
                break;
            }
            let Some((f, i)) = self.find_edge(a, b) else {
                continue;
            };
            if !self.should_flip(f, i) {
                continue;
            }
            let face = &self.faces[f.0];
            let o = face.vertices[i];
            let (u, w) = face.edge(i);
            if let Some((f, g)) = self.flip(f, i) {
                push_unique(affected, f);
                push_unique(affected, g);
                let Some(q) = self.faces[f.0]
                    .vertices
                    .iter()
                    .copied()
                    .find(|x| *x != o && *x != u && *x != w)
                else {
                    continue;
                };
                stack.extend([(o, u), (u, q), (q, w), (w, o)]);
            }
        }
    }

    /// Tells if edge `i` of face `f` is unconstrained, interior and not locally Delaunay.
    fn should_flip(&self, f: FaceId, i: usize) -> bool {
        let face = &self.faces[f.0];
        if face.edges[i].constrained {
            return false;
        }
        let Some(g) = face.neighbors[i] else {
            return false;
        };
        let (u, w) = face.edge(i);
        let Some(q) = self.faces[g.0]
            .vertices
            .iter()
            .copied()
            .find(|x| *x != u && *x != w)
        else {
            return false;
        };
        let [a, b, c] = self.face_coords(f);
        predicates::in_circle(a, b, c, self.vertices[q.0].pos)
    }

    /// Flips edge `i` of face `f` when the surrounding quad is strictly convex.
    ///
    /// Faces `(o, u, w)` and `(q, w, u)` become `(o, u, q)` and `(q, w, o)`, keeping their ids.
    pub(crate) fn flip(&mut self, f: FaceId, i: usize) -> Option<(FaceId, FaceId)> {
        let face = self.faces[f.0].clone();
        let g = face.neighbors[i]?;
        let other = self.faces[g.0].clone();
        let o = face.vertices[i];
        let u = face.vertices[(i + 1) % 3];
        let w = face.vertices[(i + 2) % 3];
        let j = (0..3).find(|j| other.edge(*j) == (w, u))?;
        let q = other.vertices[j];
        let [po, pu, pw, pq] = [o, u, w, q].map(|x| self.vertices[x.0].pos);
        if predicates::orient_sign(po, pu, pq) <= 0 || predicates::orient_sign(pq, pw, po) <= 0 {
            return None;
        }
        let n_wo = face.neighbors[(i + 1) % 3];
        let n_ou = face.neighbors[(i + 2) % 3];
        let e_wo = face.edges[(i + 1) % 3];
        let e_ou = face.edges[(i + 2) % 3];
        let n_uq = other.neighbors[(j + 1) % 3];
        let n_qw = other.neighbors[(j + 2) % 3];
        let e_uq = other.edges[(j + 1) % 3];
        let e_qw = other.edges[(j + 2) % 3];
        let d = EdgeFlags::default();
        self.faces[f.0] = MeshFace::child(&face, [o, u, q], [n_uq, Some(g), n_ou], [e_uq, d, e_ou]);
        self.faces[g.0] = MeshFace::child(&other, [q, w, o], [n_wo, Some(f), n_qw], [e_wo, d, e_qw]);
        self.relink(n_uq, u, q, f);
        self.relink(n_wo, w, o, g);
        self.vertices[o.0].face = f;
        self.vertices[u.0].face = f;
        self.vertices[q.0].face = f;
        self.vertices[w.0].face = g;
        Some((f, g))
    }
}

fn push_unique(list: &mut Vec<FaceId>, f: FaceId) {
    if !list.contains(&f) {
        list.push(f);
    }
}
