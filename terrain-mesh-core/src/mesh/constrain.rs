use super::{predicates, EdgeFlags, FaceId, TerrainMesh, VertexId, VertexSource};
use crate::{
    coord::Coord,
    error::{MeshError, MeshResult},
};
use std::collections::VecDeque;

/// Looser collinearity tolerance for vertices lying on a constraint segment.
const ON_SEGMENT_EPSILON: crate::Scalar = 1.0e-9;

enum Trace {
    /// Segment runs along an existing vertex before reaching the target.
    Vertex(VertexId),
    /// Segment crosses these edges (right, left) and ends at the vertex.
    Crossing(Vec<(VertexId, VertexId)>, VertexId),
}

impl TerrainMesh {
    /// Forces segment `a`-`b` into the triangulation as a chain of constrained edges.
    ///
    /// Vertices lying on the segment split it. Crossed constrained edges are split at the
    /// intersection with linearly interpolated height. Returns affected faces.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
    /// let seeds = bounds.corners().iter().map(|c| (*c, 0.0)).collect::<Vec<_>>();
    /// let mut mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
    /// let a = mesh.insert_point(Coord::new(0.1, 0.5), 0.0, None).unwrap().vertex;
    /// let b = mesh.insert_point(Coord::new(0.9, 0.5), 0.0, None).unwrap().vertex;
    /// mesh.insert_constraint(a, b, EdgeFlags::constraint(false)).unwrap();
    /// assert!(mesh.is_constrained(a, b));
    /// assert!(mesh.check_topology().is_ok());
    /// ```
    pub fn insert_constraint(
        &mut self,
        a: VertexId,
        b: VertexId,
        flags: EdgeFlags,
    ) -> MeshResult<Vec<FaceId>> {
        let mut affected = vec![];
        let mut work = vec![(a, b)];
        let limit = 4 * (self.faces.len() + 64);
        let mut guard = 0;
        while let Some((a, b)) = work.pop() {
            guard += 1;
            if guard > limit {
                return Err(self.constraint_error(a, b));
            }
            if a == b {
                continue;
            }
            if let Some((f, i)) = self.find_edge(a, b) {
                self.set_edge_flags(f, i, flags);
                continue;
            }
            match self.trace_segment(a, b)? {
                Trace::Vertex(c) => {
                    work.push((c, b));
                    work.push((a, c));
                }
                Trace::Crossing(crossing, c) => {
                    if let Some((u, w)) = crossing
                        .iter()
                        .copied()
                        .find(|(u, w)| self.is_constrained(*u, *w))
                    {
                        self.split_crossed_constraint(a, b, u, w, &mut affected)?;
                        work.push((a, b));
                        continue;
                    }
                    self.remove_crossings(a, c, crossing, &mut affected)?;
                    let (f, i) = self
                        .find_edge(a, c)
                        .ok_or_else(|| self.constraint_error(a, c))?;
                    self.set_edge_flags(f, i, flags);
                    if c != b {
                        work.push((c, b));
                    }
                }
            }
        }
        affected.sort();
        affected.dedup();
        Ok(affected)
    }

    fn constraint_error(&self, a: VertexId, b: VertexId) -> MeshError {
        let pa = self.vertices[a.0].pos;
        let pb = self.vertices[b.0].pos;
        MeshError::Constraint(pa.x, pa.y, pb.x, pb.y)
    }

    fn on_segment(&self, pa: Coord, pb: Coord, v: VertexId) -> bool {
        let p = self.vertices[v.0].pos;
        predicates::orient_sign_eps(pa, pb, p, ON_SEGMENT_EPSILON) == 0
            && (p - pa).dot(pb - pa) > 0.0
            && (p - pa).sqr_magnitude() < (pb - pa).sqr_magnitude()
    }

    /// Walks from `a` towards `b` collecting crossed edges.
    fn trace_segment(&self, a: VertexId, b: VertexId) -> MeshResult<Trace> {
        let pa = self.vertices[a.0].pos;
        let pb = self.vertices[b.0].pos;
        let mut start = None;
        for f in self.faces_around(a) {
            let face = &self.faces[f.0];
            let Some(k) = face.index_of(a) else {
                continue;
            };
            let u = face.vertices[(k + 1) % 3];
            let w = face.vertices[(k + 2) % 3];
            for x in [u, w] {
                if x == b {
                    return Err(self.constraint_error(a, b));
                }
                if self.on_segment(pa, pb, x) {
                    return Ok(Trace::Vertex(x));
                }
            }
            let su = predicates::orient_sign(pa, pb, self.vertices[u.0].pos);
            let sw = predicates::orient_sign(pa, pb, self.vertices[w.0].pos);
            if su < 0 && sw > 0 {
                start = Some((f, k, u, w));
                break;
            }
        }
        let (mut f, mut k, mut u, mut w) = start.ok_or_else(|| self.constraint_error(a, b))?;
        let mut crossing = vec![(u, w)];
        for _ in 0..=self.faces.len() {
            let g = self.faces[f.0].neighbors[k].ok_or_else(|| self.constraint_error(a, b))?;
            let other = &self.faces[g.0];
            let j = (0..3)
                .find(|j| other.edge(*j) == (w, u))
                .ok_or_else(|| self.constraint_error(a, b))?;
            let q = other.vertices[j];
            if q == b || self.on_segment(pa, pb, q) {
                return Ok(Trace::Crossing(crossing, q));
            }
            if predicates::orient_sign(pa, pb, self.vertices[q.0].pos) < 0 {
                u = q;
                k = (j + 2) % 3;
            } else {
                w = q;
                k = (j + 1) % 3;
            }
            crossing.push((u, w));
            f = g;
        }
        Err(self.constraint_error(a, b))
    }

    /// Splits constrained edge `u`-`w` where segment `a`-`b` crosses it.
    fn split_crossed_constraint(
        &mut self,
        a: VertexId,
        b: VertexId,
        u: VertexId,
        w: VertexId,
        affected: &mut Vec<FaceId>,
    ) -> MeshResult<()> {
        let pa = self.vertices[a.0].pos;
        let pb = self.vertices[b.0].pos;
        let pu = self.vertices[u.0].pos;
        let pw = self.vertices[w.0].pos;
        let (p, t) = predicates::line_intersection(pa, pb, pu, pw)
            .ok_or_else(|| self.constraint_error(a, b))?;
        let t = t.clamp(0.0, 1.0);
        let height = self.vertices[u.0].height * (1.0 - t) + self.vertices[w.0].height * t;
        let (f, i) = self
            .find_edge(u, w)
            .ok_or_else(|| self.constraint_error(u, w))?;
        log::debug!("Constraint crossing split at {:?}", p);
        let ins = self.split_edge(f, i, p, height);
        let explicit = self.vertices[u.0].explicit_height && self.vertices[w.0].explicit_height;
        let vertex = &mut self.vertices[ins.vertex.0];
        vertex.source = VertexSource::Constraint;
        vertex.explicit_height = explicit;
        affected.extend(ins.affected);
        Ok(())
    }

    /// Flips away every edge crossing segment `a`-`c`, then restores Delaunay around new edges.
    fn remove_crossings(
        &mut self,
        a: VertexId,
        c: VertexId,
        crossing: Vec<(VertexId, VertexId)>,
        affected: &mut Vec<FaceId>,
    ) -> MeshResult<()> {
        let pa = self.vertices[a.0].pos;
        let pc = self.vertices[c.0].pos;
        let limit = 4 * crossing.len() * crossing.len() + 64;
        let mut queue = VecDeque::from(crossing);
        let mut created = vec![];
        let mut guard = 0;
        while let Some((u, w)) = queue.pop_front() {
            guard += 1;
            if guard > limit {
                return Err(self.constraint_error(a, c));
            }
            let (f, i) = self
                .find_edge(u, w)
                .ok_or_else(|| self.constraint_error(a, c))?;
            let o = self.faces[f.0].vertices[i];
            match self.flip(f, i) {
                Some((f, g)) => {
                    affected.push(f);
                    affected.push(g);
                    let q = self.faces[f.0].vertices[2];
                    let po = self.vertices[o.0].pos;
                    let pq = self.vertices[q.0].pos;
                    if predicates::segments_cross(pa, pc, po, pq) {
                        queue.push_back((o, q));
                    } else {
                        created.push((o, q));
                    }
                }
                None => queue.push_back((u, w)),
            }
        }
        let (f, i) = self
            .find_edge(a, c)
            .ok_or_else(|| self.constraint_error(a, c))?;
        // marked before legalizing so the new constraint is never flipped away
        self.set_edge_flags(f, i, EdgeFlags::constraint(false));
        let mut edges = created
            .into_iter()
            .filter(|(x, y)| !((*x == a && *y == c) || (*x == c && *y == a)))
            .collect::<Vec<_>>();
        for f in affected.iter() {
            let face = &self.faces[f.0];
            edges.extend((0..3).map(|i| face.edge(i)));
        }
        self.legalize_edges(edges, affected);
        Ok(())
    }
}
