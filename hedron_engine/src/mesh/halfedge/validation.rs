// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

fn violation<T>(rule: &'static str, element: impl std::fmt::Debug) -> MeshResult<T> {
    Err(MeshError::InvariantViolation {
        rule,
        element: format!("{element:?}"),
    })
}

impl MeshConnectivity {
    /// Purges staged erasures, then re-checks every structural invariant of
    /// the halfedge structure. An `Err` here signals a defect in whatever
    /// operator ran since the last validation, not a problem with user input:
    /// the caller's recovery policy is to discard the mesh, not to repair it.
    pub fn validate(&mut self) -> MeshResult<()> {
        self.purge_erased();
        self.check_invariants()
    }

    /// The read-only half of [`MeshConnectivity::validate`]. Assumes there are
    /// no staged erasures.
    pub fn check_invariants(&self) -> MeshResult<()> {
        // Per-element reference counts, gathered in one pass and checked
        // against the arena contents below.
        let mut halfedges_per_edge = HashMap::<EdgeId, usize>::new();
        let mut halfedges_per_face = HashMap::<FaceId, usize>::new();
        let mut outgoing_per_vertex = HashMap::<VertexId, usize>::new();
        let mut oriented_pairs = HashSet::<(VertexId, VertexId)>::new();

        for (h_id, h) in self.iter_halfedges() {
            let twin = match h.twin {
                Some(t) => t,
                None => return violation("halfedge has no twin", h_id),
            };
            let next = match h.next {
                Some(n) => n,
                None => return violation("halfedge has no next", h_id),
            };
            let vertex = match h.vertex {
                Some(v) => v,
                None => return violation("halfedge has no vertex", h_id),
            };
            let edge = match h.edge {
                Some(e) => e,
                None => return violation("halfedge has no edge", h_id),
            };

            if !self.halfedges.contains_key(twin) || self.pending_halfedges.contains(&twin) {
                return violation("halfedge twin points to an erased halfedge", h_id);
            }
            if !self.halfedges.contains_key(next) || self.pending_halfedges.contains(&next) {
                return violation("halfedge next points to an erased halfedge", h_id);
            }
            if !self.vertex_exists(vertex) {
                return violation("halfedge origin points to an erased vertex", h_id);
            }
            if !self.edges.contains_key(edge) || self.pending_edges.contains(&edge) {
                return violation("halfedge points to an erased edge", h_id);
            }
            if let Some(face) = h.face {
                if !self.faces.contains_key(face) || self.pending_faces.contains(&face) {
                    return violation("halfedge points to an erased face", h_id);
                }
                *halfedges_per_face.entry(face).or_insert(0) += 1;
            }

            // twin(twin(h)) == h, and a halfedge is never its own twin
            if twin == h_id {
                return violation("halfedge is its own twin", h_id);
            }
            if self[twin].twin != Some(h_id) {
                return violation("twin(twin(h)) != h", h_id);
            }
            if self[twin].edge != Some(edge) {
                return violation("halfedge and twin disagree on their edge", h_id);
            }

            *halfedges_per_edge.entry(edge).or_insert(0) += 1;
            *outgoing_per_vertex.entry(vertex).or_insert(0) += 1;

            // No two halfedges may connect the same pair of vertices with the
            // same orientation.
            let dst = match self[next].vertex {
                Some(v) => v,
                None => return violation("halfedge has no next", next),
            };
            if !oriented_pairs.insert((vertex, dst)) {
                return violation("duplicated oriented edge", h_id);
            }
        }

        // Following `next` from any halfedge must close a loop in which every
        // halfedge agrees on the face.
        let mut seen_in_loop = HashSet::<HalfEdgeId>::new();
        for (h0, h) in self.iter_halfedges() {
            if seen_in_loop.contains(&h0) {
                continue;
            }
            let face = h.face;
            let mut h_it = h0;
            let mut count = 0;
            loop {
                if count > MAX_LOOP_ITERATIONS {
                    return violation("next cycle does not close", h0);
                }
                count += 1;

                seen_in_loop.insert(h_it);
                if self[h_it].face != face {
                    return violation("halfedges of one loop disagree on their face", h_it);
                }
                h_it = self[h_it].next.expect("checked above");
                if h_it == h0 {
                    break;
                }
            }
        }

        // Each edge has exactly two halfedges, which are twins of each other,
        // and its reference halfedge points back at it.
        for (e_id, e) in self.iter_edges() {
            let h = match e.halfedge {
                Some(h) => h,
                None => return violation("edge has no halfedge", e_id),
            };
            if !self.halfedges.contains_key(h) || self.pending_halfedges.contains(&h) {
                return violation("edge points to an erased halfedge", e_id);
            }
            if self[h].edge != Some(e_id) {
                return violation("edge reference halfedge belongs to another edge", e_id);
            }
            if halfedges_per_edge.get(&e_id).copied().unwrap_or(0) != 2 {
                return violation("edge does not have exactly two halfedges", e_id);
            }
        }

        // A face's reference halfedge must be part of the face, and every
        // halfedge claiming the face must be in its loop. Comparing the loop
        // length against the reference count catches halfedges that claim a
        // face whose loop doesn't contain them.
        for (f_id, f) in self.iter_faces() {
            let h = match f.halfedge {
                Some(h) => h,
                None => return violation("face has no halfedge", f_id),
            };
            if !self.halfedges.contains_key(h) || self.pending_halfedges.contains(&h) {
                return violation("face points to an erased halfedge", f_id);
            }
            if self[h].face != Some(f_id) {
                return violation("face reference halfedge belongs to another face", f_id);
            }
            let degree = self.halfedge_loop(h).len();
            if halfedges_per_face.get(&f_id).copied().unwrap_or(0) != degree {
                return violation("face is claimed by halfedges outside its loop", f_id);
            }
        }

        // Each vertex must point at one of its outgoing halfedges, and its fan
        // (twin-next cycling) must reach all of them: anything else is a
        // non-manifold "bowtie" configuration.
        for (v_id, v) in self.iter_vertices() {
            let h0 = match v.halfedge {
                Some(h) => h,
                None => return violation("vertex has no halfedge", v_id),
            };
            if !self.halfedges.contains_key(h0) || self.pending_halfedges.contains(&h0) {
                return violation("vertex points to an erased halfedge", v_id);
            }
            if self[h0].vertex != Some(v_id) {
                return violation("vertex halfedge does not originate at the vertex", v_id);
            }

            let mut h_it = h0;
            let mut fan_count = 0;
            loop {
                if fan_count > MAX_LOOP_ITERATIONS {
                    return violation("vertex fan does not close", v_id);
                }
                fan_count += 1;
                h_it = self
                    .at_halfedge(h_it)
                    .cycle_around_fan()
                    .try_end()
                    .map_err(MeshError::from)?;
                if h_it == h0 {
                    break;
                }
            }
            if fan_count != outgoing_per_vertex.get(&v_id).copied().unwrap_or(0) {
                return violation("vertex fan does not cover all outgoing halfedges", v_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::primitives::Box;

    #[test]
    fn test_box_validates() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        mesh.validate().unwrap();
    }

    #[test]
    fn test_dangling_reference_is_detected() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        let v = mesh
            .read_connectivity()
            .iter_vertices()
            .next()
            .unwrap()
            .0;
        // Erasing a vertex without rewiring the surrounding topology must trip
        // the validation pass.
        mesh.write_connectivity().erase_vertex(v).unwrap();
        assert!(matches!(
            mesh.validate(),
            Err(MeshError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_double_erase_is_a_noop_error() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        let v = mesh
            .read_connectivity()
            .iter_vertices()
            .next()
            .unwrap()
            .0;
        let conn = mesh.write_connectivity();
        conn.erase_vertex(v).unwrap();
        assert!(matches!(conn.erase_vertex(v), Err(MeshError::NoOp(_))));
    }
}
