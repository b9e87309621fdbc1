// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use float_ord::FloatOrd;
use slotmap::SecondaryMap;

use super::edit_ops;
use crate::prelude::*;

/// The candidate collapse stored per edge: where the surviving vertex would
/// go and how much quadric error that placement accumulates.
struct EdgeRecord {
    optimal: Vec3,
    cost: f32,
}

/// The quadric of a face: the outer product of its plane equation (n, d) with
/// itself. Summing these over a neighborhood measures the squared distance of
/// a point to the neighborhood's planes.
fn face_quadric(conn: &MeshConnectivity, positions: &Positions, f: FaceId) -> Option<Mat4> {
    let normal = conn.face_normal(positions, f)?;
    let p0 = positions[conn.face_vertices(f)[0]];
    let plane = normal.extend(-normal.dot(p0));
    Some(Mat4::from_cols(
        plane * plane.x,
        plane * plane.y,
        plane * plane.z,
        plane * plane.w,
    ))
}

fn quadric_for(quadrics: &SecondaryMap<VertexId, Mat4>, v: VertexId) -> Mat4 {
    quadrics.get(v).copied().unwrap_or(Mat4::ZERO)
}

/// Builds the collapse candidate for `e` from the summed endpoint quadrics.
/// The optimal position minimizes the quadric form; when the system is
/// (near-)singular the edge midpoint is used instead.
fn edge_record(
    conn: &MeshConnectivity,
    positions: &Positions,
    quadrics: &SecondaryMap<VertexId, Mat4>,
    e: EdgeId,
) -> EdgeRecord {
    let (a, b) = conn.edge_endpoints(e);
    let k = quadric_for(quadrics, a) + quadric_for(quadrics, b);

    let a_mat = Mat3::from_cols(
        k.x_axis.truncate(),
        k.y_axis.truncate(),
        k.z_axis.truncate(),
    );
    let b_vec = k.w_axis.truncate();

    let optimal = if a_mat.determinant().abs() > 1e-10 {
        a_mat.inverse() * -b_vec
    } else {
        conn.edge_midpoint(positions, e)
    };

    let h = optimal.extend(1.0);
    EdgeRecord {
        optimal,
        cost: h.dot(k * h),
    }
}

/// Greedy quadric-error-metric simplification: repeatedly collapses the
/// cheapest edge until the mesh has at most `target_num_edges` edges.
///
/// Returns `Ok(true)` when the target was reached and `Ok(false)` when the
/// candidate queue ran dry first: every remaining edge either lies on the
/// boundary or its collapse was declined. The mesh is still valid in both
/// cases.
#[profiling::function]
pub fn simplify(mesh: &mut HalfEdgeMesh, target_num_edges: usize) -> MeshResult<bool> {
    let (conn, positions) = mesh.edit();

    // Every vertex accumulates the quadrics of its incident faces.
    let mut quadrics = SecondaryMap::<VertexId, Mat4>::new();
    for (f, _) in conn.iter_faces() {
        if let Some(q) = face_quadric(conn, positions, f) {
            for v in conn.face_vertices(f) {
                let sum = quadric_for(&quadrics, v) + q;
                quadrics.insert(v, sum);
            }
        }
    }

    // Candidates, cheapest first. The edge id breaks cost ties so the order
    // is deterministic.
    let mut records = SecondaryMap::<EdgeId, EdgeRecord>::new();
    let mut queue = BTreeSet::<(FloatOrd<f32>, EdgeId)>::new();
    for (e, _) in conn.iter_edges() {
        if conn.is_boundary_edge(e) {
            continue;
        }
        let record = edge_record(conn, positions, &quadrics, e);
        queue.insert((FloatOrd(record.cost), e));
        records.insert(e, record);
    }

    while conn.num_edges() > target_num_edges {
        let (cost, e) = match queue.iter().next() {
            Some(&entry) => entry,
            None => return Ok(false),
        };
        queue.remove(&(cost, e));
        let record = match records.remove(e) {
            Some(record) => record,
            None => continue,
        };

        // Pull every record touching the collapsing edge's endpoints out of
        // the queue before mutating the mesh. They are rebuilt around the
        // surviving vertex afterwards, or restored verbatim if the collapse
        // declines.
        let (a, b) = conn.edge_endpoints(e);
        let mut parked = Vec::new();
        for v in [a, b] {
            for h in conn.at_vertex(v).outgoing_halfedges()? {
                let e2 = conn.at_halfedge(h).edge().try_end()?;
                if e2 == e {
                    continue;
                }
                if let Some(r) = records.remove(e2) {
                    queue.remove(&(FloatOrd(r.cost), e2));
                    parked.push((e2, r));
                }
            }
        }

        match edit_ops::collapse_edge(conn, positions, e) {
            Ok(v) => {
                positions[v] = record.optimal;
                let merged = quadric_for(&quadrics, a) + quadric_for(&quadrics, b);
                quadrics.insert(v, merged);
                conn.purge_erased();

                for h in conn.at_vertex(v).outgoing_halfedges()? {
                    let e2 = conn.at_halfedge(h).edge().try_end()?;
                    if conn.is_boundary_edge(e2) {
                        continue;
                    }
                    let r = edge_record(conn, positions, &quadrics, e2);
                    queue.insert((FloatOrd(r.cost), e2));
                    records.insert(e2, r);
                }
            }
            Err(MeshError::NoOp(_)) => {
                // This edge cannot be collapsed; drop it from the queue for
                // good and put its untouched neighborhood back.
                for (e2, r) in parked {
                    queue.insert((FloatOrd(r.cost), e2));
                    records.insert(e2, r);
                }
            }
            Err(other) => return Err(other),
        }
    }

    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::halfedge::subdivision::triangulate;
    use crate::prelude::primitives::{Box, Tetrahedron};

    #[test]
    fn test_simplify_reaches_target() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();
        assert_eq!(mesh.read_connectivity().num_edges(), 18);

        assert!(simplify(&mut mesh, 12).unwrap());
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert!(conn.num_edges() <= 12);
        // Each collapse removes one vertex, three edges and two faces, so a
        // closed surface stays closed.
        assert_eq!(conn.num_vertices() + conn.num_faces(), conn.num_edges() + 2);
    }

    #[test]
    fn test_simplify_with_met_target_is_a_noop() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();

        assert!(simplify(&mut mesh, 100).unwrap());
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_edges(), 18);
        assert_eq!(conn.num_vertices(), 8);
    }

    #[test]
    fn test_simplify_stops_when_no_edge_is_collapsible() {
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        // The tetrahedron degenerates after one collapse; from there on every
        // candidate declines and the pass reports it could not reach zero.
        assert!(!simplify(&mut mesh, 0).unwrap());
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 3);
        assert_eq!(conn.num_edges(), 3);
        assert_eq!(conn.num_faces(), 2);
    }

    #[test]
    fn test_simplify_never_adds_edges() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();

        let mut last = mesh.read_connectivity().num_edges();
        for target in (0..18).rev() {
            let _ = simplify(&mut mesh, target).unwrap();
            let now = mesh.read_connectivity().num_edges();
            assert!(now <= last);
            last = now;
        }
        mesh.validate().unwrap();
    }
}
