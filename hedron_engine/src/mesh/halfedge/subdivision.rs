// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slotmap::SecondaryMap;

use super::edit_ops;
use crate::prelude::*;

/// Splits every face of the mesh into a triangle fan rooted at its first
/// vertex. Triangles are left untouched, so the pass is idempotent.
#[profiling::function]
pub fn triangulate(conn: &mut MeshConnectivity) -> MeshResult<()> {
    let faces = conn.iter_faces().map(|(f, _)| f).collect::<Vec<_>>();
    for f in faces {
        while conn.face_degree(f) > 3 {
            let verts = conn.face_vertices(f);
            // The remainder polygon keeps the id `f`, with its reference
            // halfedge on the new diagonal. The next iteration fans out from
            // the same root vertex.
            edit_ops::cut_face(conn, f, verts[0], verts[2])?;
        }
    }
    Ok(())
}

/// Replaces the mesh with its subdivided version: one vertex per original
/// vertex, edge and face, and one quad per (vertex, face) incidence. The
/// positions of the new vertices are given by the three channels.
fn rebuild_with_midpoints(
    mesh: &HalfEdgeMesh,
    v_pos: &SecondaryMap<VertexId, Vec3>,
    e_pos: &SecondaryMap<EdgeId, Vec3>,
    f_pos: &SecondaryMap<FaceId, Vec3>,
) -> MeshResult<HalfEdgeMesh> {
    let conn = mesh.read_connectivity();

    let mut positions = Vec::new();
    let mut v_idx = SecondaryMap::<VertexId, usize>::new();
    let mut e_idx = SecondaryMap::<EdgeId, usize>::new();
    let mut f_idx = SecondaryMap::<FaceId, usize>::new();
    for (v, _) in conn.iter_vertices() {
        v_idx.insert(v, positions.len());
        positions.push(v_pos[v]);
    }
    for (e, _) in conn.iter_edges() {
        e_idx.insert(e, positions.len());
        positions.push(e_pos[e]);
    }
    for (f, _) in conn.iter_faces() {
        f_idx.insert(f, positions.len());
        positions.push(f_pos[f]);
    }

    // Each corner of each face becomes a quad: original vertex, outgoing edge
    // midpoint, face point, incoming edge midpoint. This winding matches the
    // original face's.
    let mut quads = Vec::new();
    for (f, _) in conn.iter_faces() {
        let halfedges = conn.face_edges(f);
        for (i, &h) in halfedges.iter().enumerate() {
            let h_prev = halfedges[(i + halfedges.len() - 1) % halfedges.len()];
            quads.push([
                v_idx[conn.at_halfedge(h).vertex().end()],
                e_idx[conn.at_halfedge(h).edge().end()],
                f_idx[f],
                e_idx[conn.at_halfedge(h_prev).edge().end()],
            ]);
        }
    }

    let mut new_mesh =
        HalfEdgeMesh::build_from_polygons(&positions, &quads).map_err(|err| {
            MeshError::InvariantViolation {
                rule: "subdivision produced a non-manifold mesh",
                element: err.to_string(),
            }
        })?;
    new_mesh.flip_orientation = mesh.flip_orientation;
    Ok(new_mesh)
}

/// Linear (midpoint) subdivision: each face becomes one quad per corner, and
/// every new vertex lies on the surface of the original mesh. Works on meshes
/// with boundary.
#[profiling::function]
pub fn subdivide_linear(mesh: &mut HalfEdgeMesh) -> MeshResult<()> {
    let conn = mesh.read_connectivity();
    let positions = mesh.read_positions();

    let mut v_pos = SecondaryMap::new();
    for (v, _) in conn.iter_vertices() {
        v_pos.insert(v, positions[v]);
    }
    let mut e_pos = SecondaryMap::new();
    for (e, _) in conn.iter_edges() {
        e_pos.insert(e, conn.edge_midpoint(positions, e));
    }
    let mut f_pos = SecondaryMap::new();
    for (f, _) in conn.iter_faces() {
        f_pos.insert(f, conn.face_vertex_average(positions, f));
    }

    *mesh = rebuild_with_midpoints(mesh, &v_pos, &e_pos, &f_pos)?;
    Ok(())
}

/// Catmull-Clark subdivision. Same connectivity as [`subdivide_linear`], but
/// the new vertices are placed by the Catmull-Clark smoothing rules. Only
/// defined for meshes without boundary.
#[profiling::function]
pub fn subdivide_catmull_clark(mesh: &mut HalfEdgeMesh) -> MeshResult<()> {
    let conn = mesh.read_connectivity();
    let positions = mesh.read_positions();

    if conn.has_boundary() {
        return Err(MeshError::UnsupportedConfiguration(
            "Catmull-Clark subdivision requires a mesh without boundary",
        ));
    }

    // Face points: the centroid of each face
    let mut f_pos = SecondaryMap::new();
    for (f, _) in conn.iter_faces() {
        f_pos.insert(f, conn.face_vertex_average(positions, f));
    }

    // Edge points: average of the endpoints and the two face points
    let mut e_pos = SecondaryMap::new();
    for (e, _) in conn.iter_edges() {
        let (a, b) = conn.edge_endpoints(e);
        let h = conn.at_edge(e).halfedge().try_end()?;
        let f1 = conn.at_halfedge(h).face().try_end()?;
        let f2 = conn.at_halfedge(h).twin().face().try_end()?;
        e_pos.insert(
            e,
            (positions[a] + positions[b] + f_pos[f1] + f_pos[f2]) / 4.0,
        );
    }

    // Vertex points: (Q + 2R + (n - 3)S) / n, where Q averages the adjacent
    // face points, R averages the incident edge midpoints and S is the
    // original position.
    let mut v_pos = SecondaryMap::new();
    for (v, _) in conn.iter_vertices() {
        let outgoing = conn.at_vertex(v).outgoing_halfedges()?;
        let n = outgoing.len() as f32;
        let q = conn
            .at_vertex(v)
            .adjacent_faces()?
            .iter()
            .map(|f| f_pos[*f])
            .fold(Vec3::ZERO, |a, b| a + b)
            / n;
        let r = outgoing
            .iter()
            .map(|h| {
                let e = conn.at_halfedge(*h).edge().end();
                conn.edge_midpoint(positions, e)
            })
            .fold(Vec3::ZERO, |a, b| a + b)
            / n;
        let s = positions[v];
        v_pos.insert(v, (q + 2.0 * r + (n - 3.0) * s) / n);
    }

    *mesh = rebuild_with_midpoints(mesh, &v_pos, &e_pos, &f_pos)?;
    Ok(())
}

/// Loop subdivision. Each triangle is split into four by inserting a vertex
/// on every edge, and both old and new vertices are smoothed by the Loop
/// weights. Only defined for triangle meshes without boundary.
#[profiling::function]
pub fn loop_subdivide(mesh: &mut HalfEdgeMesh) -> MeshResult<()> {
    {
        let conn = mesh.read_connectivity();
        if conn.has_boundary() {
            return Err(MeshError::UnsupportedConfiguration(
                "Loop subdivision requires a mesh without boundary",
            ));
        }
        if conn.iter_faces().any(|(f, _)| conn.face_degree(f) != 3) {
            return Err(MeshError::UnsupportedConfiguration(
                "Loop subdivision requires a triangle mesh",
            ));
        }
    }

    let (conn, positions) = mesh.edit();

    // Smoothed positions for the original vertices:
    // (1 - n*u) * old + u * sum(neighbors), u = 3/16 at valence three and
    // 3/(8n) elsewhere.
    let mut target_pos = SecondaryMap::<VertexId, Vec3>::new();
    let original_vertices = conn.iter_vertices().map(|(v, _)| v).collect::<Vec<_>>();
    for v in original_vertices {
        let neighbors = conn.at_vertex(v).adjacent_vertices()?;
        let n = neighbors.len() as f32;
        let u = if neighbors.len() == 3 {
            3.0 / 16.0
        } else {
            3.0 / (8.0 * n)
        };
        let neighbor_sum = neighbors
            .iter()
            .map(|w| positions[*w])
            .fold(Vec3::ZERO, |a, b| a + b);
        target_pos.insert(v, (1.0 - n * u) * positions[v] + u * neighbor_sum);
    }

    // Positions for the midpoint vertices: 3/8 of the endpoints plus 1/8 of
    // the two opposite apexes. Computed before any split so all reads see the
    // original control mesh.
    let original_edges = conn.iter_edges().map(|(e, _)| e).collect::<Vec<_>>();
    let mut edge_point_pos = SecondaryMap::<EdgeId, Vec3>::new();
    for &e in &original_edges {
        let (a, b) = conn.edge_endpoints(e);
        let h = conn.at_edge(e).halfedge().try_end()?;
        let c = conn.at_halfedge(h).next().dst_vertex().try_end()?;
        let d = conn.at_halfedge(h).twin().next().dst_vertex().try_end()?;
        edge_point_pos.insert(
            e,
            0.375 * (positions[a] + positions[b]) + 0.125 * (positions[c] + positions[d]),
        );
    }

    // Split every original edge. The cuts made by each split connect the
    // midpoint to the two opposite corners; those transverse edges are the
    // ones that may need flipping below.
    let mut new_vertices = HashSet::new();
    let mut transverse_edges = Vec::new();
    for &e in &original_edges {
        let (a, b) = conn.edge_endpoints(e);
        let x = edit_ops::split_edge(conn, positions, e)?;
        new_vertices.insert(x);
        target_pos.insert(x, edge_point_pos[e]);
        for h in conn.at_vertex(x).outgoing_halfedges()? {
            let dst = conn.at_halfedge(h).dst_vertex().try_end()?;
            if dst != a && dst != b {
                transverse_edges.push(conn.at_halfedge(h).edge().try_end()?);
            }
        }
    }

    // Flip every transverse edge that connects an old vertex with a new one.
    // This is what turns the fan pattern left by the splits into the uniform
    // one-to-four pattern.
    for e in transverse_edges {
        let (p, q) = conn.edge_endpoints(e);
        if new_vertices.contains(&p) != new_vertices.contains(&q) {
            edit_ops::flip_edge(conn, e)?;
        }
    }

    for (v, p) in target_pos.iter() {
        positions[v] = *p;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::primitives::{Box, Quad};

    #[test]
    fn test_triangulate_box() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 8);
        assert_eq!(conn.num_edges(), 18);
        assert_eq!(conn.num_faces(), 12);
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.face_degree(f), 3);
        }
    }

    #[test]
    fn test_triangulate_is_idempotent() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        triangulate(mesh.write_connectivity()).unwrap();
        let counts = {
            let conn = mesh.read_connectivity();
            (conn.num_vertices(), conn.num_edges(), conn.num_faces())
        };
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(
            counts,
            (conn.num_vertices(), conn.num_edges(), conn.num_faces())
        );
    }

    #[test]
    fn test_linear_subdivide_box() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        subdivide_linear(&mut mesh).unwrap();
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 26);
        assert_eq!(conn.num_edges(), 48);
        assert_eq!(conn.num_faces(), 24);
        assert!(!conn.has_boundary());

        // Linear subdivision does not smooth: the original corners and the
        // edge midpoints stay on the original surface.
        let on_surface = |p: Vec3| {
            p.x.abs().max(p.y.abs()).max(p.z.abs()) > 1.0 - 1e-6
        };
        for (v, _) in conn.iter_vertices() {
            assert!(on_surface(mesh.read_positions()[v]));
        }
    }

    #[test]
    fn test_linear_subdivide_keeps_boundary() {
        let mut mesh = Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, glam::Vec2::ONE);
        subdivide_linear(&mut mesh).unwrap();
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 9);
        assert_eq!(conn.num_edges(), 12);
        assert_eq!(conn.num_faces(), 4);
        assert!(conn.has_boundary());
    }

    #[test]
    fn test_catmull_clark_box() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        subdivide_catmull_clark(&mut mesh).unwrap();
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 26);
        assert_eq!(conn.num_edges(), 48);
        assert_eq!(conn.num_faces(), 24);

        // Smoothing pulls every vertex strictly inside the original box
        for (v, _) in conn.iter_vertices() {
            let p = mesh.read_positions()[v];
            assert!(p.x.abs() < 1.0 && p.y.abs() < 1.0 && p.z.abs() < 1.0);
        }
    }

    #[test]
    fn test_catmull_clark_declines_boundary() {
        let mut mesh = Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, glam::Vec2::ONE);
        assert!(matches!(
            subdivide_catmull_clark(&mut mesh),
            Err(MeshError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_loop_subdivide_box() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        triangulate(mesh.write_connectivity()).unwrap();
        mesh.validate().unwrap();

        loop_subdivide(&mut mesh).unwrap();
        mesh.validate().unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 26);
        assert_eq!(conn.num_edges(), 72);
        assert_eq!(conn.num_faces(), 48);
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.face_degree(f), 3);
        }
    }

    #[test]
    fn test_loop_subdivide_requires_triangles() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        assert!(matches!(
            loop_subdivide(&mut mesh),
            Err(MeshError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_loop_subdivide_declines_boundary() {
        let mut mesh = Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, glam::Vec2::ONE);
        triangulate(mesh.write_connectivity()).unwrap();
        assert!(matches!(
            loop_subdivide(&mut mesh),
            Err(MeshError::UnsupportedConfiguration(_))
        ));
    }
}
