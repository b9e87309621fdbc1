// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

/// Divides an edge, creating a vertex in between and a new pair of halfedges.
///
/// ## Id Stability
/// Let (v, w) the (src, dst) endpoints of h, and x the new vertex id. It is
/// guaranteed that on the new mesh, the halfedge "h" will remain on the second
/// half of the edge, that is, from x to w. The new edge will go from v to x.
/// Note that this is done in combination with the chamfer operation, whose
/// stability depends on this behavior.
pub fn divide_edge(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    h: HalfEdgeId,
    interpolation_factor: f32,
) -> MeshResult<VertexId> {
    // Select the necessary data elements
    let h_l = h;
    let h_r = conn.at_halfedge(h_l).twin().try_end()?;
    let h_l_prev = conn.at_halfedge(h_l).previous().try_end()?;
    let h_r_next = conn.at_halfedge(h_r).next().try_end()?;
    let f_l = conn.at_halfedge(h_l).face().try_end().ok();
    let f_r = conn.at_halfedge(h_r).face().try_end().ok();
    let e = conn.at_halfedge(h_l).edge().try_end()?;
    let (v, w) = conn.at_halfedge(h).src_dst_pair()?;

    // Calculate the new vertex position
    let pos = positions[v].lerp(positions[w], interpolation_factor);

    // Allocate new elements
    let x = conn.alloc_vertex(positions, pos, None);
    let h_l_2 = conn.alloc_halfedge(HalfEdge::default());
    let h_r_2 = conn.alloc_halfedge(HalfEdge::default());
    let e_2 = conn.alloc_edge(Some(h_l_2));

    // --- Update connectivity ---

    // Next pointers
    conn[h_l_2].next = Some(h_l);
    conn[h_l_prev].next = Some(h_l_2);
    conn[h_r].next = Some(h_r_2);
    conn[h_r_2].next = Some(h_r_next);

    // Twin pointers
    conn[h_l_2].twin = Some(h_r_2);
    conn[h_r_2].twin = Some(h_l_2);

    // Vertex pointers
    conn[h_l].vertex = Some(x);
    conn[h_r].vertex = Some(w);
    conn[h_r_2].vertex = Some(x);
    conn[h_l_2].vertex = Some(v);

    // Face pointers: May be None for boundary
    conn[h_l_2].face = f_l;
    conn[h_r_2].face = f_r;

    // Edge pointers: the original edge keeps the second half
    conn[h_l_2].edge = Some(e_2);
    conn[h_r_2].edge = Some(e_2);
    conn[e].halfedge = Some(h_l);

    conn[x].halfedge = Some(h_l);
    conn[v].halfedge = Some(h_l_2);

    Ok(x)
}

/// Returns a face both `v` and `w` are part of, if any.
fn find_shared_face(conn: &MeshConnectivity, v: VertexId, w: VertexId) -> Option<FaceId> {
    let faces = conn.at_vertex(v).adjacent_faces().ok()?;
    faces
        .into_iter()
        .find(|f| conn.face_vertices(*f).contains(&w))
}

/// Cuts `face` by creating a new edge between vertices `v` and `w`. The
/// vertices must be part of the face, but must not share an edge.
pub fn cut_face(
    conn: &mut MeshConnectivity,
    face: FaceId,
    v: VertexId,
    w: VertexId,
) -> MeshResult<HalfEdgeId> {
    if conn.at_vertex(v).halfedge_to(w).try_end().is_ok() {
        return Err(MeshError::NoOp("cut_face: v and w cannot share an edge"));
    }

    let face_halfedges = conn.face_edges(face);
    if face_halfedges.len() <= 3 {
        return Err(MeshError::NoOp("cut_face: only works for quads or higher"));
    }

    let v_idx = face_halfedges
        .iter()
        .position(|h| conn.at_halfedge(*h).vertex().end() == v)
        .ok_or(MeshError::NoOp("cut_face: v is not part of the face"))? as i32;
    let w_idx = face_halfedges
        .iter()
        .position(|h| conn.at_halfedge(*h).vertex().end() == w)
        .ok_or(MeshError::NoOp("cut_face: w is not part of the face"))? as i32;

    // NOTE: Use rem euclid so negative indices wrap up back at the end
    let h_vprev_v = face_halfedges[(v_idx - 1).rem_euclid(face_halfedges.len() as i32) as usize];
    let h_v_vnext = face_halfedges[v_idx as usize];
    let h_wprev_w = face_halfedges[(w_idx - 1).rem_euclid(face_halfedges.len() as i32) as usize];
    let h_w_wnext = face_halfedges[w_idx as usize];

    // Create new data
    let h_v_w = conn.alloc_halfedge(HalfEdge::default());
    let h_w_v = conn.alloc_halfedge(HalfEdge::default());
    let new_edge = conn.alloc_edge(Some(h_v_w));
    let new_face = conn.alloc_face(None);

    conn[h_v_w].vertex = Some(v);
    conn[h_w_v].vertex = Some(w);

    conn[h_v_w].face = Some(face);
    conn[h_w_v].face = Some(new_face);

    conn[h_v_w].twin = Some(h_w_v);
    conn[h_w_v].twin = Some(h_v_w);

    conn[h_v_w].edge = Some(new_edge);
    conn[h_w_v].edge = Some(new_edge);

    conn[h_v_w].next = Some(h_w_wnext);
    conn[h_w_v].next = Some(h_v_vnext);

    conn[new_face].halfedge = Some(h_w_v);
    conn[face].halfedge = Some(h_v_w);

    // Fix connectivity

    conn[h_vprev_v].next = Some(h_v_w);
    conn[h_wprev_w].next = Some(h_w_v);

    // The halfedges of the original face that fall on the new face
    let (start, end) = {
        let start = v_idx;
        let mut end = (w_idx - 1).rem_euclid(face_halfedges.len() as i32);
        if end < start {
            end += face_halfedges.len() as i32
        }
        (start, end)
    };
    for i in start..=end {
        let h = face_halfedges[i as usize % face_halfedges.len()];
        conn[h].face = Some(new_face);
    }

    Ok(h_v_w)
}

/// Removes `v` and all its incident edges and faces, merging the surrounding
/// faces into one new face whose boundary is the outer ring of halfedges
/// around `v`. Declines on boundary vertices: this is an interior-only
/// operation.
pub fn erase_vertex(conn: &mut MeshConnectivity, v: VertexId) -> MeshResult<FaceId> {
    if conn.is_boundary_vertex(v) {
        return Err(MeshError::NoOp("cannot erase a boundary vertex"));
    }
    let outgoing = conn.at_vertex(v).outgoing_halfedges()?;
    if outgoing.is_empty() {
        return Err(MeshError::NoOp("vertex is not part of any face"));
    }

    let new_face = conn.alloc_face(None);

    let mut to_delete = SVecN::<_, 16>::new();

    // Fix next pointers for edges in the new face
    for h in outgoing.iter_cpy() {
        let tw = conn.at_halfedge(h).twin().try_end()?;
        let w = conn.at_halfedge(tw).vertex().try_end()?;
        let nxt = conn.at_halfedge(h).next().try_end()?;
        let prv = conn.at_halfedge(tw).previous().try_end()?;
        let f = conn.at_halfedge(h).face().try_end()?;
        let e = conn.at_halfedge(h).edge().try_end()?;
        conn[prv].next = Some(nxt);
        if conn[w].halfedge == Some(tw) {
            conn[w].halfedge = Some(nxt);
        }

        // We cannot safely remove data at this point, because it could be
        // accessed during `previous()` traversal. Erasure is staged after the
        // outer ring is fully rewired.
        to_delete.push((tw, h, f, e));
    }

    // Set all halfedges to the same face
    let outer_loop = conn.halfedge_loop(conn.at_halfedge(outgoing[0]).next().try_end()?);
    for h in outer_loop.iter_cpy() {
        conn[h].face = Some(new_face);
    }
    conn[new_face].halfedge = Some(outer_loop[0]);

    conn.erase_vertex(v)?;
    for (tw, h, f, e) in to_delete {
        conn.erase_halfedge(tw)?;
        conn.erase_halfedge(h)?;
        conn.erase_face(f)?;
        conn.erase_edge(e)?;
    }

    Ok(new_face)
}

/// Removes `e`, merging its two incident faces together. The face on the side
/// of the edge's reference halfedge is kept. Declines on boundary edges and
/// when both sides are the same face, since that removal would disconnect the
/// surface.
pub fn erase_edge(conn: &mut MeshConnectivity, e: EdgeId) -> MeshResult<FaceId> {
    if conn.is_boundary_edge(e) {
        return Err(MeshError::NoOp("cannot erase a boundary edge"));
    }

    // --- Collect handles ---
    let h_l = conn.at_edge(e).halfedge().try_end()?;
    let h_r = conn.at_halfedge(h_l).twin().try_end()?;
    let f_l = conn.at_halfedge(h_l).face().try_end()?;
    let f_r = conn.at_halfedge(h_r).face().try_end()?;
    if f_l == f_r {
        return Err(MeshError::NoOp("erasing the edge would disconnect the face"));
    }
    let (v, w) = conn.at_halfedge(h_l).src_dst_pair()?;

    let h_l_nxt = conn.at_halfedge(h_l).next().try_end()?;
    let h_l_prv = conn.at_halfedge(h_l).previous().try_end()?;
    let h_r_nxt = conn.at_halfedge(h_r).next().try_end()?;
    let h_r_prv = conn.at_halfedge(h_r).previous().try_end()?;

    let halfedges_r = conn.halfedge_loop(h_r);

    // --- Fix connectivity ---
    conn[h_r_prv].next = Some(h_l_nxt);
    conn[h_l_prv].next = Some(h_r_nxt);
    for h in halfedges_r {
        conn[h].face = Some(f_l);
    }
    // Faces or vertices may point to the halfedge we're about to remove. In
    // that case we need to rotate them. We only do it in that case, to avoid
    // modifying the mesh more than necessary.
    if conn[f_l].halfedge == Some(h_l) {
        conn[f_l].halfedge = Some(h_l_prv);
    }
    if conn[v].halfedge == Some(h_l) {
        conn[v].halfedge = Some(h_r_nxt);
    }
    if conn[w].halfedge == Some(h_r) {
        conn[w].halfedge = Some(h_l_nxt);
    }

    // --- Remove elements ---
    conn.erase_halfedge(h_l)?;
    conn.erase_halfedge(h_r)?;
    conn.erase_face(f_r)?;
    conn.erase_edge(e)?;

    Ok(f_l)
}

/// Per-side data captured before a collapse mutates anything. Only present
/// for triangular sides, which get fully deleted by the collapse.
struct TriangleSide {
    face: FaceId,
    /// The two face halfedges other than the one being collapsed
    n: HalfEdgeId,
    p: HalfEdgeId,
    /// Their twins, which survive and become twins of each other
    outer_n: HalfEdgeId,
    outer_p: HalfEdgeId,
    apex: VertexId,
    /// Of the two merged edges, the one that is kept / dropped
    edge_keep: EdgeId,
    edge_drop: EdgeId,
}

fn capture_triangle_side(
    conn: &MeshConnectivity,
    h_side: HalfEdgeId,
    w: VertexId,
) -> MeshResult<TriangleSide> {
    let face = conn.at_halfedge(h_side).face().try_end()?;
    let n = conn.at_halfedge(h_side).next().try_end()?;
    let p = conn.at_halfedge(n).next().try_end()?;
    let outer_n = conn.at_halfedge(n).twin().try_end()?;
    let outer_p = conn.at_halfedge(p).twin().try_end()?;
    let apex = conn.at_halfedge(p).vertex().try_end()?;
    let e_n = conn.at_halfedge(n).edge().try_end()?;
    let e_p = conn.at_halfedge(p).edge().try_end()?;

    // Keep the merged edge that is not incident to the vanishing vertex, so
    // the surviving edge's endpoints are already correct.
    let (edge_keep, edge_drop) = if conn.at_halfedge(p).dst_vertex().try_end()? == w {
        (e_n, e_p)
    } else {
        (e_p, e_n)
    };

    Ok(TriangleSide {
        face,
        n,
        p,
        outer_n,
        outer_p,
        apex,
        edge_keep,
        edge_drop,
    })
}

fn apply_triangle_side(conn: &mut MeshConnectivity, side: &TriangleSide) -> MeshResult<()> {
    conn[side.outer_n].twin = Some(side.outer_p);
    conn[side.outer_p].twin = Some(side.outer_n);
    conn[side.outer_n].edge = Some(side.edge_keep);
    conn[side.outer_p].edge = Some(side.edge_keep);
    conn[side.edge_keep].halfedge = Some(side.outer_p);
    conn[side.apex].halfedge = Some(side.outer_n);

    conn.erase_halfedge(side.n)?;
    conn.erase_halfedge(side.p)?;
    conn.erase_face(side.face)?;
    conn.erase_edge(side.edge_drop)?;
    Ok(())
}

/// Collapses the halfedge `h`, merging its dst vertex into its src vertex.
/// The surviving vertex is moved to the edge midpoint; callers may overwrite
/// the position afterwards. Triangular faces incident to the edge are deleted
/// and their outer edge pairs merged; faces of higher degree simply lose one
/// side.
pub(crate) fn collapse_halfedge(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    h: HalfEdgeId,
) -> MeshResult<VertexId> {
    let t = conn.at_halfedge(h).twin().try_end()?;
    if conn.at_halfedge(h).is_boundary()? || conn.at_halfedge(t).is_boundary()? {
        return Err(MeshError::NoOp("cannot collapse a boundary edge"));
    }

    let e = conn.at_halfedge(h).edge().try_end()?;
    let (v, w) = conn.at_halfedge(h).src_dst_pair()?;
    let f_h = conn.at_halfedge(h).face().try_end()?;
    let f_t = conn.at_halfedge(t).face().try_end()?;
    if f_h == f_t {
        return Err(MeshError::NoOp("edge borders the same face on both sides"));
    }

    let h_tri = conn.face_degree(f_h) == 3;
    let t_tri = conn.face_degree(f_t) == 3;

    let side_h = if h_tri {
        Some(capture_triangle_side(conn, h, w)?)
    } else {
        None
    };
    let side_t = if t_tri {
        Some(capture_triangle_side(conn, t, w)?)
    } else {
        None
    };

    // A triangular side whose outer halfedges belong to the opposite incident
    // face is a two-face "pillow": collapsing it further would leave halfedges
    // pointing at erased faces.
    for side in side_h.iter().chain(side_t.iter()) {
        let other = if side.face == f_h { f_t } else { f_h };
        if conn[side.outer_n].face == Some(other) || conn[side.outer_p].face == Some(other) {
            return Err(MeshError::NoOp("collapse would degenerate the surface"));
        }
    }

    // The classical non-manifold case: the endpoints share a neighbor that is
    // not the apex of an incident triangle. Collapsing would fuse two faces
    // along two separate edges.
    {
        let v_adj = conn.at_vertex(v).adjacent_vertices()?;
        let w_adj = conn.at_vertex(w).adjacent_vertices()?;
        let allowed = side_h
            .iter()
            .chain(side_t.iter())
            .map(|s| s.apex)
            .collect::<SVec<_>>();
        for c in v_adj.iter() {
            if w_adj.contains(c) && !allowed.contains(c) {
                return Err(MeshError::NoOp(
                    "collapse would produce a non-manifold vertex",
                ));
            }
        }
    }

    let midpoint = conn.edge_midpoint(positions, e);
    let w_outgoing = conn.at_vertex(w).outgoing_halfedges()?;
    let h_prev = conn.at_halfedge(h).previous().try_end()?;
    let h_next = conn.at_halfedge(h).next().try_end()?;
    let t_prev = conn.at_halfedge(t).previous().try_end()?;
    let t_next = conn.at_halfedge(t).next().try_end()?;

    // --- Adjust connectivity ---
    for &h_wo in &w_outgoing {
        conn[h_wo].vertex = Some(v);
    }
    positions[v] = midpoint;

    match &side_h {
        Some(side) => apply_triangle_side(conn, side)?,
        None => {
            conn[h_prev].next = Some(h_next);
            if conn[f_h].halfedge == Some(h) {
                conn[f_h].halfedge = Some(h_next);
            }
        }
    }
    match &side_t {
        Some(side) => apply_triangle_side(conn, side)?,
        None => {
            conn[t_prev].next = Some(t_next);
            if conn[f_t].halfedge == Some(t) {
                conn[f_t].halfedge = Some(t_next);
            }
        }
    }

    // The surviving vertex may be pointing at one of the deleted halfedges.
    let v_halfedge = if let Some(side) = &side_h {
        side.outer_p
    } else if let Some(side) = &side_t {
        side.outer_p
    } else {
        t_next
    };
    conn[v].halfedge = Some(v_halfedge);

    // --- Remove elements ---
    conn.erase_halfedge(h)?;
    conn.erase_halfedge(t)?;
    conn.erase_edge(e)?;
    conn.erase_vertex(w)?;

    Ok(v)
}

/// Contracts `e` to a single vertex at its midpoint, deleting the incident
/// triangle faces. Returns the surviving vertex. Declines when the collapse
/// would produce a non-manifold configuration; the degenerate (but still
/// manifold) tetrahedral collapse is allowed.
pub fn collapse_edge(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> MeshResult<VertexId> {
    let h = conn.at_edge(e).halfedge().try_end()?;
    collapse_halfedge(conn, positions, h)
}

/// Contracts an entire face to a single vertex at the face centroid, by
/// repeated edge collapse along its boundary. Declines when any step of the
/// contraction would produce a non-manifold configuration, leaving the mesh
/// unmodified.
pub fn collapse_face(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    f: FaceId,
) -> MeshResult<VertexId> {
    let halfedges = conn.face_edges(f);
    for &h in &halfedges {
        let e = conn.at_halfedge(h).edge().try_end()?;
        if conn.is_boundary_edge(e) {
            return Err(MeshError::NoOp("cannot collapse a face on the boundary"));
        }
    }
    let verts = conn.face_vertices(f);
    for &v in &verts {
        if conn.is_boundary_vertex(v) {
            return Err(MeshError::NoOp("cannot collapse a face on the boundary"));
        }
    }

    let centroid = conn.face_vertex_average(positions, f);

    // The pre-checks do not cover every decline: a collapse mid-sequence can
    // still hit a non-manifold configuration created by an earlier one (a
    // tetrahedron face does, after the first collapse turns it into a
    // pillow). Keep a snapshot so a decline leaves the caller's mesh exactly
    // as it was.
    let saved_conn = conn.clone();
    let saved_positions = positions.clone();

    let result = (|| -> MeshResult<VertexId> {
        let mut survivor = collapse_halfedge(conn, positions, halfedges[0])?;
        for &w in &verts[2..] {
            let h = conn.at_vertex(survivor).halfedge_to(w).try_end()?;
            survivor = collapse_halfedge(conn, positions, h)?;
        }
        Ok(survivor)
    })();

    match result {
        Ok(survivor) => {
            positions[survivor] = centroid;
            Ok(survivor)
        }
        Err(err) => {
            *conn = saved_conn;
            *positions = saved_positions;
            Err(err)
        }
    }
}

/// Flips `e`, exchanging which diagonal of the surrounding polygon is
/// represented: each endpoint moves one step forward along the opposite
/// incident face. Declines on boundary edges and when the flip would create
/// an edge that already exists. Returns the same edge with its new endpoints.
pub fn flip_edge(conn: &mut MeshConnectivity, e: EdgeId) -> MeshResult<EdgeId> {
    if conn.is_boundary_edge(e) {
        return Err(MeshError::NoOp("cannot flip a boundary edge"));
    }

    let h = conn.at_edge(e).halfedge().try_end()?;
    let t = conn.at_halfedge(h).twin().try_end()?;
    let (v_a, v_b) = conn.at_halfedge(h).src_dst_pair()?;
    let f_h = conn.at_halfedge(h).face().try_end()?;
    let f_t = conn.at_halfedge(t).face().try_end()?;

    let hn = conn.at_halfedge(h).next().try_end()?;
    let tn = conn.at_halfedge(t).next().try_end()?;
    let hnn = conn.at_halfedge(hn).next().try_end()?;
    let tnn = conn.at_halfedge(tn).next().try_end()?;
    let h_prev = conn.at_halfedge(h).previous().try_end()?;
    let t_prev = conn.at_halfedge(t).previous().try_end()?;

    // The new endpoints: the vertices one step past the old ones
    let c = conn.at_halfedge(hn).dst_vertex().try_end()?;
    let d = conn.at_halfedge(tn).dst_vertex().try_end()?;
    if c == d || conn.at_vertex(c).halfedge_to(d).try_end().is_ok() {
        return Err(MeshError::NoOp("flip would create a duplicated edge"));
    }
    if conn.at_vertex(d).halfedge_to(c).try_end().is_ok() {
        return Err(MeshError::NoOp("flip would create a duplicated edge"));
    }

    // --- Adjust connectivity ---
    // The halfedges right after the old endpoints move across the edge, to the
    // opposite face. Everything else stays.
    conn[h].vertex = Some(d);
    conn[t].vertex = Some(c);
    conn[h].next = Some(hnn);
    conn[t].next = Some(tnn);
    conn[hn].next = Some(t);
    conn[tn].next = Some(h);
    conn[h_prev].next = Some(tn);
    conn[t_prev].next = Some(hn);
    conn[hn].face = Some(f_t);
    conn[tn].face = Some(f_h);

    conn[f_h].halfedge = Some(h);
    conn[f_t].halfedge = Some(t);

    // The old endpoints may be pointing at the flipped halfedges
    conn[v_a].halfedge = Some(tn);
    conn[v_b].halfedge = Some(hn);

    Ok(e)
}

/// Inserts a new vertex at the midpoint of `e` and subdivides both incident
/// faces, adding one new edge per face so every face stays made of a
/// triangle-compatible pair. The new vertex's halfedge points along the edge
/// that was split. Declines on boundary edges.
pub fn split_edge(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> MeshResult<VertexId> {
    if conn.is_boundary_edge(e) {
        return Err(MeshError::NoOp("cannot split a boundary edge"));
    }

    let h = conn.at_edge(e).halfedge().try_end()?;
    let x = divide_edge(conn, positions, h, 0.5)?;

    // Cut each incident face from the new vertex to the vertex two steps
    // ahead, splitting a triangle off the face.
    let outgoing = conn.at_vertex(x).outgoing_halfedges()?;
    for h_x in outgoing {
        let face = conn.at_halfedge(h_x).face().try_end()?;
        let apex = conn.at_halfedge(h_x).next().dst_vertex().try_end()?;
        cut_face(conn, face, x, apex)?;
    }

    Ok(x)
}

/// Chamfers a vertex. That is, for each outgoing edge of the vertex, a new
/// vertex will be created. All the new vertices will be joined in a new face,
/// and the original vertex gets removed.
/// ## Id Stability
/// This operation guarantees that the outgoing halfedge ids are preserved.
/// Additionally, the returned vertex id vector has the newly created vertex
/// ids provided in the same order as `v`'s outgoing_halfedges
pub fn chamfer_vertex(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    v: VertexId,
    interpolation_factor: f32,
) -> MeshResult<(FaceId, SVec<VertexId>)> {
    if conn.is_boundary_vertex(v) {
        return Err(MeshError::NoOp("cannot chamfer a boundary vertex"));
    }
    let outgoing = conn.at_vertex(v).outgoing_halfedges()?;
    let mut vertices = SVec::new();
    for &h in &outgoing {
        vertices.push(divide_edge(conn, positions, h, interpolation_factor)?);
    }

    for (&a, &b) in vertices.iter().circular_tuple_windows() {
        let face = find_shared_face(conn, a, b)
            .ok_or(MeshError::NoOp("chamfer vertices do not share a face"))?;
        cut_face(conn, face, a, b)?;
    }

    Ok((erase_vertex(conn, v)?, vertices))
}

/// Creates a 2-sided face on the inside of this edge. This has no effect on
/// the resulting mesh, but it's useful as one of the building blocks of the
/// bevel operation
pub(crate) fn duplicate_edge(conn: &mut MeshConnectivity, h: HalfEdgeId) -> MeshResult<HalfEdgeId> {
    let (v, w) = conn.at_halfedge(h).src_dst_pair()?;

    let h_v_w = h;
    let h_w_v = conn.at_halfedge(h).twin().try_end()?;
    let e = conn.at_halfedge(h).edge().try_end()?;

    let h2_v_w = conn.alloc_halfedge(HalfEdge::default());
    let h2_w_v = conn.alloc_halfedge(HalfEdge::default());

    let inner_face = conn.alloc_face(Some(h2_v_w));

    // The two new halfedges make a cycle (2-sided face)
    conn[h2_v_w].face = Some(inner_face);
    conn[h2_w_v].face = Some(inner_face);
    conn[h2_v_w].next = Some(h2_w_v);
    conn[h2_w_v].next = Some(h2_v_w);

    conn[h2_v_w].vertex = Some(v);
    conn[h2_w_v].vertex = Some(w);

    // The twins point to the respective outer halfedges of the original edge
    conn[h2_v_w].twin = Some(h_w_v);
    conn[h2_w_v].twin = Some(h_v_w);
    conn[h_w_v].twin = Some(h2_v_w);
    conn[h_v_w].twin = Some(h2_w_v);

    // The re-paired halfedges mean the original edge splits in two as well
    conn[h2_w_v].edge = Some(e);
    conn[e].halfedge = Some(h_v_w);
    let e_2 = conn.alloc_edge(Some(h_w_v));
    conn[h_w_v].edge = Some(e_2);
    conn[h2_v_w].edge = Some(e_2);

    Ok(h2_v_w)
}

/// Merges the src and dst vertices of `h` so that only the src remains. Both
/// incident faces keep existing with one side fewer. This is the low-level
/// vertex join used by the bevel machinery; the user-facing collapse with
/// face deletion is [`collapse_edge`].
pub(crate) fn join_vertices(conn: &mut MeshConnectivity, h: HalfEdgeId) -> MeshResult<VertexId> {
    let (v, w) = conn.at_halfedge(h).src_dst_pair()?;
    let t = conn.at_halfedge(h).twin().try_end()?;
    let e = conn.at_halfedge(h).edge().try_end()?;
    let h_next = conn.at_halfedge(h).next().try_end()?;
    let h_prev = conn.at_halfedge(h).previous().try_end()?;
    let t_next = conn.at_halfedge(t).next().try_end()?;
    let t_prev = conn.at_halfedge(t).previous().try_end()?;
    let w_outgoing = conn.at_vertex(w).outgoing_halfedges()?;
    let v_next_fan = conn.at_halfedge(h).cycle_around_fan().try_end()?;
    let f_h = conn.at_halfedge(h).face().try_end();
    let f_t = conn.at_halfedge(t).face().try_end();

    // --- Adjust connectivity ---
    for h_wo in w_outgoing {
        conn[h_wo].vertex = Some(v);
    }
    conn[t_prev].next = Some(t_next);
    conn[h_prev].next = Some(h_next);

    // Some face may point to the halfedges we're deleting. Fix that.
    if let Ok(f_h) = f_h {
        if conn.at_face(f_h).halfedge().try_end()? == h {
            conn[f_h].halfedge = Some(h_next);
        }
    }
    if let Ok(f_t) = f_t {
        if conn.at_face(f_t).halfedge().try_end()? == t {
            conn[f_t].halfedge = Some(t_next);
        }
    }
    // The vertex we're keeping may be pointing to one of the deleted halfedges.
    if conn.at_vertex(v).halfedge().try_end()? == h {
        conn[v].halfedge = Some(v_next_fan);
    }

    // --- Remove data ----
    conn.erase_halfedge(t)?;
    conn.erase_halfedge(h)?;
    conn.erase_edge(e)?;
    conn.erase_vertex(w)?;

    Ok(v)
}

/// Removes a 2-sided face, merging its two edges into one. The bevel
/// machinery can leave these behind at the ends of a beveled edge.
fn dissolve_two_sided_face(conn: &mut MeshConnectivity, f: FaceId) -> MeshResult<()> {
    let hs = conn.face_edges(f);
    debug_assert_eq!(hs.len(), 2);
    let (h1, h2) = (hs[0], hs[1]);
    let t1 = conn.at_halfedge(h1).twin().try_end()?;
    let t2 = conn.at_halfedge(h2).twin().try_end()?;
    let e1 = conn.at_halfedge(h1).edge().try_end()?;
    let e2 = conn.at_halfedge(h2).edge().try_end()?;
    let (p, q) = conn.at_halfedge(h1).src_dst_pair()?;

    conn[t1].twin = Some(t2);
    conn[t2].twin = Some(t1);
    conn[t2].edge = Some(e1);
    conn[e1].halfedge = Some(t1);
    conn[p].halfedge = Some(t2);
    conn[q].halfedge = Some(t1);

    conn.erase_halfedge(h1)?;
    conn.erase_halfedge(h2)?;
    conn.erase_face(f)?;
    conn.erase_edge(e2)?;
    Ok(())
}

/// Adjusts the connectivity of the mesh in preparation for a bevel operation.
/// Any `halfedges` passed in will get "duplicated", and a face will be created
/// in-between, consistently adjusting the connectivity everywhere.
///
/// # Returns
/// The set of halfedges that participated in the bevel, plus the inner
/// halfedge of each duplicated edge, whose face is the face that replaces the
/// corresponding original edge.
fn bevel_connectivity(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    halfedges: &[HalfEdgeId],
) -> MeshResult<(BTreeSet<HalfEdgeId>, SVec<HalfEdgeId>)> {
    let mut edges_to_bevel = BTreeSet::new();
    let mut duplicated_edges = BTreeSet::new();
    let mut vertices_to_chamfer = BTreeSet::new();
    let mut inner_halfedges = SVec::new();

    // ---- 1. Duplicate all edges -----
    for &h in halfedges {
        // NOTE: Ignore edges for which we already handled its twin
        let not_yet_handled =
            edges_to_bevel.insert(h) && edges_to_bevel.insert(conn.at_halfedge(h).twin().end());
        if not_yet_handled {
            let h_dup = duplicate_edge(conn, h)?;
            inner_halfedges.push(h_dup);
            duplicated_edges.insert(h_dup);
            duplicated_edges.insert(conn.at_halfedge(h_dup).next().try_end()?);
            let (src, dst) = conn.at_halfedge(h).src_dst_pair()?;
            vertices_to_chamfer.insert(src);
            vertices_to_chamfer.insert(dst);
        }
    }

    // ---- 2. Chamfer all vertices -----
    for v in vertices_to_chamfer {
        let outgoing_halfedges = conn.at_vertex(v).outgoing_halfedges()?;

        // After the chamfer operation, some vertex pairs need to get collapsed
        // into a single one. This binary vector has a `true` for every vertex
        // position where that needs to happen.
        let collapse_indices = outgoing_halfedges
            .iter()
            .circular_tuple_windows()
            .map(|(h, h2)| {
                let h_b = edges_to_bevel.contains(h);
                let h2_b = edges_to_bevel.contains(h2);
                let h_d = duplicated_edges.contains(h);
                let h2_d = duplicated_edges.contains(h2);
                let h_n = !h_b && !h_d;
                let h2_n = !h2_b && !h2_d;

                h_b && h2_n || h_d && h2_b || h_d && h2_n || h_n && h2_b
            })
            .collect::<SVecN<_, 16>>();

        // Here, we execute the chamfer operation. The returned indices are
        // guaranteed to be in the same order as `v`'s outgoing halfedges.
        let (_, new_verts) = chamfer_vertex(conn, positions, v, 0.0)?;

        let collapse_ops = new_verts
            .iter()
            .circular_tuple_windows()
            .zip(collapse_indices)
            .filter_map(|((v, w), should_collapse)| {
                if should_collapse {
                    // We want to keep w so next iterations don't produce dead
                    // vertex ids.
                    Some((*w, *v))
                } else {
                    None
                }
            })
            .collect::<SVecN<_, 16>>();

        // When collapsing vertices, we need a way to determine where those
        // original vertices ended up or we may access invalid ids
        type TranslationMap = HashMap<VertexId, VertexId>;
        let mut translation_map: TranslationMap = HashMap::new();
        /// Returns the translation of a vertex, that is, the vertex this
        /// vertex ended up being translated to.
        fn get_translated(m: &TranslationMap, v: VertexId) -> VertexId {
            let mut v = v;
            while let Some(v_tr) = m.get(&v) {
                v = *v_tr;
            }
            v
        }

        for (w, v) in collapse_ops {
            let v = get_translated(&translation_map, v);
            let w = get_translated(&translation_map, w);
            let h = conn.at_vertex(w).halfedge_to(v).try_end()?;
            join_vertices(conn, h)?;
            translation_map.insert(v, w); // Take note that v is now w
        }
    }

    // ---- 3. Clean up degenerate ring faces -----
    // At low valences the chamfer rings can shrink down to two sides.
    let two_sided = conn
        .iter_faces()
        .map(|(f, _)| f)
        .filter(|f| conn.face_degree(*f) == 2)
        .collect_svec();
    for f in two_sided {
        dissolve_two_sided_face(conn, f)?;
    }

    Ok((edges_to_bevel, inner_halfedges))
}

/// Replaces `v` with a face whose vertices sit on each of `v`'s outgoing
/// edges, at the exact position of `v` itself. Connectivity only; use
/// [`bevel_vertex_positions`] to place the new vertices.
pub fn bevel_vertex(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    v: VertexId,
) -> MeshResult<FaceId> {
    let (face, _) = chamfer_vertex(conn, positions, v, 0.0)?;
    Ok(face)
}

/// Replaces `e` with a face. The new vertices start at the exact positions of
/// `e`'s endpoints; use [`bevel_edge_positions`] to place them. Connectivity
/// only.
pub fn bevel_edge(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> MeshResult<FaceId> {
    if conn.is_boundary_edge(e) {
        return Err(MeshError::NoOp("cannot bevel a boundary edge"));
    }
    let (v, w) = conn.edge_endpoints(e);
    if conn.is_boundary_vertex(v) || conn.is_boundary_vertex(w) {
        return Err(MeshError::NoOp("cannot bevel an edge touching the boundary"));
    }

    let h = conn.at_edge(e).halfedge().try_end()?;
    let (_, inner) = bevel_connectivity(conn, positions, &[h])?;
    conn.at_halfedge(inner[0])
        .face()
        .try_end()
        .map_err(MeshError::from)
}

/// Replaces `f` with an inset face connected to the rest of the mesh by a
/// ring of faces. The new vertices start at the positions of `f`'s original
/// vertices; use [`bevel_face_positions`] to place them. Returns the inset
/// face, which keeps the id of `f`.
pub fn bevel_face(
    conn: &mut MeshConnectivity,
    positions: &mut Positions,
    f: FaceId,
) -> MeshResult<FaceId> {
    for v in conn.face_vertices(f) {
        if conn.is_boundary_vertex(v) {
            return Err(MeshError::NoOp("cannot bevel a face touching the boundary"));
        }
    }

    let halfedges = conn.face_edges(f);
    bevel_connectivity(conn, positions, &halfedges)?;
    Ok(f)
}

/// For each vertex of the bevel face, finds its "spoke": the one outgoing
/// halfedge that does not bound the face, leading back into the original
/// mesh.
fn bevel_spoke(
    conn: &MeshConnectivity,
    face: FaceId,
    v: VertexId,
) -> MeshResult<HalfEdgeId> {
    conn.at_vertex(v)
        .outgoing_halfedges()?
        .into_iter()
        .find(|&o| {
            conn[o].face != Some(face)
                && conn
                    .at_halfedge(o)
                    .twin()
                    .face_or_boundary()
                    .map(|f| f != Some(face))
                    .unwrap_or(true)
        })
        .ok_or(MeshError::NoOp("bevel face vertex has no outgoing spoke"))
}

/// Shared by vertex and edge bevels: every vertex of the bevel face slides
/// from its captured start position along its spoke. Positions are absolute,
/// not deltas: this is called repeatedly with the same `start_positions` as
/// the offset changes.
fn slide_along_spokes(
    conn: &MeshConnectivity,
    positions: &mut Positions,
    face: FaceId,
    start_positions: &[Vec3],
    tangent_offset: f32,
) -> MeshResult<()> {
    let halfedges = conn.at_face(face).halfedges()?;
    if halfedges.len() != start_positions.len() {
        return Err(MeshError::NoOp(
            "start positions do not match the bevel face",
        ));
    }

    for (&h, &start) in halfedges.iter().zip(start_positions) {
        let v = conn.at_halfedge(h).vertex().try_end()?;
        let spoke = bevel_spoke(conn, face, v)?;
        let far = conn.at_halfedge(spoke).dst_vertex().try_end()?;
        let dir = (positions[far] - start).normalize_or_zero();
        positions[v] = start + dir * tangent_offset;
    }
    Ok(())
}

/// Computes positions for the vertices of a beveled vertex. The
/// `start_positions` are the pre-bevel positions, in the order of the bevel
/// face's halfedges (for a vertex bevel, all of them are the original vertex
/// position).
pub fn bevel_vertex_positions(
    conn: &MeshConnectivity,
    positions: &mut Positions,
    face: FaceId,
    start_positions: &[Vec3],
    tangent_offset: f32,
) -> MeshResult<()> {
    slide_along_spokes(conn, positions, face, start_positions, tangent_offset)
}

/// Computes positions for the vertices of a beveled edge, sliding each vertex
/// away from its captured start position along its spoke.
pub fn bevel_edge_positions(
    conn: &MeshConnectivity,
    positions: &mut Positions,
    face: FaceId,
    start_positions: &[Vec3],
    tangent_offset: f32,
) -> MeshResult<()> {
    slide_along_spokes(conn, positions, face, start_positions, tangent_offset)
}

/// Computes positions for the vertices of a beveled face: the tangent offset
/// insets every vertex towards the face centroid, the normal offset raises the
/// face along its normal. `flip_orientation` negates the normal offset for
/// meshes stored with flipped winding.
#[allow(clippy::too_many_arguments)]
pub fn bevel_face_positions(
    conn: &MeshConnectivity,
    positions: &mut Positions,
    face: FaceId,
    start_positions: &[Vec3],
    tangent_offset: f32,
    normal_offset: f32,
    flip_orientation: bool,
) -> MeshResult<()> {
    let halfedges = conn.at_face(face).halfedges()?;
    if halfedges.len() != start_positions.len() || start_positions.len() < 3 {
        return Err(MeshError::NoOp(
            "start positions do not match the bevel face",
        ));
    }

    let normal_offset = if flip_orientation {
        -normal_offset
    } else {
        normal_offset
    };

    let centroid =
        start_positions.iter().fold(Vec3::ZERO, |a, b| a + *b) / start_positions.len() as f32;
    let normal = (start_positions[0] - start_positions[1])
        .cross(start_positions[1] - start_positions[2])
        .normalize_or_zero();

    for (&h, &start) in halfedges.iter().zip(start_positions) {
        let v = conn.at_halfedge(h).vertex().try_end()?;
        let dir = (centroid - start).normalize_or_zero();
        positions[v] = start + dir * tangent_offset + normal * normal_offset;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::primitives::{Box, Tetrahedron};

    fn two_triangle_quad() -> HalfEdgeMesh {
        HalfEdgeMesh::build_from_polygons(
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            &[[0u32, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    fn interior_edge(mesh: &HalfEdgeMesh) -> EdgeId {
        mesh.read_connectivity()
            .iter_edges()
            .map(|(e, _)| e)
            .find(|e| !mesh.read_connectivity().is_boundary_edge(*e))
            .expect("mesh should have an interior edge")
    }

    #[test]
    fn test_flip_edge_swaps_diagonal() {
        let mut mesh = two_triangle_quad();
        let e = interior_edge(&mesh);
        let (conn, _) = mesh.edit();
        let (a, b) = conn.edge_endpoints(e);

        let e = flip_edge(conn, e).unwrap();
        let (c, d) = conn.edge_endpoints(e);
        assert_ne!(
            [a, b].iter().collect::<HashSet<_>>(),
            [c, d].iter().collect::<HashSet<_>>()
        );

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 5);
        assert_eq!(conn.num_faces(), 2);
    }

    #[test]
    fn test_flip_edge_is_its_own_inverse() {
        let mut mesh = two_triangle_quad();
        let e = interior_edge(&mesh);
        let (conn, _) = mesh.edit();
        let (a, b) = conn.edge_endpoints(e);

        flip_edge(conn, e).unwrap();
        flip_edge(conn, e).unwrap();

        let (c, d) = conn.edge_endpoints(e);
        assert_eq!(
            [a, b].iter().collect::<HashSet<_>>(),
            [c, d].iter().collect::<HashSet<_>>()
        );
        mesh.validate().unwrap();
    }

    #[test]
    fn test_flip_boundary_edge_declines() {
        let mut mesh = two_triangle_quad();
        let boundary = mesh
            .read_connectivity()
            .iter_edges()
            .map(|(e, _)| e)
            .find(|e| mesh.read_connectivity().is_boundary_edge(*e))
            .unwrap();
        let (conn, _) = mesh.edit();
        assert!(matches!(
            flip_edge(conn, boundary),
            Err(MeshError::NoOp(_))
        ));
        // A declined operation leaves the mesh unmodified
        mesh.validate().unwrap();
        assert_eq!(mesh.read_connectivity().num_edges(), 5);
    }

    #[test]
    fn test_flip_tetrahedron_edge_declines() {
        // Any flip in a tetrahedron would duplicate an existing edge
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        let e = mesh.read_connectivity().iter_edges().next().unwrap().0;
        let (conn, _) = mesh.edit();
        assert!(matches!(flip_edge(conn, e), Err(MeshError::NoOp(_))));
        mesh.validate().unwrap();
    }

    #[test]
    fn test_split_edge_subdivides_both_faces() {
        let mut mesh = two_triangle_quad();
        let e = interior_edge(&mesh);
        let (conn, positions) = mesh.edit();
        let midpoint = conn.edge_midpoint(positions, e);

        let x = split_edge(conn, positions, e).unwrap();
        assert_eq!(positions[x], midpoint);

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 5);
        assert_eq!(conn.num_edges(), 8);
        assert_eq!(conn.num_faces(), 4);
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.face_degree(f), 3);
        }
        assert_eq!(conn.vertex_degree(x), 4);
    }

    #[test]
    fn test_split_then_collapse_restores_counts() {
        let mut mesh = two_triangle_quad();
        let e = interior_edge(&mesh);
        let (conn, positions) = mesh.edit();

        let x = split_edge(conn, positions, e).unwrap();
        // Collapse one of the two halves of the split edge
        let h = conn.at_vertex(x).outgoing_halfedges().unwrap()[0];
        let e_half = conn.at_halfedge(h).edge().end();
        collapse_edge(conn, positions, e_half).unwrap();

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 5);
        assert_eq!(conn.num_faces(), 2);
    }

    #[test]
    fn test_collapse_tetrahedron_edge_degenerates_gracefully() {
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        let e = mesh.read_connectivity().iter_edges().next().unwrap().0;
        let (conn, positions) = mesh.edit();
        collapse_edge(conn, positions, e).unwrap();

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 3);
        assert_eq!(conn.num_edges(), 3);
        assert_eq!(conn.num_faces(), 2);
    }

    #[test]
    fn test_collapse_pillow_edge_declines() {
        // Collapsing a tetrahedron once gives the degenerate two-face
        // "pillow". Any further collapse must decline.
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        let e = mesh.read_connectivity().iter_edges().next().unwrap().0;
        {
            let (conn, positions) = mesh.edit();
            collapse_edge(conn, positions, e).unwrap();
        }
        mesh.validate().unwrap();

        let edges = mesh
            .read_connectivity()
            .iter_edges()
            .map(|(e, _)| e)
            .collect::<Vec<_>>();
        let (conn, positions) = mesh.edit();
        for e in edges {
            assert!(matches!(
                collapse_edge(conn, positions, e),
                Err(MeshError::NoOp(_))
            ));
        }
        mesh.validate().unwrap();
    }

    #[test]
    fn test_collapse_moves_survivor_to_midpoint() {
        let mut mesh = two_triangle_quad();
        let e = interior_edge(&mesh);
        let (conn, positions) = mesh.edit();
        let midpoint = conn.edge_midpoint(positions, e);
        let v = collapse_edge(conn, positions, e).unwrap();
        assert_eq!(positions[v], midpoint);
    }

    #[test]
    fn test_collapse_face_contracts_to_centroid() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let f = mesh.read_connectivity().iter_faces().next().unwrap().0;
        let (conn, positions) = mesh.edit();
        let centroid = conn.face_vertex_average(positions, f);

        let v = collapse_face(conn, positions, f).unwrap();
        assert_eq!(positions[v], centroid);

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        // The quad contracts to one vertex: 3 vertices, 3 faces gone. Its four
        // side faces become triangles and the opposite face stays a quad.
        assert_eq!(conn.num_vertices(), 5);
        assert_eq!(conn.num_faces(), 5);
        assert_eq!(conn.num_edges(), 8);
    }

    #[test]
    fn test_collapse_face_tetrahedron_declines_untouched() {
        // Contracting a tetrahedron face succeeds on the first edge (the
        // degenerate collapse into a pillow) but the second collapse must
        // decline, and the whole operation has to back out cleanly.
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        let f = mesh.read_connectivity().iter_faces().next().unwrap().0;
        let saved_positions: Vec<Vec3> = {
            let conn = mesh.read_connectivity();
            let positions = mesh.read_positions();
            let mut p: Vec<Vec3> = conn.iter_vertices().map(|(v, _)| positions[v]).collect();
            p.sort_by(|a, b| a.to_array().partial_cmp(&b.to_array()).unwrap());
            p
        };

        let (conn, positions) = mesh.edit();
        assert!(matches!(
            collapse_face(conn, positions, f),
            Err(MeshError::NoOp(_))
        ));

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 6);
        assert_eq!(conn.num_faces(), 4);
        let positions = mesh.read_positions();
        let mut after: Vec<Vec3> = conn.iter_vertices().map(|(v, _)| positions[v]).collect();
        after.sort_by(|a, b| a.to_array().partial_cmp(&b.to_array()).unwrap());
        assert_eq!(after, saved_positions);
    }

    #[test]
    fn test_erase_vertex_merges_fan() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        let v = mesh.read_connectivity().iter_vertices().next().unwrap().0;
        let (conn, _) = mesh.edit();
        let f = erase_vertex(conn, v).unwrap();

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 7);
        assert_eq!(conn.num_edges(), 9);
        assert_eq!(conn.num_faces(), 4);
        assert_eq!(conn.face_degree(f), 6);
    }

    #[test]
    fn test_erase_edge_merges_faces() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::ONE);
        let e = mesh.read_connectivity().iter_edges().next().unwrap().0;
        let (conn, _) = mesh.edit();
        let f = erase_edge(conn, e).unwrap();

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 8);
        assert_eq!(conn.num_edges(), 11);
        assert_eq!(conn.num_faces(), 5);
        assert_eq!(conn.face_degree(f), 6);
    }

    #[test]
    fn test_erase_boundary_vertex_declines() {
        let mut mesh = two_triangle_quad();
        let v = mesh.read_connectivity().iter_vertices().next().unwrap().0;
        let (conn, _) = mesh.edit();
        // Every vertex of the quad is on the boundary
        assert!(matches!(erase_vertex(conn, v), Err(MeshError::NoOp(_))));
        mesh.validate().unwrap();
    }

    #[test]
    fn test_bevel_vertex_makes_face() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let v = mesh.read_connectivity().iter_vertices().next().unwrap().0;
        let v_pos = mesh.read_positions()[v];
        let (conn, positions) = mesh.edit();

        let face = bevel_vertex(conn, positions, v).unwrap();

        mesh.validate().unwrap();
        {
            let conn = mesh.read_connectivity();
            // A corner of valence 3 becomes a triangle
            assert_eq!(conn.face_degree(face), 3);
            assert_eq!(conn.num_vertices(), 10);
            assert_eq!(conn.num_edges(), 15);
            assert_eq!(conn.num_faces(), 7);
            // Connectivity-only: the new vertices start where the old one was
            for v_new in conn.face_vertices(face) {
                assert_eq!(mesh.read_positions()[v_new], v_pos);
            }
        }

        // The positioning pass slides each vertex along its spoke
        let start_positions = vec![v_pos; 3];
        let (conn, positions) = mesh.edit();
        bevel_vertex_positions(conn, positions, face, &start_positions, 0.5).unwrap();
        let face_verts = mesh.read_connectivity().face_vertices(face);
        for v_new in face_verts {
            let p = mesh.read_positions()[v_new];
            assert_ne!(p, v_pos);
            assert!((p - v_pos).length() < 0.5 + 1e-5);
        }
        mesh.validate().unwrap();
    }

    #[test]
    fn test_bevel_edge_makes_face() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let e = mesh.read_connectivity().iter_edges().next().unwrap().0;
        let (conn, positions) = mesh.edit();

        let face = bevel_edge(conn, positions, e).unwrap();

        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.face_degree(face), 4);
        assert_eq!(conn.num_vertices(), 10);
        assert_eq!(conn.num_edges(), 15);
        assert_eq!(conn.num_faces(), 7);
        assert_eq!(
            conn.num_vertices() + conn.num_faces(),
            conn.num_edges() + 2,
            "beveled cube should stay a closed genus-0 surface"
        );
    }

    #[test]
    fn test_bevel_face_makes_ring() {
        let mut mesh = Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let f = mesh.read_connectivity().iter_faces().next().unwrap().0;
        let start_positions = {
            let conn = mesh.read_connectivity();
            conn.face_vertices(f)
                .iter()
                .map(|v| mesh.read_positions()[*v])
                .collect::<Vec<_>>()
        };
        let (conn, positions) = mesh.edit();

        let face = bevel_face(conn, positions, f).unwrap();
        assert_eq!(face, f);

        mesh.validate().unwrap();
        {
            let conn = mesh.read_connectivity();
            assert_eq!(conn.face_degree(face), 4);
            assert_eq!(conn.num_vertices(), 12);
            assert_eq!(conn.num_edges(), 20);
            assert_eq!(conn.num_faces(), 10);
        }

        // Inset and raise the face
        let normal = {
            let conn = mesh.read_connectivity();
            conn.face_normal(mesh.read_positions(), face).unwrap()
        };
        let (conn, positions) = mesh.edit();
        bevel_face_positions(conn, positions, face, &start_positions, 0.2, 0.3, false).unwrap();
        let conn = mesh.read_connectivity();
        let raised_normal = conn.face_normal(mesh.read_positions(), face).unwrap();
        assert!(normal.dot(raised_normal) > 0.99);
    }
}
