// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

use glam::Vec3;
use itertools::Itertools;
use slotmap::SlotMap;
use smallvec::SmallVec;

/// Implements indexing traits so the mesh data structure can be used to access
/// vertex, edge, face or halfedge information using ids as indices.
pub mod mesh_index_impls;

/// Type-safe wrappers over the internal allocator indices used as pointers
pub mod id_types;
pub use id_types::*;

/// An API to represent type-safe and error-handled graph traversals over a mesh
pub mod traversals;
pub use traversals::*;

/// Typed attribute storage keyed by mesh element ids
pub mod channels;
pub use channels::*;

/// Primitive shapes, like boxes or quads
pub mod primitives;

/// Local topology-rewriting operations: erase, collapse, flip, split, bevel
pub mod edit_ops;

/// Whole-mesh rebuild passes: triangulation, linear / Catmull-Clark / Loop
/// subdivision
pub mod subdivision;

/// Greedy quadric-error-metric mesh simplification
pub mod simplify;

/// Deferred purge of erased elements plus structural invariant checking
pub mod validation;

/// HalfEdge meshes are a type of linked list. This means it is sometimes
/// impossible to ensure some algorithms will terminate when the mesh is
/// malformed. To ensure the code never goes into an infinite loop, this max
/// number of iterations will be performed before giving an error. This error
/// should be large enough, as faces with a very large number of vertices may
/// trigger it.
pub const MAX_LOOP_ITERATIONS: usize = 8196;

/// The errors reported by the mesh kernel.
///
/// `NoOp` is a recoverable decline: the requested edit is not well-defined for
/// the given input and the mesh was left untouched. `InvariantViolation` is a
/// programming-error signal raised by `validate()`; the session holding the
/// mesh should be discarded, not repaired.
#[derive(Debug)]
pub enum MeshError {
    /// The operator declined. The mesh has not been modified.
    NoOp(&'static str),
    /// A structural invariant does not hold. Fatal to the current mesh.
    InvariantViolation {
        rule: &'static str,
        element: String,
    },
    /// A global pass was invoked on an incompatible mesh.
    UnsupportedConfiguration(&'static str),
    /// A traversal stepped onto a missing pointer mid-operation.
    Traversal(TraversalError),
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::NoOp(reason) => write!(f, "operation declined: {reason}"),
            MeshError::InvariantViolation { rule, element } => {
                write!(f, "invariant violation: {rule} (at {element})")
            }
            MeshError::UnsupportedConfiguration(reason) => {
                write!(f, "unsupported mesh configuration: {reason}")
            }
            MeshError::Traversal(err) => write!(f, "traversal error: {err}"),
        }
    }
}
impl std::error::Error for MeshError {}

impl From<TraversalError> for MeshError {
    fn from(err: TraversalError) -> Self {
        MeshError::Traversal(err)
    }
}

pub type MeshResult<T> = std::result::Result<T, MeshError>;

#[derive(Debug, Default, Clone)]
pub struct HalfEdge {
    twin: Option<HalfEdgeId>,
    next: Option<HalfEdgeId>,
    vertex: Option<VertexId>,
    edge: Option<EdgeId>,
    /// `None` marks a boundary halfedge: the implicit boundary face is never
    /// allocated.
    face: Option<FaceId>,
}

#[derive(Debug, Default, Clone)]
pub struct Vertex {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct Edge {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct Face {
    halfedge: Option<HalfEdgeId>,
}

/// The four element arenas plus the pending-erase sets.
///
/// "Erasing" an element only stages it: the element stays addressable so a
/// sequence of operator calls can be checked as a unit. `validate()` (in the
/// [`validation`] module) physically purges staged elements and re-checks all
/// structural invariants, which catches dangling references left behind by a
/// buggy operator.
#[derive(Debug, Clone, Default)]
pub struct MeshConnectivity {
    vertices: SlotMap<VertexId, Vertex>,
    edges: SlotMap<EdgeId, Edge>,
    faces: SlotMap<FaceId, Face>,
    halfedges: SlotMap<HalfEdgeId, HalfEdge>,

    pending_vertices: HashSet<VertexId>,
    pending_edges: HashSet<EdgeId>,
    pending_faces: HashSet<FaceId>,
    pending_halfedges: HashSet<HalfEdgeId>,
}

pub type Positions = Channel<VertexId, Vec3>;

impl MeshConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the halfedges bounding a given face, in loop order.
    pub fn face_edges(&self, face_id: FaceId) -> SVec<HalfEdgeId> {
        let h0 = self[face_id].halfedge.expect("Face should have a halfedge");
        self.halfedge_loop(h0)
    }

    pub fn face_vertices(&self, face_id: FaceId) -> SVec<VertexId> {
        self.face_edges(face_id)
            .iter()
            .map(|e| self.at_halfedge(*e).vertex().end())
            .collect()
    }

    /// The number of sides of a face.
    pub fn face_degree(&self, face_id: FaceId) -> usize {
        self.face_edges(face_id).len()
    }

    /// The number of edges incident to a vertex.
    pub fn vertex_degree(&self, vertex_id: VertexId) -> usize {
        self.at_vertex(vertex_id)
            .outgoing_halfedges()
            .map(|hs| hs.len())
            .unwrap_or(0)
    }

    /// The (src, dst) endpoints of an edge's reference halfedge.
    pub fn edge_endpoints(&self, edge: EdgeId) -> (VertexId, VertexId) {
        let h = self[edge].halfedge.expect("Edge should have a halfedge");
        let a = self.at_halfedge(h).vertex().end();
        let b = self.at_halfedge(h).next().vertex().end();
        (a, b)
    }

    /// An edge is on the boundary when either of its halfedges has no face.
    pub fn is_boundary_edge(&self, edge: EdgeId) -> bool {
        let h = self[edge].halfedge.expect("Edge should have a halfedge");
        self.at_halfedge(h).is_boundary().unwrap()
            || self.at_halfedge(h).twin().is_boundary().unwrap()
    }

    /// A vertex is on the boundary when any of its outgoing or incoming
    /// halfedges is a boundary halfedge.
    pub fn is_boundary_vertex(&self, vertex: VertexId) -> bool {
        self.at_vertex(vertex)
            .outgoing_halfedges()
            .map(|hs| {
                hs.iter().any(|h| {
                    self.at_halfedge(*h).is_boundary().unwrap()
                        || self.at_halfedge(*h).twin().is_boundary().unwrap()
                })
            })
            .unwrap_or(false)
    }

    pub fn has_boundary(&self) -> bool {
        self.iter_halfedges().any(|(_, h)| h.face.is_none())
    }

    pub fn halfedge_loop(&self, h0: HalfEdgeId) -> SVec<HalfEdgeId> {
        let mut ret = smallvec::smallvec![h0];
        let mut h = h0;

        let mut count = 0;

        loop {
            if count > MAX_LOOP_ITERATIONS {
                panic!("Max number of iterations reached. Is the mesh malformed?");
            }
            count += 1;

            h = self[h].next.expect("Halfedges should form a loop");
            if h == h0 {
                break;
            } else {
                ret.push(h);
            }
        }
        ret
    }

    pub fn iter_vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices
            .iter()
            .filter(|(id, _)| !self.pending_vertices.contains(id))
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .filter(|(id, _)| !self.pending_edges.contains(id))
    }

    pub fn iter_faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces
            .iter()
            .filter(|(id, _)| !self.pending_faces.contains(id))
    }

    pub fn iter_halfedges(&self) -> impl Iterator<Item = (HalfEdgeId, &HalfEdge)> {
        self.halfedges
            .iter()
            .filter(|(id, _)| !self.pending_halfedges.contains(id))
    }

    /// Adds a new vertex to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_vertex(
        &mut self,
        positions: &mut Positions,
        position: Vec3,
        halfedge: Option<HalfEdgeId>,
    ) -> VertexId {
        let v = self.vertices.insert(Vertex { halfedge });
        positions[v] = position;
        v
    }

    /// Adds a new edge to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_edge(&mut self, halfedge: Option<HalfEdgeId>) -> EdgeId {
        self.edges.insert(Edge { halfedge })
    }

    /// Adds a new face to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_face(&mut self, halfedge: Option<HalfEdgeId>) -> FaceId {
        self.faces.insert(Face { halfedge })
    }

    /// Adds a new halfedge to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_halfedge(&mut self, halfedge: HalfEdge) -> HalfEdgeId {
        self.halfedges.insert(halfedge)
    }

    /// Stages a vertex for removal. The element stays addressable until the
    /// next purge so in-flight traversals keep working.
    pub(crate) fn erase_vertex(&mut self, vertex: VertexId) -> MeshResult<()> {
        if !self.vertices.contains_key(vertex) || !self.pending_vertices.insert(vertex) {
            return Err(MeshError::NoOp("vertex already erased"));
        }
        Ok(())
    }

    pub(crate) fn erase_edge(&mut self, edge: EdgeId) -> MeshResult<()> {
        if !self.edges.contains_key(edge) || !self.pending_edges.insert(edge) {
            return Err(MeshError::NoOp("edge already erased"));
        }
        Ok(())
    }

    pub(crate) fn erase_face(&mut self, face: FaceId) -> MeshResult<()> {
        if !self.faces.contains_key(face) || !self.pending_faces.insert(face) {
            return Err(MeshError::NoOp("face already erased"));
        }
        Ok(())
    }

    pub(crate) fn erase_halfedge(&mut self, halfedge: HalfEdgeId) -> MeshResult<()> {
        if !self.halfedges.contains_key(halfedge) || !self.pending_halfedges.insert(halfedge) {
            return Err(MeshError::NoOp("halfedge already erased"));
        }
        Ok(())
    }

    /// Physically removes all staged elements. Does not run invariant checks;
    /// see [`MeshConnectivity::validate`] for the checked variant.
    pub fn purge_erased(&mut self) {
        for v in self.pending_vertices.drain() {
            self.vertices.remove(v);
        }
        for e in self.pending_edges.drain() {
            self.edges.remove(e);
        }
        for f in self.pending_faces.drain() {
            self.faces.remove(f);
        }
        for h in self.pending_halfedges.drain() {
            self.halfedges.remove(h);
        }
    }

    /// Returns the average of a face's vertices. Note that this is different
    /// from the centroid. See:
    /// https://en.wikipedia.org/wiki/Centroid#Of_a_polygon
    pub fn face_vertex_average(&self, positions: &Positions, face_id: FaceId) -> Vec3 {
        let face_vertices = self
            .face_vertices(face_id)
            .iter()
            .map(|v| positions[*v])
            .collect::<SVec<_>>();
        face_vertices.iter().fold(Vec3::ZERO, |v1, v2| v1 + *v2) / face_vertices.len() as f32
    }

    pub fn edge_midpoint(&self, positions: &Positions, edge: EdgeId) -> Vec3 {
        let (a, b) = self.edge_endpoints(edge);
        (positions[a] + positions[b]) * 0.5
    }

    /// Returns the normal of the face. The first three vertices are used to
    /// compute the normal. If the vertices of the face are not coplanar,
    /// the result will not be correct. Returns `None` for degenerate faces
    /// whose leading vertices are collinear or coincident.
    pub fn face_normal(&self, positions: &Positions, face: FaceId) -> Option<Vec3> {
        let verts = self.face_vertices(face);
        if verts.len() >= 3 {
            let v01 = positions[verts[0]] - positions[verts[1]];
            let v12 = positions[verts[1]] - positions[verts[2]];
            let cross = v01.cross(v12);
            if cross.length_squared() > 1e-12 {
                Some(cross.normalize())
            } else {
                None
            }
        } else {
            None
        }
    }

    pub fn vertex_exists(&self, vertex: VertexId) -> bool {
        self.vertices.contains_key(vertex) && !self.pending_vertices.contains(&vertex)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() - self.pending_vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len() - self.pending_edges.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() - self.pending_faces.len()
    }

    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len() - self.pending_halfedges.len()
    }

    /// Given a `self` in an inconsistent state, where some halfedges have no
    /// `twin` (because it's in the boundary), this method adds twin halfedges
    /// forming a loop across the boundaries of the mesh. The new halfedges
    /// will be marked as boundary with a None face, sharing the edge of their
    /// interior twin.
    fn add_boundary_halfedges(&mut self) {
        let halfedges: Vec<HalfEdgeId> = self.iter_halfedges().map(|(h, _)| h).collect();

        for &h0 in halfedges.iter() {
            let mut boundary_halfedges = Vec::<HalfEdgeId>::new();
            if self[h0].twin.is_none() {
                let mut h_it = h0;
                loop {
                    let t = self.alloc_halfedge(HalfEdge::default());
                    boundary_halfedges.push(t);
                    self[h_it].twin = Some(t);
                    self[t].twin = Some(h_it);
                    self[t].edge = self[h_it].edge;
                    self[t].vertex = Some(self.at_halfedge(h_it).next().vertex().end());

                    // Look for the next outgoing halfedge for this vertex
                    // that's in the boundary
                    h_it = self.at_halfedge(h_it).next().end();
                    while h_it != h0 && self[h_it].twin.is_some() {
                        // Twin-next cycles around the outgoing halfedges of a vertex
                        h_it = self.at_halfedge(h_it).twin().next().end();
                    }

                    if h_it == h0 {
                        break;
                    }
                }
            }

            for (&b_h, &b_h_next) in boundary_halfedges.iter().rev().circular_tuple_windows() {
                self[b_h].next = Some(b_h_next);
            }
        }
    }
}

/// The topology store plus the vertex position channel. This is the unit that
/// external callers (an editor / renderer, out of scope here) hold on to.
#[derive(Debug, Clone, Default)]
pub struct HalfEdgeMesh {
    conn: MeshConnectivity,
    positions: Positions,
    /// Set when the mesh is stored with flipped winding. Honored by
    /// `bevel_face_positions`, which negates the normal offset.
    pub flip_orientation: bool,
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_connectivity(&self) -> &MeshConnectivity {
        &self.conn
    }

    pub fn write_connectivity(&mut self) -> &mut MeshConnectivity {
        &mut self.conn
    }

    pub fn read_positions(&self) -> &Positions {
        &self.positions
    }

    pub fn write_positions(&mut self) -> &mut Positions {
        &mut self.positions
    }

    /// Mutable access to connectivity and positions at once, which is what
    /// every local operator takes.
    pub fn edit(&mut self) -> (&mut MeshConnectivity, &mut Positions) {
        (&mut self.conn, &mut self.positions)
    }

    /// Purges staged erasures and checks every structural invariant. See the
    /// [`validation`] module.
    pub fn validate(&mut self) -> MeshResult<()> {
        self.conn.validate()
    }

    /// Builds this mesh from a list of vertices, and a list of polygons,
    /// containing indices that reference those vertices.
    ///
    /// - Generic over Index: Use as much precision as you need / want.
    /// - Generic over Polygon: Use whatever input layout you want.
    ///
    /// If unsure, you can pass `Vec<Vec<u32>>` as `polygons`. You can also use
    /// `[[u32;3]]` or `&[&[u32]]`. Same for `u8`, `u16` or `usize` indices.
    pub fn build_from_polygons<Index, Polygon>(
        positions: &[Vec3],
        polygons: &[Polygon],
    ) -> anyhow::Result<Self>
    where
        Index: num_traits::AsPrimitive<usize> + 'static + Eq + PartialEq + core::hash::Hash + Copy,
        Polygon: AsRef<[Index]>,
    {
        let mut mesh = Self::new();
        let conn = &mut mesh.conn;
        let positions_ch = &mut mesh.positions;

        // Maps indices from the `polygons` array to the allocated vertices in
        // the newly created halfedge mesh.
        let mut index_to_vertex = HashMap::<Index, VertexId>::new();

        // Used to compute the degree of a vertex. Useful to do some sanity
        // checks.
        let mut vertex_degree = HashMap::<VertexId, u32>::new();

        // First pass over polygon data to determine some initial properties
        for polygon in polygons.iter().map(|p| p.as_ref()) {
            // Some sanity checks
            if polygon.len() < 3 {
                bail!("Cannot build meshes where polygons have less than three vertices.")
            }
            if polygon.iter().duplicates().next().is_some() {
                bail!("Cannot not build meshes where a polygon has duplicate vertices")
            }

            // Compute correspondence between vertices and indices. Also fill in vertex degree data.
            for index in polygon {
                // Create the vertex if it doesn't exist
                let position = positions.get(index.as_()).ok_or_else(|| {
                    anyhow!("Out-of-bounds index in the polygon array {}", index.as_())
                })?;
                let v_id = index_to_vertex
                    .entry(*index)
                    .or_insert_with(|| conn.alloc_vertex(positions_ch, *position, None));

                // Increment the vertex degree counter for that vertex.
                *vertex_degree.entry(*v_id).or_insert(0) += 1;
            }
        }

        // Maps pairs of indices to mesh halfedges
        let mut pair_to_halfedge = HashMap::<(Index, Index), HalfEdgeId>::new();

        // We can now start building connectivity information by doing a second
        // pass over the polygon list
        for polygon in polygons.iter().map(|p| p.as_ref()) {
            // Cyclically ordered list of the half edge ids of this face.
            let mut half_edges_in_face = SVec::new();

            let face = conn.alloc_face(None);

            for (&a, &b) in polygon.iter().circular_tuple_windows() {
                if pair_to_halfedge.get(&(a, b)).is_some() {
                    bail!(
                        "Found multiple oriented edges with the same indices.\
                         This means either (i) surface is non-manifold or (ii) faces \
                         are not oriented in the same direction"
                    )
                }

                let h = conn.alloc_halfedge(HalfEdge::default());
                // Link halfedge to face
                conn[h].face = Some(face);
                conn[face].halfedge = Some(h);

                // Link halfedge to source vertex
                let v_a = index_to_vertex[&a];
                conn[h].vertex = Some(v_a);
                conn[v_a].halfedge = Some(h);

                half_edges_in_face.push(h);

                pair_to_halfedge.insert((a, b), h);

                // Each unordered index pair maps to one edge. The first
                // halfedge of the pair allocates it, the second one joins it.
                if let Some(&other) = pair_to_halfedge.get(&(b, a)) {
                    conn[h].twin = Some(other);
                    conn[other].twin = Some(h);
                    conn[h].edge = conn[other].edge;
                } else {
                    let e = conn.alloc_edge(Some(h));
                    conn[h].edge = Some(e);
                }
            }

            for (&h1, &h2) in half_edges_in_face.iter().circular_tuple_windows() {
                conn[h1].next = Some(h2);
            }
        }

        // Construct the boundary halfedges. Right now, the boundary consists
        // of incomplete edges, i.e. half edges that do not have a twin.
        // Leaving it like this would complicate some kinds of traversal
        // because we can't rely on halfedges always having a twin. We will
        // instead create boundary half edges: That is, twin halfedges that do
        // not point to any face. The boundary halfedges are linked following a
        // circle around the closed boundary.
        conn.add_boundary_halfedges();

        // Do some final manifoldness checks
        for (v, vertex) in conn.iter_vertices() {
            if vertex.halfedge.is_none() {
                bail!("There is at least a single vertex that's disconnected from any polygon");
            }

            // Check that the number of halfedges emanating from this vertex
            // equal the number of polygons containing this vertex. If this
            // doesn't check out, it means our vertex is not a polygon "fan",
            // but some other (thus, non-manifold) structure
            let h0 = conn.at_vertex(v).halfedge().end();
            let mut h = h0;
            let mut count = 0;
            loop {
                if !conn.at_halfedge(h).is_boundary().unwrap() {
                    count += 1;
                }
                h = conn.at_halfedge(h).twin().next().end();

                if h == h0 {
                    break;
                }
            }

            if count != vertex_degree[&v] {
                bail!("At least one of the vertices is not a polygon fan, but some other nonmanifold structure instead.")
            }
        }

        Ok(mesh)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_quad() {
        let mesh = HalfEdgeMesh::build_from_polygons(
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            &[[0u32, 1, 2, 3]],
        )
        .unwrap();

        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 4);
        assert_eq!(conn.num_faces(), 1);
        // 4 interior plus 4 boundary
        assert_eq!(conn.num_halfedges(), 8);

        let f = conn.iter_faces().next().unwrap().0;
        let h = conn.at_face(f).halfedge().end();
        assert_eq!(conn.at_halfedge(h).next().next().next().next().end(), h);
        assert!(conn.has_boundary());
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Z];
        // Degenerate polygon
        assert!(HalfEdgeMesh::build_from_polygons(&tri, &[[0u32, 1]]).is_err());
        // Out of bounds index
        assert!(HalfEdgeMesh::build_from_polygons(&tri, &[[0u32, 1, 7]]).is_err());
        // Two faces with the same winding share an oriented edge
        assert!(HalfEdgeMesh::build_from_polygons(&tri, &[[0u32, 1, 2], [0u32, 1, 2]]).is_err());
    }

    #[test]
    fn test_face_normal_degenerate_face() {
        // Collinear vertices span no plane; the normal must not be NaN.
        let mesh = HalfEdgeMesh::build_from_polygons(
            &[Vec3::ZERO, Vec3::X, Vec3::X * 2.0],
            &[[0u32, 1, 2]],
        )
        .unwrap();
        let conn = mesh.read_connectivity();
        let f = conn.iter_faces().next().unwrap().0;
        assert_eq!(conn.face_normal(mesh.read_positions(), f), None);

        let mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE);
        let conn = mesh.read_connectivity();
        for (f, _) in conn.iter_faces() {
            let n = conn.face_normal(mesh.read_positions(), f).unwrap();
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_boundary_queries() {
        let mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE);
        let conn = mesh.read_connectivity();
        assert!(!conn.has_boundary());
        for (e, _) in conn.iter_edges() {
            assert!(!conn.is_boundary_edge(e));
        }
        for (v, _) in conn.iter_vertices() {
            assert!(!conn.is_boundary_vertex(v));
            assert_eq!(conn.vertex_degree(v), 3);
        }
    }
}
