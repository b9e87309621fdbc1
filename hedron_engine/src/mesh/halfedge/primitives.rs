// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

pub struct Box;

impl Box {
    pub fn build(center: Vec3, size: Vec3) -> HalfEdgeMesh {
        let hsize = size * 0.5;

        let v1 = center + Vec3::new(-hsize.x, -hsize.y, -hsize.z);
        let v2 = center + Vec3::new(hsize.x, -hsize.y, -hsize.z);
        let v3 = center + Vec3::new(hsize.x, -hsize.y, hsize.z);
        let v4 = center + Vec3::new(-hsize.x, -hsize.y, hsize.z);

        let v5 = center + Vec3::new(-hsize.x, hsize.y, -hsize.z);
        let v6 = center + Vec3::new(-hsize.x, hsize.y, hsize.z);
        let v7 = center + Vec3::new(hsize.x, hsize.y, hsize.z);
        let v8 = center + Vec3::new(hsize.x, hsize.y, -hsize.z);

        HalfEdgeMesh::build_from_polygons(
            &[v1, v2, v3, v4, v5, v6, v7, v8],
            &[
                &[0, 1, 2, 3],
                &[4, 5, 6, 7],
                &[4, 7, 1, 0],
                &[3, 2, 6, 5],
                &[5, 4, 0, 3],
                &[6, 2, 1, 7],
            ],
        )
        .expect("Box construction should not fail")
    }
}

pub struct Quad;
impl Quad {
    pub fn build(center: Vec3, normal: Vec3, right: Vec3, size: glam::Vec2) -> HalfEdgeMesh {
        let normal = normal.normalize();
        let right = right.normalize();
        let forward = normal.cross(right);

        let hsize = size * 0.5;

        let v1 = center + hsize.x * right + hsize.y * forward;
        let v2 = center - hsize.x * right + hsize.y * forward;
        let v3 = center - hsize.x * right - hsize.y * forward;
        let v4 = center + hsize.x * right - hsize.y * forward;

        HalfEdgeMesh::build_from_polygons(&[v1, v2, v3, v4], &[&[0, 1, 2, 3]])
            .expect("Quad construction should not fail")
    }
}

pub struct Tetrahedron;
impl Tetrahedron {
    pub fn build(center: Vec3, size: f32) -> HalfEdgeMesh {
        let v1 = center + size * Vec3::new(1.0, 1.0, 1.0);
        let v2 = center + size * Vec3::new(1.0, -1.0, -1.0);
        let v3 = center + size * Vec3::new(-1.0, 1.0, -1.0);
        let v4 = center + size * Vec3::new(-1.0, -1.0, 1.0);

        HalfEdgeMesh::build_from_polygons(
            &[v1, v2, v3, v4],
            &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
        .expect("Tetrahedron construction should not fail")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tetrahedron_counts() {
        let mut mesh = Tetrahedron::build(Vec3::ZERO, 1.0);
        mesh.validate().unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 6);
        assert_eq!(conn.num_faces(), 4);
        assert_eq!(conn.num_halfedges(), 12);
        assert!(!conn.has_boundary());
    }
}
