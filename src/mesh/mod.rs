//! Per-frame terrain mesh handed to the renderer
//!
//! Surfaces append vertices and quads/triangles; the mesh lays them out as
//! either an indexed triangle list or an indexed strip (quads joined by
//! degenerate triangles). All emitted triangles are counter-clockwise seen
//! from +Y.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::clod::DetailTexture;
use crate::streaming::TileId;

/// GPU vertex layout
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
}

/// What a batch of indices is drawn with
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BatchMaterial {
    Untextured,
    Detail(DetailTexture),
    TileImage { tile: TileId, level: u32 },
}

/// Contiguous index range sharing one material
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBatch {
    pub material: BatchMaterial,
    pub first_index: u32,
    pub index_count: u32,
}

/// The two counter-clockwise triangles of a grid quad, split by parity
#[inline]
pub fn quad_triangles(c: [u32; 4], odd: bool) -> [[u32; 3]; 2] {
    if odd {
        [[c[0], c[3], c[1]], [c[1], c[3], c[2]]]
    } else {
        [[c[0], c[2], c[1]], [c[0], c[3], c[2]]]
    }
}

#[derive(Clone, Debug, Default)]
pub struct TerrainMesh {
    pub topology: Topology,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
    pub batches: Vec<MeshBatch>,
    triangles: usize,
}

impl TerrainMesh {
    pub fn new(topology: Topology) -> Self {
        Self { topology, ..Default::default() }
    }

    /// Reset for a new frame, keeping allocations
    pub fn clear(&mut self, topology: Topology) {
        self.topology = topology;
        self.vertices.clear();
        self.indices.clear();
        self.batches.clear();
        self.triangles = 0;
    }

    /// Start a new index range drawn with `material`
    pub fn begin_batch(&mut self, material: BatchMaterial) {
        self.batches.push(MeshBatch {
            material,
            first_index: self.indices.len() as u32,
            index_count: 0,
        });
    }

    pub fn push_vertex(&mut self, position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> u32 {
        self.vertices.push(TerrainVertex { position, normal, uv });
        (self.vertices.len() - 1) as u32
    }

    /// Triangle with corners already in counter-clockwise order
    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        if a == b || b == c || a == c {
            return;
        }
        match self.topology {
            Topology::TriangleList => self.indices.extend_from_slice(&[a, b, c]),
            Topology::TriangleStrip => self.push_strip_segment(&[a, b, c]),
        }
        self.triangles += 1;
        self.sync_batch();
    }

    /// Grid quad with corners (ix,iz), (ix+1,iz), (ix+1,iz+1), (ix,iz+1).
    ///
    /// `odd` selects the (ix+1,iz)-(ix,iz+1) diagonal, matching the height queries.
    pub fn push_quad(&mut self, c: [u32; 4], odd: bool) {
        match self.topology {
            Topology::TriangleList => {
                for tri in quad_triangles(c, odd) {
                    self.indices.extend_from_slice(&tri);
                }
            }
            Topology::TriangleStrip => {
                if odd {
                    self.push_strip_segment(&[c[0], c[3], c[1], c[2]]);
                } else {
                    self.push_strip_segment(&[c[1], c[0], c[2], c[3]]);
                }
            }
        }
        self.triangles += 2;
        self.sync_batch();
    }

    /// Vertical curtain hanging `depth` below a border walked with the
    /// surface on its left, hiding cracks against coarser neighbours.
    pub fn push_skirt(&mut self, edge: &[u32], depth: f32) {
        let dropped: Vec<u32> = edge
            .iter()
            .map(|&i| {
                let v = self.vertices[i as usize];
                let mut p = v.position;
                p[1] -= depth;
                self.push_vertex(p, v.normal, v.uv)
            })
            .collect();
        for s in 1..edge.len() {
            let (a, b) = (edge[s - 1], edge[s]);
            let (a2, b2) = (dropped[s - 1], dropped[s]);
            self.push_triangle(a, b, b2);
            self.push_triangle(a, b2, a2);
        }
    }

    fn push_strip_segment(&mut self, segment: &[u32]) {
        let batch_start = self.batches.last().map_or(0, |b| b.first_index as usize);
        if self.indices.len() > batch_start {
            let last = self.indices[self.indices.len() - 1];
            self.indices.push(last);
            self.indices.push(segment[0]);
            // Keep the segment's first triangle on an even strip position
            if (self.indices.len() - batch_start) % 2 == 1 {
                self.indices.push(segment[0]);
            }
        }
        self.indices.extend_from_slice(segment);
    }

    fn sync_batch(&mut self) {
        let len = self.indices.len() as u32;
        if let Some(batch) = self.batches.last_mut() {
            batch.index_count = len - batch.first_index;
        }
    }

    /// Remove batches that received no indices
    pub fn drop_empty_batches(&mut self) {
        self.batches.retain(|b| b.index_count > 0);
    }

    /// Non-degenerate triangles emitted since the last clear
    pub fn triangle_count(&self) -> usize {
        self.triangles
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Vertex buffer contents as raw bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Triangles of one batch in counter-clockwise order, degenerates removed
    pub fn batch_triangles(&self, batch: &MeshBatch) -> Vec<[u32; 3]> {
        let start = batch.first_index as usize;
        let end = start + batch.index_count as usize;
        let idx = &self.indices[start..end];
        match self.topology {
            Topology::TriangleList => idx.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect(),
            Topology::TriangleStrip => idx
                .windows(3)
                .enumerate()
                .filter(|(_, w)| w[0] != w[1] && w[1] != w[2] && w[0] != w[2])
                .map(|(k, w)| if k % 2 == 0 { [w[0], w[1], w[2]] } else { [w[1], w[0], w[2]] })
                .collect(),
        }
    }

    /// Triangles of every batch
    pub fn all_triangles(&self) -> Vec<[u32; 3]> {
        self.batches.iter().flat_map(|b| self.batch_triangles(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh(topology: Topology, quads: &[bool]) -> TerrainMesh {
        let mut mesh = TerrainMesh::new(topology);
        mesh.begin_batch(BatchMaterial::Untextured);
        for (i, &odd) in quads.iter().enumerate() {
            let x = i as f32;
            let c = [
                mesh.push_vertex([x, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
                mesh.push_vertex([x + 1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
                mesh.push_vertex([x + 1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
                mesh.push_vertex([x, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
            ];
            mesh.push_quad(c, odd);
        }
        mesh
    }

    fn facing_up(mesh: &TerrainMesh, tri: [u32; 3]) -> bool {
        let p = |i: u32| glam::Vec3::from(mesh.vertices[i as usize].position);
        let n = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
        n.y > 0.0
    }

    #[test]
    fn test_vertex_layout_is_pod() {
        assert_eq!(std::mem::size_of::<TerrainVertex>(), 32);
        let mesh = quad_mesh(Topology::TriangleList, &[false]);
        assert_eq!(mesh.vertex_bytes().len(), 4 * 32);
    }

    #[test]
    fn test_list_winding_counter_clockwise() {
        let mesh = quad_mesh(Topology::TriangleList, &[false, true, true, false]);
        let tris = mesh.all_triangles();
        assert_eq!(tris.len(), 8);
        assert_eq!(mesh.triangle_count(), 8);
        assert!(tris.iter().all(|&t| facing_up(&mesh, t)));
    }

    #[test]
    fn test_strip_preserves_winding_across_joins() {
        let mesh = quad_mesh(Topology::TriangleStrip, &[false, true, true, false, true]);
        let tris = mesh.all_triangles();
        assert_eq!(tris.len(), 10);
        assert!(tris.iter().all(|&t| facing_up(&mesh, t)));
    }

    #[test]
    fn test_strip_and_list_use_same_diagonal() {
        for odd in [false, true] {
            let list = quad_mesh(Topology::TriangleList, &[odd]);
            let strip = quad_mesh(Topology::TriangleStrip, &[odd]);
            let mut a: Vec<_> = list.all_triangles().into_iter().map(|mut t| { t.sort(); t }).collect();
            let mut b: Vec<_> = strip.all_triangles().into_iter().map(|mut t| { t.sort(); t }).collect();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_odd_quad_uses_anti_diagonal() {
        let mesh = quad_mesh(Topology::TriangleList, &[true]);
        // Both triangles share corners 1 and 3
        for t in mesh.all_triangles() {
            assert!(t.contains(&1) && t.contains(&3));
        }
    }

    #[test]
    fn test_skirt_hangs_below_edge() {
        let mut mesh = quad_mesh(Topology::TriangleList, &[false, true]);
        let before = mesh.vertices.len();
        mesh.push_skirt(&[0, 1, 5], 2.0);
        assert_eq!(mesh.vertices.len(), before + 3);
        assert!(mesh.vertices[before..].iter().all(|v| v.position[1] == -2.0));
        assert_eq!(mesh.triangle_count(), 4 + 4);
    }

    #[test]
    fn test_batches_track_ranges() {
        let mut mesh = quad_mesh(Topology::TriangleStrip, &[false, false]);
        mesh.begin_batch(BatchMaterial::TileImage { tile: TileId::new(1, 2), level: 3 });
        let a = mesh.push_vertex([0.0; 3], [0.0, 1.0, 0.0], [0.0; 2]);
        let b = mesh.push_vertex([1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0; 2]);
        let c = mesh.push_vertex([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0; 2]);
        mesh.push_triangle(a, b, c);
        mesh.push_triangle(a, a, c);
        assert_eq!(mesh.batches.len(), 2);
        assert_eq!(mesh.batches[1].first_index, mesh.batches[0].index_count);
        assert_eq!(mesh.batch_triangles(&mesh.batches[1]).len(), 1);
        assert_eq!(mesh.triangle_count(), 5);

        mesh.clear(Topology::TriangleList);
        assert!(mesh.is_empty());
        assert_eq!(mesh.triangle_count(), 0);
    }
}
