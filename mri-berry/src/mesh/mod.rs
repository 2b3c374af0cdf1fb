//! 三维重建: marching cubes 等值面提取与网格导出.
//!
//! 顶点坐标位于掩膜的体素坐标系 `(d, h, w)` 中, 体素间距为 1.

use std::collections::HashMap;

use ndarray::ArrayView3;

mod save;
mod table;

use table::{CORNERS, EDGES, TRIANGLES};

/// 三角网格. 面以 0 起始的顶点索引表示.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<[f32; 3]>,
    faces: Vec<[usize; 3]>,
}

impl Mesh {
    /// 直接创建.
    ///
    /// # 注意
    ///
    /// 面中的索引必须小于顶点个数, 否则程序 panic.
    pub fn new(vertices: Vec<[f32; 3]>, faces: Vec<[usize; 3]>) -> Self {
        assert!(
            faces.iter().flatten().all(|&i| i < vertices.len()),
            "面索引越界"
        );
        Self { vertices, faces }
    }

    /// 顶点.
    #[inline]
    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    /// 三角面.
    #[inline]
    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// 是否没有任何面?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// 有向体积. 法向朝外的闭合网格为正.
    pub fn signed_volume(&self) -> f64 {
        let v = |i: usize| self.vertices[i].map(|x| x as f64);
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let (a, b, c) = (v(a), v(b), v(c));
                let cross = [
                    b[1] * c[2] - b[2] * c[1],
                    b[2] * c[0] - b[0] * c[2],
                    b[0] * c[1] - b[1] * c[0],
                ];
                a[0] * cross[0] + a[1] * cross[1] + a[2] * cross[2]
            })
            .sum::<f64>()
            / 6.0
    }
}

/// 在标量场 `field` 上提取值为 `iso` 的等值面.
///
/// 值严格大于 `iso` 的体素视为内部; 三角形法向指向外部. 顶点在棱上线性插值,
/// 相邻立方体共享同一条棱上的顶点. 场中没有跨越 `iso` 的棱时返回空网格.
pub fn marching_cubes(field: ArrayView3<f32>, iso: f32) -> Mesh {
    let (d, h, w) = field.dim();
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    if d < 2 || h < 2 || w < 2 {
        return Mesh { vertices, faces };
    }

    // (较小端点, 轴) -> 顶点索引.
    let mut cache: HashMap<([usize; 3], usize), usize> = HashMap::new();
    let mut vals = [0.0f32; 8];
    for z in 0..d - 1 {
        for y in 0..h - 1 {
            for x in 0..w - 1 {
                let mut case = 0;
                for (i, c) in CORNERS.iter().enumerate() {
                    vals[i] = field[(z + c[0], y + c[1], x + c[2])];
                    if vals[i] > iso {
                        case |= 1 << i;
                    }
                }
                let tris = &TRIANGLES[case];
                if tris.is_empty() {
                    continue;
                }

                for tri in tris {
                    let mut face = [0; 3];
                    for (slot, &edge) in face.iter_mut().zip(tri) {
                        let (a, b) = EDGES[edge as usize];
                        let pa = [z + CORNERS[a][0], y + CORNERS[a][1], x + CORNERS[a][2]];
                        let pb = [z + CORNERS[b][0], y + CORNERS[b][1], x + CORNERS[b][2]];
                        let axis = (0..3).position(|k| pa[k] != pb[k]).unwrap_or(0);
                        let key = (if pa < pb { pa } else { pb }, axis);
                        *slot = *cache.entry(key).or_insert_with(|| {
                            let (va, vb) = (vals[a], vals[b]);
                            let t = (iso - va) / (vb - va);
                            vertices.push([0usize, 1, 2].map(|k| pa[k] as f32 + t * (pb[k] as f32 - pa[k] as f32)));
                            vertices.len() - 1
                        });
                    }
                    faces.push(face);
                }
            }
        }
    }

    log::debug!("marching cubes: {} vertices, {} faces", vertices.len(), faces.len());
    Mesh { vertices, faces }
}

/// 对二值掩膜在 0.5 处提取等值面.
#[inline]
pub fn mask_to_mesh(mask: ArrayView3<f32>) -> Mesh {
    marching_cubes(mask, 0.5)
}
