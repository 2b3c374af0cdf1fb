//! Marching cubes 查找表.
//!
//! 对每种角点内外组合, 在立方体的每个面上把 "由外进内" 的棱连向沿面逆时针方向
//! 遇到的下一条 "由内出外" 的棱, 这些有向线段首尾相接形成若干闭合环,
//! 每个环再以扇形剖分为三角形. 得到的三角形法向朝外 (指向值较小的一侧).

use once_cell::sync::Lazy;

/// 立方体角点相对左上前角的偏移, `(d, h, w)`.
pub(super) const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [0, 0, 1],
    [0, 1, 1],
    [0, 1, 0],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, 1],
    [1, 1, 0],
];

/// 立方体的 12 条棱 (角点对).
pub(super) const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// 立方体的 6 个面, 角点按从立方体外部看去的逆时针顺序排列.
const FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [4, 7, 6, 5],
    [0, 4, 5, 1],
    [2, 6, 7, 3],
    [0, 3, 7, 4],
    [1, 5, 6, 2],
];

/// 256 种情形的三角形 (以棱编号表示顶点).
pub(super) static TRIANGLES: Lazy<Vec<Vec<[u8; 3]>>> = Lazy::new(|| (0..256).map(case_triangles).collect());

fn edge_of(a: usize, b: usize) -> usize {
    EDGES
        .iter()
        .position(|&(x, y)| (x, y) == (a, b) || (y, x) == (a, b))
        .unwrap_or_else(|| unreachable!("{a} and {b} are not adjacent"))
}

/// 棱所在的两个面, 以位掩码表示.
fn face_mask(edge: usize) -> u8 {
    let (a, b) = EDGES[edge];
    FACES
        .iter()
        .enumerate()
        .filter(|(_, f)| f.contains(&a) && f.contains(&b))
        .fold(0, |acc, (i, _)| acc | 1 << i)
}

fn case_triangles(case: usize) -> Vec<[u8; 3]> {
    let inside = |corner: usize| case >> corner & 1 == 1;

    let mut next = [None; 12];
    for face in FACES.iter() {
        let side = |k: usize| (face[k % 4], face[(k + 1) % 4]);
        for k in 0..4 {
            let (a, b) = side(k);
            if inside(a) || !inside(b) {
                continue;
            }
            let mut j = k + 1;
            while !(inside(side(j).0) && !inside(side(j).1)) {
                j += 1;
            }
            let (c, d) = side(j);
            next[edge_of(a, b)] = Some(edge_of(c, d));
        }
    }

    let mut seen = [false; 12];
    let mut tris = Vec::new();
    for start in 0..12 {
        if seen[start] || next[start].is_none() {
            continue;
        }
        let mut ring = vec![start];
        seen[start] = true;
        let mut cur = start;
        while let Some(n) = next[cur] {
            if n == start {
                break;
            }
            ring.push(n);
            seen[n] = true;
            cur = n;
        }

        // 扇形的对角线不能落在同一个面上, 否则相邻立方体之间会出现非流形的公共边.
        let n = ring.len();
        let apex = (0..n)
            .find(|&r| (2..n - 1).all(|i| face_mask(ring[r]) & face_mask(ring[(r + i) % n]) == 0))
            .unwrap_or(0);
        for i in 1..n - 1 {
            tris.push([
                ring[apex] as u8,
                ring[(apex + i) % n] as u8,
                ring[(apex + i + 1) % n] as u8,
            ]);
        }
    }
    tris
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faces_are_outward() {
        for f in FACES.iter() {
            let p: Vec<[f64; 3]> = f.iter().map(|&c| CORNERS[c].map(|x| x as f64)).collect();
            let u = [p[1][0] - p[0][0], p[1][1] - p[0][1], p[1][2] - p[0][2]];
            let v = [p[2][0] - p[0][0], p[2][1] - p[0][1], p[2][2] - p[0][2]];
            let n = [u[1] * v[2] - u[2] * v[1], u[2] * v[0] - u[0] * v[2], u[0] * v[1] - u[1] * v[0]];
            let out: Vec<f64> = (0..3).map(|j| p.iter().map(|q| q[j]).sum::<f64>() / 4.0 - 0.5).collect();
            assert!(n[0] * out[0] + n[1] * out[1] + n[2] * out[2] > 0.0, "{f:?}");
        }
    }

    #[test]
    fn test_table_shape() {
        assert_eq!(TRIANGLES.len(), 256);
        assert!(TRIANGLES[0].is_empty());
        assert!(TRIANGLES[255].is_empty());
        assert_eq!(TRIANGLES[1].len(), 1);
        // 半个立方体在内: 一个四边形.
        assert_eq!(TRIANGLES[0b0000_1111].len(), 2);
        assert_eq!(TRIANGLES.iter().map(|t| t.len()).max(), Some(5));
        assert_eq!(TRIANGLES.iter().map(|t| t.len()).sum::<usize>(), 820);
    }

    #[test]
    fn test_every_edge_is_paired() {
        // 每条被穿过的棱在三角形边界上恰好出现一次, 因此每个情形的边界闭合.
        for case in 0..256usize {
            let mut count = std::collections::HashMap::new();
            for t in &TRIANGLES[case] {
                for i in 0..3 {
                    *count.entry((t[i], t[(i + 1) % 3])).or_insert(0) += 1;
                }
            }
            assert!(count.values().all(|&c| c == 1), "case {case}");
        }
    }
}
