//! 网格的 OBJ / ASCII STL 读写.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::Mesh;
use crate::Result;

fn invalid(line_no: usize, msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("line {line_no}: {msg}"))
}

/// 解析一行中的三个数.
fn parse3<T: std::str::FromStr>(line_no: usize, it: std::str::SplitWhitespace<'_>) -> io::Result<[T; 3]> {
    let v: Vec<T> = it
        .take(3)
        .map(|s| s.parse::<T>().map_err(|_| invalid(line_no, "malformed number")))
        .collect::<io::Result<_>>()?;
    <[T; 3]>::try_from(v).map_err(|_| invalid(line_no, "expected three values"))
}

impl Mesh {
    /// 以 OBJ 文本格式写出: `v x y z` 与 `f i j k`, 面索引从 1 开始.
    pub fn write_obj<W: Write>(&self, mut w: W) -> io::Result<()> {
        for [x, y, z] in &self.vertices {
            writeln!(w, "v {x} {y} {z}")?;
        }
        for [a, b, c] in &self.faces {
            writeln!(w, "f {} {} {}", a + 1, b + 1, c + 1)?;
        }
        Ok(())
    }

    /// 以 ASCII STL 格式写出. 法向一律写为 0, 每个面独立列出三个顶点.
    pub fn write_stl<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "solid tumor")?;
        for face in &self.faces {
            writeln!(w, " facet normal 0 0 0")?;
            writeln!(w, "  outer loop")?;
            for &i in face {
                let [x, y, z] = self.vertices[i];
                writeln!(w, "   vertex {x} {y} {z}")?;
            }
            writeln!(w, "  endloop")?;
            writeln!(w, " endfacet")?;
        }
        writeln!(w, "endsolid tumor")
    }

    /// 写入 OBJ 文件.
    pub fn save_obj<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_obj(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// 写入 ASCII STL 文件.
    pub fn save_stl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_stl(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// 解析 OBJ 文本中的 `v` 与三角形 `f` 行, 其余行被忽略.
    /// 面顶点可带 `/vt/vn` 后缀, 只取顶点索引.
    pub fn read_obj<R: BufRead>(r: R) -> Result<Mesh> {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for (no, line) in r.lines().enumerate() {
            let line = line?;
            let mut it = line.split_whitespace();
            match it.next() {
                Some("v") => vertices.push(parse3::<f32>(no + 1, it)?),
                Some("f") => {
                    let idx: Vec<&str> = it.map(|s| s.split('/').next().unwrap_or(s)).collect();
                    let [a, b, c] = parse3::<usize>(no + 1, idx.join(" ").split_whitespace())?;
                    if a == 0 || b == 0 || c == 0 {
                        return Err(invalid(no + 1, "face index must be 1-based").into());
                    }
                    faces.push([a - 1, b - 1, c - 1]);
                }
                _ => {}
            }
        }
        if faces.iter().flatten().any(|&i| i >= vertices.len()) {
            return Err(invalid(0, "face index out of range").into());
        }
        Ok(Mesh { vertices, faces })
    }

    /// 读取 OBJ 文件.
    pub fn open_obj<P: AsRef<Path>>(path: P) -> Result<Mesh> {
        Self::read_obj(BufReader::new(File::open(path)?))
    }

    /// 解析 ASCII STL. 每个面的三个顶点独立保存 (不做合并).
    pub fn read_stl_ascii<R: BufRead>(r: R) -> Result<Mesh> {
        let mut vertices = Vec::new();
        for (no, line) in r.lines().enumerate() {
            let line = line?;
            let mut it = line.split_whitespace();
            if it.next() == Some("vertex") {
                vertices.push(parse3::<f32>(no + 1, it)?);
            }
        }
        if vertices.len() % 3 != 0 {
            return Err(invalid(0, "vertex count is not a multiple of 3").into());
        }
        let faces = (0..vertices.len() / 3).map(|i| [3 * i, 3 * i + 1, 3 * i + 2]).collect();
        Ok(Mesh { vertices, faces })
    }
}

#[cfg(test)]
mod tests {
    use crate::mesh::{mask_to_mesh, Mesh};
    use ndarray::Array3;

    fn sphere() -> Mesh {
        let mask = Array3::from_shape_fn((9, 9, 9), |(d, h, w)| {
            let r2 = [d, h, w].iter().map(|&x| (x as f32 - 4.0).powi(2)).sum::<f32>();
            (r2 <= 9.0) as u8 as f32
        });
        mask_to_mesh(mask.view())
    }

    #[test]
    fn test_obj_round_trip() {
        let mesh = sphere();
        let mut buf = Vec::new();
        mesh.write_obj(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.lines().any(|l| l.starts_with("f 1 ")));
        assert!(!text.contains("f 0 "));

        let back = Mesh::read_obj(buf.as_slice()).unwrap();
        assert_eq!(back.vertices().len(), mesh.vertices().len());
        assert_eq!(back.faces().len(), mesh.faces().len());
        assert_eq!(back, mesh);
    }

    #[test]
    fn test_stl_describes_same_geometry() {
        let mesh = sphere();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumor.stl");
        mesh.save_stl(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("solid tumor\n"));
        assert!(text.trim_end().ends_with("endsolid tumor"));
        assert_eq!(text.matches("facet normal 0 0 0").count(), mesh.faces().len());

        let soup = Mesh::read_stl_ascii(text.as_bytes()).unwrap();
        assert_eq!(soup.faces().len(), mesh.faces().len());
        for (f, g) in mesh.faces().iter().zip(soup.faces()) {
            for k in 0..3 {
                assert_eq!(mesh.vertices()[f[k]], soup.vertices()[g[k]]);
            }
        }
    }

    #[test]
    fn test_read_obj_rejects_bad_input() {
        assert!(Mesh::read_obj("v 0 0 0\nf 1 2 3\n".as_bytes()).is_err());
        assert!(Mesh::read_obj("v 0 0\n".as_bytes()).is_err());
        assert!(Mesh::read_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n".as_bytes()).is_err());
        let ok = Mesh::read_obj("# c\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/1 2/2 3/3\n".as_bytes()).unwrap();
        assert_eq!(ok.faces(), &[[0, 1, 2]]);
    }
}
