//! Point cloud text input.
//!
//! One point per line, comma separated, `#` starts a comment line. Extra
//! columns after the first D are ignored; shorter lines are skipped.

use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use nalgebra::SVector;

/// Read D-dimensional points from a CSV file.
pub fn load_points<const D: usize, P: AsRef<Path>>(csv_path: P) -> Result<Vec<SVector<f64, D>>> {
    let csv_path = csv_path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut points = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec?;
        if rec.len() < D {
            continue;
        }
        let mut p = SVector::<f64, D>::zeros();
        for (axis, value) in p.iter_mut().enumerate() {
            *value = rec[axis].trim().parse().with_context(|| {
                format!("{}: record {} column {}", csv_path.display(), line, axis)
            })?;
        }
        points.push(p);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Vector2, Vector3};

    #[test]
    fn test_load_points_skips_comments_and_short_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, "# x,y\n0.5, 1.0\n3.0\n-2.0,4.25,9.0\n").unwrap();

        let points = load_points::<2, _>(&path).unwrap();
        assert_eq!(points, vec![Vector2::new(0.5, 1.0), Vector2::new(-2.0, 4.25)]);

        let points = load_points::<3, _>(&path).unwrap();
        assert_eq!(points, vec![Vector3::new(-2.0, 4.25, 9.0)]);
    }

    #[test]
    fn test_load_points_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, "1.0,abc\n").unwrap();

        assert!(load_points::<2, _>(&path).is_err());
    }

    #[test]
    fn test_load_points_missing_file() {
        assert!(load_points::<2, _>("/nonexistent/points.csv").is_err());
    }
}
