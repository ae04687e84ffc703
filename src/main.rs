use anyhow::{Context, Result, bail};
use nalgebra::Vector2;

use ndt_grid::geometry::Transform;
use ndt_grid::io::{load, load_points, save};
use ndt_grid::map::{GridMap, GridMapConfig};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <points.csv> <out_dir> [resolution]", args[0]);
    }
    let points_path = &args[1];
    let out_dir = &args[2];
    let resolution: f64 = match args.get(3) {
        Some(r) => r
            .parse()
            .with_context(|| format!("Invalid resolution {:?}", r))?,
        None => GridMapConfig::default().resolution,
    };
    let config = GridMapConfig::with_resolution(resolution);

    println!("Loading points from: {}", points_path);
    let points = load_points::<2, _>(points_path)?;
    println!("Loaded {} points", points.len());

    let mut map = GridMap::try_with_config(Transform::identity(), &config)?;
    let kept = map.insert_points(points.iter().copied(), &Transform::identity());
    println!(
        "Inserted {}/{} points into {} bundles (resolution {})",
        kept,
        points.len(),
        map.num_bundles(),
        map.resolution()
    );
    if let (Some(min), Some(max)) = (map.min_index(), map.max_index()) {
        println!("Bundle index range: {} .. {}", min, max);
    }

    save(&map, out_dir)?;
    let restored = load::<2, _>(out_dir)?;
    println!("Saved and reloaded map at {}", out_dir);

    // Query the reloaded map at the first few input points and at their centroid.
    let mut queries: Vec<Vector2<f64>> = points.iter().take(5).copied().collect();
    if !points.is_empty() {
        let centroid = points.iter().sum::<Vector2<f64>>() / points.len() as f64;
        queries.push(centroid);
    }
    for p in &queries {
        println!(
            "  sample({:.3}, {:.3}) = {:.6e} (saved map: {:.6e})",
            p.x,
            p.y,
            restored.sample(p),
            map.sample(p)
        );
    }

    let expandable = restored.expandable_bundles();
    println!("{} bundles hold enough samples to refine", expandable.len());

    Ok(())
}
