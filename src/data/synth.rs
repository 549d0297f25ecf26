//! Synthetic dataset generation.
//!
//! Produces labeled placeholder images so the full pipeline can be exercised
//! without real street-level photos. Each tag type gets a distinctive shape
//! so a model can actually learn to separate the classes:
//!
//! * ramp: a triangle
//! * elevator: a rectangle with a center door split
//! * tactile_path: a grid of dots
//! * entrance: a rectangle topped with an arch
//! * obstacle: a thick X

use crate::models::{AtlasError, Result, Source, TagRecord, TagType};
use image::{Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const IMAGE_SIZE: u32 = 224;

/// Base coordinates for the generated records, jittered per sample.
const BASE_LAT: f64 = 34.67;
const BASE_LON: f64 = -82.48;
const COORD_JITTER: f64 = 0.01;

/// What a generation run produced.
#[derive(Debug)]
pub struct GenerateSummary {
    pub num_samples: usize,
    pub csv_path: PathBuf,
    pub images_dir: PathBuf,
    pub distribution: Vec<(TagType, usize)>,
}

/// Generates `num_samples` labeled images plus the tags CSV.
pub fn generate_dataset(
    num_samples: usize,
    csv_path: &Path,
    images_dir: &Path,
    seed: u64,
) -> Result<GenerateSummary> {
    if num_samples == 0 {
        return Err(AtlasError::InvalidInput(
            "number of samples must be positive".to_string(),
        ));
    }

    fs::create_dir_all(images_dir)
        .map_err(|e| AtlasError::io(format!("creating {}", images_dir.display()), e))?;
    if let Some(parent) = csv_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AtlasError::io(format!("creating {}", parent.display()), e))?;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(num_samples);
    let mut counts = [0usize; 5];

    let bar = ProgressBar::new(num_samples as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("generating");

    for i in 0..num_samples {
        let tag = TagType::ALL[rng.gen_range(0..TagType::ALL.len())];
        let source = Source::ALL[rng.gen_range(0..Source::ALL.len())];
        counts[tag.index()] += 1;

        let file_name = format!("synthetic_{}_{:04}.jpg", tag.as_str(), i);
        let image = render_tag_image(tag, &mut rng);
        let image_path = images_dir.join(&file_name);
        image
            .save(&image_path)
            .map_err(|e| AtlasError::image(image_path.clone(), e))?;

        records.push(TagRecord {
            image_path: file_name,
            lat: BASE_LAT + rng.gen_range(-COORD_JITTER..COORD_JITTER),
            lon: BASE_LON + rng.gen_range(-COORD_JITTER..COORD_JITTER),
            tag,
            source,
        });
        bar.inc(1);
    }
    bar.finish_and_clear();

    write_csv(csv_path, &records)?;

    let distribution: Vec<(TagType, usize)> = TagType::ALL
        .iter()
        .map(|t| (*t, counts[t.index()]))
        .collect();
    for (tag, count) in &distribution {
        info!(tag = tag.as_str(), count, "Generated class");
    }

    Ok(GenerateSummary {
        num_samples,
        csv_path: csv_path.to_path_buf(),
        images_dir: images_dir.to_path_buf(),
        distribution,
    })
}

fn write_csv(path: &Path, records: &[TagRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| AtlasError::csv(path, e))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| AtlasError::csv(path, e))?;
    }
    writer
        .flush()
        .map_err(|e| AtlasError::io(format!("flushing {}", path.display()), e))?;
    Ok(())
}

/// Renders one 224x224 image with the shape for `tag` on a light background.
fn render_tag_image(tag: TagType, rng: &mut StdRng) -> RgbImage {
    let background = Rgb([
        rng.gen_range(180..=255u8),
        rng.gen_range(180..=255u8),
        rng.gen_range(180..=255u8),
    ]);
    let ink = Rgb([
        rng.gen_range(0..=90u8),
        rng.gen_range(0..=90u8),
        rng.gen_range(0..=90u8),
    ]);
    let mut image = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, background);

    let s = IMAGE_SIZE as i32;
    // Random offset keeps shapes off-center so position alone is not a cue.
    let dx = rng.gen_range(-20..=20);
    let dy = rng.gen_range(-20..=20);

    match tag {
        TagType::Ramp => {
            fill_triangle(
                &mut image,
                (40 + dx, s - 50 + dy),
                (s - 40 + dx, s - 50 + dy),
                (s - 40 + dx, 60 + dy),
                ink,
            );
        }
        TagType::Elevator => {
            fill_rect(&mut image, 60 + dx, 40 + dy, s - 60 + dx, s - 40 + dy, ink);
            fill_rect(
                &mut image,
                s / 2 - 3 + dx,
                50 + dy,
                s / 2 + 3 + dx,
                s - 50 + dy,
                background,
            );
        }
        TagType::TactilePath => {
            for row in 0..5 {
                for col in 0..5 {
                    let cx = 50 + col * 30 + dx;
                    let cy = 50 + row * 30 + dy;
                    fill_circle(&mut image, cx, cy, 8, ink);
                }
            }
        }
        TagType::Entrance => {
            fill_rect(&mut image, 70 + dx, 100 + dy, s - 70 + dx, s - 30 + dy, ink);
            fill_circle(&mut image, s / 2 + dx, 100 + dy, (s - 140) / 2, ink);
        }
        TagType::Obstacle => {
            thick_line(&mut image, (40 + dx, 40 + dy), (s - 40 + dx, s - 40 + dy), 9, ink);
            thick_line(&mut image, (s - 40 + dx, 40 + dy), (40 + dx, s - 40 + dy), 9, ink);
        }
    }

    image
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    for y in y0.min(y1)..=y0.max(y1) {
        for x in x0.min(x1)..=x0.max(x1) {
            put_pixel(image, x, y, color);
        }
    }
}

fn fill_circle(image: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    let r2 = radius * radius;
    for y in -radius..=radius {
        for x in -radius..=radius {
            if x * x + y * y <= r2 {
                put_pixel(image, cx + x, cy + y, color);
            }
        }
    }
}

fn fill_triangle(
    image: &mut RgbImage,
    a: (i32, i32),
    b: (i32, i32),
    c: (i32, i32),
    color: Rgb<u8>,
) {
    let min_x = a.0.min(b.0).min(c.0);
    let max_x = a.0.max(b.0).max(c.0);
    let min_y = a.1.min(b.1).min(c.1);
    let max_y = a.1.max(b.1).max(c.1);

    let edge = |p: (i32, i32), q: (i32, i32), r: (i32, i32)| -> i64 {
        (q.0 - p.0) as i64 * (r.1 - p.1) as i64 - (q.1 - p.1) as i64 * (r.0 - p.0) as i64
    };

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = (x, y);
            let w0 = edge(a, b, p);
            let w1 = edge(b, c, p);
            let w2 = edge(c, a, p);
            let all_neg = w0 <= 0 && w1 <= 0 && w2 <= 0;
            let all_pos = w0 >= 0 && w1 >= 0 && w2 >= 0;
            if all_neg || all_pos {
                put_pixel(image, x, y, color);
            }
        }
    }
}

fn thick_line(
    image: &mut RgbImage,
    from: (i32, i32),
    to: (i32, i32),
    width: i32,
    color: Rgb<u8>,
) {
    let (x0, y0) = (from.0 as f64, from.1 as f64);
    let (x1, y1) = (to.0 as f64, to.1 as f64);
    let len2 = (x1 - x0).powi(2) + (y1 - y0).powi(2);
    let half = width as f64 / 2.0;

    let min_x = from.0.min(to.0) - width;
    let max_x = from.0.max(to.0) + width;
    let min_y = from.1.min(to.1) - width;
    let max_y = from.1.max(to.1) + width;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (px, py) = (x as f64, y as f64);
            // Distance from the pixel to the segment.
            let t = if len2 == 0.0 {
                0.0
            } else {
                (((px - x0) * (x1 - x0) + (py - y0) * (y1 - y0)) / len2).clamp(0.0, 1.0)
            };
            let (cx, cy) = (x0 + t * (x1 - x0), y0 + t * (y1 - y0));
            let dist2 = (px - cx).powi(2) + (py - cy).powi(2);
            if dist2 <= half * half {
                put_pixel(image, x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_writes_images_and_csv() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("tags.csv");
        let images_dir = dir.path().join("images");

        let summary = generate_dataset(10, &csv_path, &images_dir, 7).unwrap();
        assert_eq!(summary.num_samples, 10);
        assert!(csv_path.exists());

        let count = fs::read_dir(&images_dir).unwrap().count();
        assert_eq!(count, 10);

        let total: usize = summary.distribution.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_generated_csv_is_loadable() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("tags.csv");
        let images_dir = dir.path().join("images");
        generate_dataset(8, &csv_path, &images_dir, 3).unwrap();

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        for row in reader.deserialize::<TagRecord>() {
            let record = row.unwrap();
            assert!(images_dir.join(&record.image_path).exists());
            assert!((record.lat - BASE_LAT).abs() <= COORD_JITTER);
            assert!((record.lon - BASE_LON).abs() <= COORD_JITTER);
        }
    }

    #[test]
    fn test_zero_samples_rejected() {
        let dir = TempDir::new().unwrap();
        let result = generate_dataset(0, &dir.path().join("t.csv"), dir.path(), 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_shapes_touch_the_canvas() {
        let mut rng = StdRng::seed_from_u64(11);
        for tag in TagType::ALL {
            let image = render_tag_image(tag, &mut rng);
            let distinct: std::collections::HashSet<_> =
                image.pixels().map(|p| p.0).collect();
            assert!(distinct.len() >= 2, "{} rendered a blank image", tag);
        }
    }
}
