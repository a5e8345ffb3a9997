//! Minimal ESRI shapefile writer for polyline output (`.shp`/`.shx`/`.dbf`).
//!
//! Only what the components tool needs: polyline records (shape type 3)
//! plus a single numeric attribute column. Shapefile headers mix byte
//! orders; lengths are in 16-bit words, record numbers are 1-based.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, RoadloomError};

const SHAPE_TYPE_POLYLINE: i32 = 3;
const FILE_HEADER_WORDS: i32 = 50;

/// One polyline with its attribute value.
pub struct PolylineFeature {
    pub attribute: u32,
    /// (lon, lat) pairs in degrees.
    pub points: Vec<(f64, f64)>,
}

struct BoundingBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BoundingBox {
    fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    fn extend(&mut self, (x, y): (f64, f64)) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn or_zero(&self) -> (f64, f64, f64, f64) {
        if self.min_x.is_finite() {
            (self.min_x, self.min_y, self.max_x, self.max_y)
        } else {
            (0.0, 0.0, 0.0, 0.0)
        }
    }
}

fn file_header(total_words: i32, bbox: &BoundingBox) -> Vec<u8> {
    let mut header = Vec::with_capacity(100);
    header.extend_from_slice(&9994i32.to_be_bytes());
    header.extend_from_slice(&[0u8; 20]);
    header.extend_from_slice(&total_words.to_be_bytes());
    header.extend_from_slice(&1000i32.to_le_bytes());
    header.extend_from_slice(&SHAPE_TYPE_POLYLINE.to_le_bytes());
    let (min_x, min_y, max_x, max_y) = bbox.or_zero();
    for value in [min_x, min_y, max_x, max_y, 0.0, 0.0, 0.0, 0.0] {
        header.extend_from_slice(&value.to_le_bytes());
    }
    debug_assert_eq!(header.len(), 100);
    header
}

fn record_content(feature: &PolylineFeature) -> Vec<u8> {
    let mut bbox = BoundingBox::new();
    for &point in &feature.points {
        bbox.extend(point);
    }
    let (min_x, min_y, max_x, max_y) = bbox.or_zero();

    let mut content = Vec::new();
    content.extend_from_slice(&SHAPE_TYPE_POLYLINE.to_le_bytes());
    for value in [min_x, min_y, max_x, max_y] {
        content.extend_from_slice(&value.to_le_bytes());
    }
    content.extend_from_slice(&1i32.to_le_bytes()); // one part
    content.extend_from_slice(&(feature.points.len() as i32).to_le_bytes());
    content.extend_from_slice(&0i32.to_le_bytes()); // part offset
    for &(x, y) in &feature.points {
        content.extend_from_slice(&x.to_le_bytes());
        content.extend_from_slice(&y.to_le_bytes());
    }
    content
}

/// Write `<prefix>.shp`, `<prefix>.shx` and `<prefix>.dbf` with one numeric
/// column named after `attribute_name` (11 bytes max).
pub fn write_polylines(
    prefix: &Path,
    attribute_name: &str,
    features: &[PolylineFeature],
) -> Result<()> {
    let create = |extension: &str| -> Result<BufWriter<File>> {
        let path = prefix.with_extension(extension);
        File::create(&path)
            .map(BufWriter::new)
            .map_err(|e| {
                RoadloomError::ResourceExhausted(format!(
                    "cannot create {}: {e}",
                    path.display()
                ))
            })
    };

    let mut bbox = BoundingBox::new();
    for feature in features {
        for &point in &feature.points {
            bbox.extend(point);
        }
    }

    // .shp and .shx
    let contents: Vec<Vec<u8>> = features.iter().map(record_content).collect();
    let total_record_words: i32 = contents
        .iter()
        .map(|content| 4 + content.len() as i32 / 2)
        .sum();

    let mut shp = create("shp")?;
    shp.write_all(&file_header(FILE_HEADER_WORDS + total_record_words, &bbox))?;
    let mut shx = create("shx")?;
    shx.write_all(&file_header(
        FILE_HEADER_WORDS + 4 * features.len() as i32,
        &bbox,
    ))?;

    let mut offset_words = FILE_HEADER_WORDS;
    for (index, content) in contents.iter().enumerate() {
        let content_words = content.len() as i32 / 2;
        shx.write_all(&offset_words.to_be_bytes())?;
        shx.write_all(&content_words.to_be_bytes())?;

        shp.write_all(&(index as i32 + 1).to_be_bytes())?;
        shp.write_all(&content_words.to_be_bytes())?;
        shp.write_all(content)?;

        offset_words += 4 + content_words;
    }
    shp.flush()?;
    shx.flush()?;

    // .dbf with a single numeric column
    let mut dbf = create("dbf")?;
    let field_length = 10u8;
    let record_size = 1 + u16::from(field_length);
    let header_size = 32 + 32 + 1;

    let mut header = Vec::new();
    header.push(0x03);
    header.extend_from_slice(&[24, 1, 1]); // arbitrary fixed date
    header.extend_from_slice(&(features.len() as u32).to_le_bytes());
    header.extend_from_slice(&(header_size as u16).to_le_bytes());
    header.extend_from_slice(&record_size.to_le_bytes());
    header.extend_from_slice(&[0u8; 20]);

    let mut descriptor = [0u8; 32];
    let name = attribute_name.as_bytes();
    descriptor[..name.len().min(11)].copy_from_slice(&name[..name.len().min(11)]);
    descriptor[11] = b'N';
    descriptor[16] = field_length;
    header.extend_from_slice(&descriptor);
    header.push(0x0D);
    dbf.write_all(&header)?;

    for feature in features {
        dbf.write_all(b" ")?;
        let formatted = format!("{:>width$}", feature.attribute, width = field_length as usize);
        dbf.write_all(formatted.as_bytes())?;
    }
    dbf.write_all(&[0x1A])?;
    dbf.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_consistent_triple() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("component");

        let features = vec![
            PolylineFeature {
                attribute: 1,
                points: vec![(7.0, 50.0), (7.001, 50.0)],
            },
            PolylineFeature {
                attribute: 2,
                points: vec![(7.0, 50.1), (7.001, 50.1), (7.002, 50.12)],
            },
        ];
        write_polylines(&prefix, "COMPONENT", &features).unwrap();

        let shp = std::fs::read(prefix.with_extension("shp")).unwrap();
        let shx = std::fs::read(prefix.with_extension("shx")).unwrap();
        let dbf = std::fs::read(prefix.with_extension("dbf")).unwrap();

        // magic and declared length match the actual size
        assert_eq!(&shp[0..4], &9994i32.to_be_bytes());
        let declared_words = i32::from_be_bytes(shp[24..28].try_into().unwrap());
        assert_eq!(declared_words as usize * 2, shp.len());

        // one shx entry per feature
        assert_eq!((shx.len() - 100) / 8, features.len());

        // dbf record count
        let count = u32::from_le_bytes(dbf[4..8].try_into().unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_empty_feature_set() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("empty");
        write_polylines(&prefix, "COMPONENT", &[]).unwrap();
        let shp = std::fs::read(prefix.with_extension("shp")).unwrap();
        assert_eq!(shp.len(), 100);
    }
}
