use std::io::{BufRead, Write};

use crate::mot::mot_errors::CheckpointError;
use crate::mot::{Category, VisualEvent, VisualEventSet};

/// Number of entries of a property vector of a valid event
pub const PROPERTY_VECTOR_LEN: usize = 14;

/// One row of numeric properties per event. The first entry is the event id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyVectorSet {
    pub vectors: Vec<Vec<f32>>,
}

impl PropertyVectorSet {
    pub fn vector_for_event(&self, id: u32) -> Option<&[f32]> {
        self.vectors
            .iter()
            .find(|v| v.first().map(|first| *first as u32) == Some(id))
            .map(|v| v.as_slice())
    }
    /// Writes a `rows columns` header followed by one space separated row per event.
    /// The column count is taken from the first row.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), CheckpointError> {
        let columns = self.vectors.first().map(|v| v.len()).unwrap_or(0);
        writeln!(writer, "{} {}", self.vectors.len(), columns)?;
        for vector in &self.vectors {
            for value in vector.iter().take(columns) {
                write!(writer, "{} ", value)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
    /// Reads back what [`PropertyVectorSet::write_to`] wrote
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self, CheckpointError> {
        let mut values = vec![];
        for line in reader.lines() {
            for item in line?.split_whitespace() {
                let value = item.parse::<f32>().map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("bad property value '{}'", item),
                    )
                })?;
                values.push(value);
            }
        }
        let malformed = || std::io::Error::new(std::io::ErrorKind::InvalidData, "bad property header");
        let (rows, columns) = match values.as_slice() {
            [rows, columns, ..] => (*rows as usize, *columns as usize),
            _ => return Err(malformed().into()),
        };
        let expected = rows.checked_mul(columns).and_then(|n| n.checked_add(2));
        if expected != Some(values.len()) {
            return Err(malformed().into());
        }
        let vectors = if columns == 0 {
            vec![vec![]; rows]
        } else {
            values[2..].chunks(columns).map(|c| c.to_vec()).collect()
        };
        Ok(PropertyVectorSet { vectors })
    }
}

fn category_value(category: Category) -> f32 {
    match category {
        Category::Interesting => 1.0,
        Category::Boring => 0.0,
    }
}

impl VisualEvent {
    /// Shape and intensity properties of the largest token:
    /// id, category, area, uxx, uyy, uxy, major axis, minor axis,
    /// elongation, orientation, max/min/avg intensity, FOE angle.
    /// An event whose largest region is invalid gets area -1 and zeros.
    pub fn property_vector(&self) -> Vec<f32> {
        let token = self.get_max_size_token();
        let region = &token.region;
        let mut vector = vec![self.get_id() as f32, category_value(self.get_category())];
        if !region.is_valid() {
            vector.push(-1.0);
            vector.extend([0.0; 10]);
            return vector;
        }
        let moments = region.second_moments();
        let (major, minor) = region.axes();
        let intensity = region.intensity().unwrap_or_default();
        vector.extend([
            region.area() as f32,
            moments.uxx,
            moments.uyy,
            moments.uxy,
            major,
            minor,
            region.elongation(),
            region.orientation(),
            intensity.max,
            intensity.min,
            intensity.avg,
            token.angle,
        ]);
        vector
    }
}

impl VisualEventSet {
    pub fn property_vector_set(&self) -> PropertyVectorSet {
        PropertyVectorSet {
            vectors: self.get_events().map(|e| e.property_vector()).collect(),
        }
    }
    /// Property vectors of the closed events only
    pub fn property_vector_set_to_save(&self) -> PropertyVectorSet {
        PropertyVectorSet {
            vectors: self
                .get_events()
                .filter(|e| e.is_closed())
                .map(|e| e.property_vector())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::test_data::blank_frame;
    use crate::mot::{DetectionParameters, FrameData, Region, Token};
    use crate::utils::Rect;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn test_property_vector_of_largest_token() {
        let params = Arc::new(DetectionParameters::default());
        let mut event = VisualEvent::new(3, Token::new(Region::from_rect(Rect::new(0, 0, 4, 2)), 0), params);
        event
            .assign(Token::new(Region::from_rect(Rect::new(2, 0, 8, 4)), 1), None, 1)
            .unwrap();
        let vector = event.property_vector();
        assert_eq!(vector.len(), PROPERTY_VECTOR_LEN);
        assert_eq!(vector[0], 3.0);
        assert_eq!(vector[1], 0.0);
        assert_eq!(vector[2], 32.0);
        // 8x4 block: uxx = (8^2 - 1) / 12, uyy = (4^2 - 1) / 12
        assert_relative_eq!(vector[3], 5.25, epsilon = 1e-4);
        assert_relative_eq!(vector[4], 1.25, epsilon = 1e-4);
        assert_relative_eq!(vector[5], 0.0, epsilon = 1e-4);
        assert!(vector[6] > vector[7]);
        assert_relative_eq!(vector[9], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_property_vector_of_invalid_region() {
        let params = Arc::new(DetectionParameters::default());
        let event = VisualEvent::new(5, Token::new(Region::default(), 0), params);
        let vector = event.property_vector();
        assert_eq!(vector.len(), 13);
        assert_eq!(&vector[..3], &[5.0, 0.0, -1.0]);
        assert!(vector[3..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_set_vectors_and_text_form() {
        let mut set = VisualEventSet::new(Arc::new(DetectionParameters::default()));
        let (image, segment) = blank_frame(64, 64);
        set.initiate_events(
            vec![
                Region::from_rect(Rect::new(0, 0, 5, 5)),
                Region::from_rect(Rect::new(30, 30, 6, 6)),
            ],
            &FrameData::new(0, &image, &segment),
        );
        set.get_event_by_number_mut(2).unwrap().close();

        let all = set.property_vector_set();
        assert_eq!(all.vectors.len(), 2);
        assert_eq!(all.vector_for_event(2).unwrap()[2], 36.0);
        assert!(all.vector_for_event(7).is_none());
        let to_save = set.property_vector_set_to_save();
        assert_eq!(to_save.vectors.len(), 1);
        assert_eq!(to_save.vectors[0][0], 2.0);

        let mut buffer = vec![];
        all.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("2 14\n"));
        let read = PropertyVectorSet::read_from(buffer.as_slice()).unwrap();
        assert_eq!(read.vectors.len(), 2);
        assert_eq!(read.vector_for_event(1).unwrap()[2], 25.0);
        assert!(PropertyVectorSet::read_from("3 2\n1 2\n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_rejects_huge_header() {
        assert!(PropertyVectorSet::read_from("1e30 1e30\n".as_bytes()).is_err());
        let empty = PropertyVectorSet::read_from("0 0\n".as_bytes()).unwrap();
        assert!(empty.vectors.is_empty());
    }
}
