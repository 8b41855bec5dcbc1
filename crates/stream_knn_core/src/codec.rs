//! # Record Codecs
//!
//! Text encodings for the records crossing the pipeline boundary. Each entity
//! gets its own [`RecordCodec`] implementation, so the file source and the
//! result sink do not depend on any particular wire format.
//!
//! ## Point records
//!
//! `id <d> timestamp <d> coord_1 <d> ... <d> coord_D [<d> isQuery]`
//!
//! The trailing query flag is optional and accepts `true`/`false`, `t`/`f`
//! and `1`/`0` in any case.
//!
//! ## Result records
//!
//! Delimited: `slideId <d> queryId <d> neighborId:distance <d> ...`, ordered by
//! ascending distance. JSON: one [`KnnResult`] object per line.

use crate::error::KnnError;
use crate::types::{Coords, KnnResult, Neighbor, Point};

/// Encodes and decodes one record type to and from a single line of text.
pub trait RecordCodec<T>: Send + Sync {
    fn encode(&self, record: &T) -> Result<String, KnnError>;
    fn decode(&self, line: &str) -> Result<T, KnnError>;
}

/// Delimited-text codec for input points of a fixed dimensionality.
#[derive(Debug, Clone)]
pub struct DelimitedPointCodec {
    delimiter: String,
    dimensions: usize,
}

impl DelimitedPointCodec {
    pub fn new(delimiter: impl Into<String>, dimensions: usize) -> Result<Self, KnnError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(KnnError::config("record delimiter must not be empty"));
        }
        if dimensions == 0 {
            return Err(KnnError::config("point records need at least one coordinate"));
        }
        Ok(Self {
            delimiter,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

impl RecordCodec<Point> for DelimitedPointCodec {
    fn encode(&self, point: &Point) -> Result<String, KnnError> {
        let mut fields = Vec::with_capacity(point.dimensions() + 3);
        fields.push(point.id.clone());
        fields.push(point.timestamp.to_string());
        fields.extend(point.coords.iter().map(|c| c.to_string()));
        fields.push(point.is_query.to_string());
        Ok(fields.join(&self.delimiter))
    }

    fn decode(&self, line: &str) -> Result<Point, KnnError> {
        let fields: Vec<&str> = line
            .trim_end_matches(['\r', '\n'])
            .split(self.delimiter.as_str())
            .map(str::trim)
            .collect();
        if fields.len() < 3 {
            return Err(KnnError::parse(format!(
                "expected id, timestamp and coordinates, found {} field(s)",
                fields.len()
            )));
        }

        let id = fields[0];
        if id.is_empty() {
            return Err(KnnError::parse("empty point id"));
        }
        let timestamp: i64 = fields[1]
            .parse()
            .map_err(|_| KnnError::parse(format!("invalid timestamp '{}'", fields[1])))?;

        let rest = &fields[2..];
        let (coord_fields, is_query) = if rest.len() == self.dimensions {
            (rest, false)
        } else if rest.len() == self.dimensions + 1 {
            match parse_flag(rest[self.dimensions]) {
                Some(flag) => (&rest[..self.dimensions], flag),
                None => {
                    return Err(KnnError::DimensionMismatch {
                        expected: self.dimensions,
                        found: rest.len(),
                    })
                }
            }
        } else {
            let found = match rest.last().and_then(|f| parse_flag(f)) {
                Some(_) if rest.len() > 1 => rest.len() - 1,
                _ => rest.len(),
            };
            return Err(KnnError::DimensionMismatch {
                expected: self.dimensions,
                found,
            });
        };

        let coords = coord_fields
            .iter()
            .map(|field| match field.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(KnnError::parse(format!("invalid coordinate '{field}'"))),
            })
            .collect::<Result<Coords, KnnError>>()?;

        Ok(Point::new(id, timestamp, coords).with_query(is_query))
    }
}

/// Delimited-text codec for KNN results.
#[derive(Debug, Clone)]
pub struct DelimitedResultCodec {
    delimiter: String,
}

impl DelimitedResultCodec {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl Default for DelimitedResultCodec {
    fn default() -> Self {
        Self::new("\t")
    }
}

impl RecordCodec<KnnResult> for DelimitedResultCodec {
    fn encode(&self, result: &KnnResult) -> Result<String, KnnError> {
        let mut line = format!(
            "{}{}{}",
            result.slide_id, self.delimiter, result.query_point_id
        );
        for neighbor in &result.neighbors {
            line.push_str(&self.delimiter);
            line.push_str(&format!("{}:{}", neighbor.point_id, neighbor.distance));
        }
        Ok(line)
    }

    fn decode(&self, line: &str) -> Result<KnnResult, KnnError> {
        let mut fields = line
            .trim_end_matches(['\r', '\n'])
            .split(self.delimiter.as_str());
        let slide_field = fields.next().unwrap_or_default();
        let slide_id: i64 = slide_field
            .trim()
            .parse()
            .map_err(|_| KnnError::parse(format!("invalid slide id '{slide_field}'")))?;
        let query_point_id = fields
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| KnnError::parse("missing query point id"))?
            .to_string();

        let neighbors = fields
            .filter(|field| !field.is_empty())
            .map(|field| -> Result<Neighbor, KnnError> {
                let (point_id, distance) = field
                    .rsplit_once(':')
                    .ok_or_else(|| KnnError::parse(format!("invalid neighbor '{field}'")))?;
                let distance: f64 = distance
                    .parse()
                    .map_err(|_| KnnError::parse(format!("invalid distance in '{field}'")))?;
                Ok(Neighbor {
                    point_id: point_id.to_string(),
                    distance,
                })
            })
            .collect::<Result<Vec<_>, KnnError>>()?;

        Ok(KnnResult {
            slide_id,
            query_point_id,
            neighbors,
        })
    }
}

/// JSON-lines codec for KNN results.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResultCodec;

impl RecordCodec<KnnResult> for JsonResultCodec {
    fn encode(&self, result: &KnnResult) -> Result<String, KnnError> {
        serde_json::to_string(result).map_err(|e| KnnError::Encode(e.to_string()))
    }

    fn decode(&self, line: &str) -> Result<KnnResult, KnnError> {
        serde_json::from_str(line).map_err(|e| KnnError::parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> KnnResult {
        KnnResult {
            slide_id: 12,
            query_point_id: "q:1".to_string(),
            neighbors: vec![
                Neighbor {
                    point_id: "a".to_string(),
                    distance: 0.5,
                },
                Neighbor {
                    point_id: "b".to_string(),
                    distance: 1.25,
                },
            ],
        }
    }

    #[test]
    fn test_decode_point_with_and_without_flag() {
        let codec = DelimitedPointCodec::new("\t", 2).unwrap();

        let point = codec.decode("p1\t1500\t3.5\t-2").unwrap();
        assert_eq!(point.id, "p1");
        assert_eq!(point.timestamp, 1500);
        assert_eq!(point.coords.as_slice(), &[3.5, -2.0]);
        assert!(!point.is_query);
        assert!(!point.is_boundary);

        assert!(codec.decode("p1\t1500\t3.5\t-2\tTrue").unwrap().is_query);
        assert!(codec.decode("p1\t1500\t3.5\t-2\t1").unwrap().is_query);
        assert!(!codec.decode("p1\t1500\t3.5\t-2\tf\r\n").unwrap().is_query);
    }

    #[test]
    fn test_decode_point_rejects_malformed_records() {
        let codec = DelimitedPointCodec::new(",", 2).unwrap();
        assert!(matches!(codec.decode("p1,10"), Err(KnnError::Parse(_))));
        assert!(matches!(codec.decode(",10,1,2"), Err(KnnError::Parse(_))));
        assert!(matches!(codec.decode("p1,soon,1,2"), Err(KnnError::Parse(_))));
        assert!(matches!(codec.decode("p1,10,1,NaN"), Err(KnnError::Parse(_))));
        assert!(matches!(codec.decode("p1,10,1,x"), Err(KnnError::Parse(_))));
    }

    #[test]
    fn test_decode_point_reports_dimension_mismatch() {
        let codec = DelimitedPointCodec::new(",", 2).unwrap();
        assert_eq!(
            codec.decode("p1,10,1").unwrap_err(),
            KnnError::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            codec.decode("p1,10,1,2,3").unwrap_err(),
            KnnError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );
        assert_eq!(
            codec.decode("p1,10,1,2,3,true").unwrap_err(),
            KnnError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_point_codec_rejects_bad_setup() {
        assert!(DelimitedPointCodec::new("", 2).is_err());
        assert!(DelimitedPointCodec::new(",", 0).is_err());
    }

    #[test]
    fn test_point_encoding_is_decodable() {
        let codec = DelimitedPointCodec::new(",", 3).unwrap();
        let point = Point::new("x", -4, [0.25, 1.0, 1e-3]).with_query(true);
        let decoded = codec.decode(&codec.encode(&point).unwrap()).unwrap();
        assert_eq!(decoded, point);
        assert!(decoded.is_query);
    }

    #[test]
    fn test_delimited_result_format() {
        let codec = DelimitedResultCodec::default();
        let line = codec.encode(&sample_result()).unwrap();
        assert_eq!(line, "12\tq:1\ta:0.5\tb:1.25");
        assert_eq!(codec.decode(&line).unwrap(), sample_result());

        let empty = KnnResult {
            slide_id: 3,
            query_point_id: "lonely".to_string(),
            neighbors: Vec::new(),
        };
        assert_eq!(codec.encode(&empty).unwrap(), "3\tlonely");
        assert_eq!(codec.decode("3\tlonely").unwrap(), empty);
        assert!(codec.decode("x\tq").is_err());
        assert!(codec.decode("3\tq\tnodistance").is_err());
    }

    #[test]
    fn test_json_result_codec() {
        let codec = JsonResultCodec;
        let line = codec.encode(&sample_result()).unwrap();
        assert!(line.contains("\"query_point_id\":\"q:1\""));
        assert!(!line.contains('\n'));
        assert_eq!(codec.decode(&line).unwrap(), sample_result());
        assert!(codec.decode("{not json").is_err());
    }
}
