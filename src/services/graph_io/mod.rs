//! Plain-text rating graphs in, trained factors out.
//!
//! Input is one observation per line, `user item [rating]`, separated by
//! whitespace or commas. Blank lines and lines starting with `#` are skipped
//! and a missing rating counts as an implicit 1.0.
//!
//! Output is one vertex per line, `<id>\t<f1> <f2> ...`, where the id is
//! prefixed with `u` or `i`.

use crate::engine::LocalEngine;
use crate::error::{Error, Result};
use crate::models::{Vertex, VertexId};
use crate::utils::validation::validate_rating;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info};

pub const IMPLICIT_RATING: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingRecord {
    pub user: u64,
    pub item: u64,
    pub rating: f32,
}

pub fn parse_line(line_no: usize, line: &str) -> Result<Option<RatingRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|field| !field.is_empty())
        .collect();
    if fields.len() < 2 || fields.len() > 3 {
        return Err(Error::Parse {
            line: line_no,
            reason: format!("expected `user item [rating]`, got {} fields", fields.len()),
        });
    }

    let parse_id = |field: &str, what: &str| {
        field.parse::<u64>().map_err(|e| Error::Parse {
            line: line_no,
            reason: format!("invalid {} id {:?}: {}", what, field, e),
        })
    };
    let user = parse_id(fields[0], "user")?;
    let item = parse_id(fields[1], "item")?;
    let rating = match fields.get(2) {
        Some(field) => field.parse::<f32>().map_err(|e| Error::Parse {
            line: line_no,
            reason: format!("invalid rating {:?}: {}", field, e),
        })?,
        None => IMPLICIT_RATING,
    };
    validate_rating(line_no, rating)?;

    Ok(Some(RatingRecord { user, item, rating }))
}

pub fn read_ratings<R: BufRead>(reader: R) -> Result<Vec<RatingRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        if let Some(record) = parse_line(index + 1, &line?)? {
            records.push(record);
        }
    }
    debug!("Parsed {} ratings", records.len());
    Ok(records)
}

pub fn read_ratings_file<P: AsRef<Path>>(path: P) -> Result<Vec<RatingRecord>> {
    let file = File::open(path.as_ref())?;
    let records = read_ratings(BufReader::new(file))?;
    info!("Loaded {} ratings from {}", records.len(), path.as_ref().display());
    Ok(records)
}

/// Adds every rating as a user-to-item edge. Items appear in the graph once
/// the training protocol first messages them.
pub fn load_ratings(engine: &mut LocalEngine, records: &[RatingRecord]) {
    for record in records {
        engine.add_edge(VertexId::user(record.user), VertexId::item(record.item), record.rating);
    }
}

/// Writes the factors of every vertex that has them. Returns the number of
/// lines written.
pub fn write_factors<'a, W, I>(writer: &mut W, vertices: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a Vertex>,
{
    let mut written = 0;
    for vertex in vertices {
        let Some(value) = vertex.value() else {
            continue;
        };
        let factors: Vec<String> = value.as_slice().iter().map(|x| x.to_string()).collect();
        writeln!(writer, "{}\t{}", vertex.id(), factors.join(" "))?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FactorVector;

    #[test]
    fn test_parse_edge_list() {
        let input = "# user item rating\n1 1 1.0\n\n1,2,2.5\n2\t7\n";
        let records = read_ratings(input.as_bytes()).unwrap();
        assert_eq!(
            records,
            vec![
                RatingRecord { user: 1, item: 1, rating: 1.0 },
                RatingRecord { user: 1, item: 2, rating: 2.5 },
                RatingRecord { user: 2, item: 7, rating: IMPLICIT_RATING },
            ]
        );
    }

    #[test]
    fn test_parse_errors_carry_line_number() {
        let err = read_ratings("1 1 1.0\n1 x 2.0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));

        let err = read_ratings("1 2 3 4\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let err = read_ratings("1 2 NaN\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    #[test]
    fn test_write_factors_skips_uninitialized_vertices() {
        let mut user = Vertex::new(VertexId::user(1));
        user.set_value(FactorVector::from_vec(vec![0.5, 1.0]));
        let item = Vertex::new(VertexId::item(2));

        let mut out = Vec::new();
        let written = write_factors(&mut out, [&user, &item]).unwrap();
        assert_eq!(written, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "u1\t0.5 1\n");
    }
}
