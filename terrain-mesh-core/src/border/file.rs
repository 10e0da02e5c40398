use super::{BorderRecord, BorderSegment, BorderSide, BorderVertex, MatchFile};
use crate::{
    coord::Coord,
    error::{MeshError, MeshResult},
    Scalar,
};
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// File name of the match file of the tile with given south-west corner.
///
/// # Examples
/// ```
/// use terrain_mesh_core::prelude::*;
///
/// assert_eq!(match_file_name(-8, 41), "+41-008.border");
/// ```
pub fn match_file_name(lon: i32, lat: i32) -> String {
    format!("{:+03}{:+04}.border", lat, lon)
}

/// Path of the match file of a tile inside the border directory.
pub fn match_file_path(dir: &Path, lon: i32, lat: i32) -> PathBuf {
    dir.join(match_file_name(lon, lat))
}

/// Loads a match file. A missing file means the neighbor was not built yet.
pub fn load_match_file(path: &Path) -> MeshResult<Option<MatchFile>> {
    match fs::read_to_string(path) {
        Ok(text) => parse_match_file(&text).map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(MeshError::BorderIo {
            path: path.to_owned(),
            source,
        }),
    }
}

/// Loads the neighbor records adopted by the slave sides of the tile at `(lon, lat)`.
///
/// Missing neighbors and neighbors without the facing side are skipped.
pub fn load_neighbor_records(
    dir: &Path,
    lon: i32,
    lat: i32,
) -> MeshResult<BTreeMap<BorderSide, BorderRecord>> {
    let mut result = BTreeMap::new();
    for side in BorderSide::all() {
        if side.is_master() {
            continue;
        }
        let (dx, dy) = side.neighbor_offset();
        let path = match_file_path(dir, lon + dx, lat + dy);
        let Some(mut file) = load_match_file(&path)? else {
            log::debug!("No {} neighbor border at {:?}", side, path);
            continue;
        };
        match file.sides.remove(&side.opposite()) {
            Some(record) => {
                result.insert(side, record);
            }
            None => log::warn!("Neighbor border {:?} has no {} side", path, side.opposite()),
        }
    }
    Ok(result)
}

/// Writes a match file, replacing any previous one.
pub fn write_match_file(path: &Path, file: &MatchFile) -> MeshResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| MeshError::BorderIo {
                path: parent.to_owned(),
                source,
            })?;
        }
    }
    fs::write(path, format_match_file(file)).map_err(|source| MeshError::BorderIo {
        path: path.to_owned(),
        source,
    })
}

/// Serializes match data into its line based text form.
///
/// Scalars use shortest round-trip formatting so that parsed values are bit identical.
pub fn format_match_file(file: &MatchFile) -> String {
    file.to_string()
}

impl fmt::Display for MatchFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (side, record) in &self.sides {
            writeln!(f, "SIDE {}", side)?;
            for (i, vertex) in record.vertices.iter().enumerate() {
                if let Some(segment) = i.checked_sub(1).and_then(|s| record.segments.get(s)) {
                    writeln!(f, "TERRAIN {}", segment.terrain)?;
                    writeln!(f, "BORDER_C {}", segment.borders.len())?;
                    for border in &segment.borders {
                        writeln!(f, "BORDER_T {}", border)?;
                    }
                }
                writeln!(f, "VT {} {} {}", vertex.pos.x, vertex.pos.y, vertex.height)?;
                writeln!(f, "VBC {}", vertex.blends.len())?;
                for (name, alpha) in &vertex.blends {
                    writeln!(f, "VB {} {}", alpha, name)?;
                }
            }
            writeln!(f, "END")?;
        }
        Ok(())
    }
}

struct Lines<'a> {
    inner: Box<dyn Iterator<Item = (usize, Vec<&'a str>)> + 'a>,
    last: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: Box::new(
                text.lines()
                    .enumerate()
                    .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
                    .filter(|(_, tokens)| !tokens.is_empty() && !tokens[0].starts_with('#')),
            ),
            last: 0,
        }
    }

    fn next(&mut self) -> Option<(usize, Vec<&'a str>)> {
        let result = self.inner.next();
        if let Some((line, _)) = &result {
            self.last = *line;
        }
        result
    }

    fn expect(&mut self, keyword: &str, args: usize) -> MeshResult<(usize, Vec<&'a str>)> {
        let (line, tokens) = self.next().ok_or_else(|| MeshError::BorderParse {
            line: self.last + 1,
            message: format!("expected {} but reached end of file", keyword),
        })?;
        if tokens[0] != keyword {
            return Err(MeshError::BorderParse {
                line,
                message: format!("expected {} but found {}", keyword, tokens[0]),
            });
        }
        if tokens.len() != args + 1 {
            return Err(MeshError::BorderParse {
                line,
                message: format!("{} takes {} arguments", keyword, args),
            });
        }
        Ok((line, tokens))
    }
}

fn parse_scalar(line: usize, token: &str) -> MeshResult<Scalar> {
    token.parse::<Scalar>().map_err(|_| MeshError::BorderParse {
        line,
        message: format!("invalid number: {}", token),
    })
}

fn parse_count(line: usize, token: &str) -> MeshResult<usize> {
    token.parse::<usize>().map_err(|_| MeshError::BorderParse {
        line,
        message: format!("invalid count: {}", token),
    })
}

fn parse_vertex(lines: &mut Lines, line: usize, tokens: &[&str]) -> MeshResult<BorderVertex> {
    if tokens.len() != 4 {
        return Err(MeshError::BorderParse {
            line,
            message: "VT takes 3 arguments".to_owned(),
        });
    }
    let pos = Coord::new(parse_scalar(line, tokens[1])?, parse_scalar(line, tokens[2])?);
    let height = parse_scalar(line, tokens[3])?;
    let (line, tokens) = lines.expect("VBC", 1)?;
    let count = parse_count(line, tokens[1])?;
    let mut blends = BTreeMap::new();
    for _ in 0..count {
        let (line, tokens) = lines.expect("VB", 2)?;
        blends.insert(tokens[2].to_owned(), parse_scalar(line, tokens[1])?);
    }
    Ok(BorderVertex {
        pos,
        height,
        blends,
    })
}

fn parse_segment(lines: &mut Lines, tokens: &[&str], line: usize) -> MeshResult<BorderSegment> {
    if tokens.len() != 2 {
        return Err(MeshError::BorderParse {
            line,
            message: "TERRAIN takes 1 argument".to_owned(),
        });
    }
    let (line, count) = lines.expect("BORDER_C", 1)?;
    let count = parse_count(line, count[1])?;
    let mut borders = Vec::with_capacity(count);
    for _ in 0..count {
        let (_, tokens) = lines.expect("BORDER_T", 1)?;
        borders.push(tokens[1].to_owned());
    }
    Ok(BorderSegment {
        terrain: tokens[1].to_owned(),
        borders,
    })
}

fn parse_record(lines: &mut Lines, start: usize) -> MeshResult<BorderRecord> {
    let mut record = BorderRecord::default();
    loop {
        let (line, tokens) = lines.next().ok_or_else(|| MeshError::BorderParse {
            line: start,
            message: "side is not terminated with END".to_owned(),
        })?;
        match tokens[0] {
            "END" => break,
            "VT" => {
                if !record.vertices.is_empty() && record.segments.len() != record.vertices.len() {
                    return Err(MeshError::BorderParse {
                        line,
                        message: "border vertex without preceding segment".to_owned(),
                    });
                }
                let vertex = parse_vertex(lines, line, &tokens)?;
                record.vertices.push(vertex);
            }
            "TERRAIN" => {
                if record.vertices.is_empty() || record.segments.len() >= record.vertices.len() {
                    return Err(MeshError::BorderParse {
                        line,
                        message: "segment without preceding border vertex".to_owned(),
                    });
                }
                let segment = parse_segment(lines, &tokens, line)?;
                record.segments.push(segment);
            }
            keyword => {
                return Err(MeshError::BorderParse {
                    line,
                    message: format!("unexpected {}", keyword),
                })
            }
        }
    }
    if !record.vertices.is_empty() && record.segments.len() + 1 != record.vertices.len() {
        return Err(MeshError::BorderParse {
            line: lines.last,
            message: format!(
                "{} border vertices need {} segments, found {}",
                record.vertices.len(),
                record.vertices.len() - 1,
                record.segments.len()
            ),
        });
    }
    Ok(record)
}

/// Parses match data from its line based text form.
pub fn parse_match_file(text: &str) -> MeshResult<MatchFile> {
    let mut lines = Lines::new(text);
    let mut result = MatchFile::default();
    while let Some((line, tokens)) = lines.next() {
        if tokens[0] != "SIDE" || tokens.len() != 2 {
            return Err(MeshError::BorderParse {
                line,
                message: format!("expected SIDE but found {}", tokens.join(" ")),
            });
        }
        let side = tokens[1]
            .parse::<BorderSide>()
            .map_err(|_| MeshError::BorderParse {
                line,
                message: format!("unknown side: {}", tokens[1]),
            })?;
        let record = parse_record(&mut lines, line)?;
        result.sides.insert(side, record);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MatchFile {
        let mut blends = BTreeMap::new();
        blends.insert("rock".to_owned(), 0.25);
        let record = BorderRecord {
            vertices: vec![
                BorderVertex {
                    pos: Coord::new(11.0, 40.0),
                    height: 120.5,
                    blends: BTreeMap::new(),
                },
                BorderVertex {
                    pos: Coord::new(11.0, 40.1 + 1.0e-13),
                    height: -3.0,
                    blends,
                },
                BorderVertex {
                    pos: Coord::new(11.0, 41.0),
                    height: 7.0,
                    blends: BTreeMap::new(),
                },
            ],
            segments: vec![
                BorderSegment {
                    terrain: "grass".to_owned(),
                    borders: vec!["rock".to_owned()],
                },
                BorderSegment {
                    terrain: "forest".to_owned(),
                    borders: vec![],
                },
            ],
        };
        let mut file = MatchFile::default();
        file.sides.insert(BorderSide::East, record);
        file
    }

    #[test]
    fn test_text_is_exact() {
        let file = sample();
        let parsed = parse_match_file(&format_match_file(&file)).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn test_format_layout() {
        let mut blends = BTreeMap::new();
        blends.insert("sand".to_owned(), 0.5);
        let mut file = parse_match_file("SIDE north\nEND\n").unwrap();
        file.sides.insert(
            BorderSide::East,
            BorderRecord {
                vertices: vec![
                    BorderVertex {
                        pos: Coord::new(1.0, 0.0),
                        height: 2.0,
                        blends: BTreeMap::new(),
                    },
                    BorderVertex {
                        pos: Coord::new(1.0, 1.0),
                        height: 3.5,
                        blends,
                    },
                ],
                segments: vec![BorderSegment {
                    terrain: "grass".to_owned(),
                    borders: vec!["sand".to_owned()],
                }],
            },
        );
        let text = format_match_file(&file);
        assert_eq!(text, file.to_string());
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            [
                "SIDE east",
                "VT 1 0 2",
                "VBC 0",
                "TERRAIN grass",
                "BORDER_C 1",
                "BORDER_T sand",
                "VT 1 1 3.5",
                "VBC 1",
                "VB 0.5 sand",
                "END",
                "SIDE north",
                "END",
            ]
        );
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = match_file_path(dir.path(), 10, 40);
        assert!(load_match_file(&path).unwrap().is_none());
        write_match_file(&path, &sample()).unwrap();
        assert_eq!(load_match_file(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn test_neighbor_records_come_from_facing_sides() {
        let dir = tempfile::tempdir().unwrap();
        // west neighbor of tile (10, 40) wrote its east side
        write_match_file(&match_file_path(dir.path(), 9, 40), &sample()).unwrap();
        let records = load_neighbor_records(dir.path(), 10, 40).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[&BorderSide::West], sample().sides[&BorderSide::East]);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_match_file("SIDE up\nEND\n").unwrap_err();
        assert!(matches!(err, MeshError::BorderParse { line: 1, .. }));

        let err = parse_match_file("SIDE east\nVT 1 2 3\nVBC 0\nVT 1 3 3\nVBC 0\nEND\n").unwrap_err();
        assert!(matches!(err, MeshError::BorderParse { line: 4, .. }));

        let err = parse_match_file("SIDE east\nVT 1 2 3\nVBC 1\nEND\n").unwrap_err();
        assert!(matches!(err, MeshError::BorderParse { line: 4, .. }));

        let err = parse_match_file("SIDE east\nVT 1 2 3\nVBC 0\n").unwrap_err();
        assert!(matches!(err, MeshError::BorderParse { line: 1, .. }));
    }

    #[test]
    fn test_comments_and_empty_sides() {
        let file = parse_match_file("# tile\nSIDE north\nEND\n").unwrap();
        assert!(file.sides[&BorderSide::North].vertices.is_empty());
    }
}
