//! Landmark map: an immutable, ordered collection of known landmark positions.
//!
//! Maps are stored as plain text with one landmark per line:
//!
//! ```text
//! 92.064  -34.777  1
//! 61.109  -47.132  2
//! ```
//!
//! Columns are the map-frame x and y positions in meters followed by an integer id, separated by
//! any mix of tabs and spaces. Blank lines and lines starting with `#` are ignored.
use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Landmark identifier as it appears in the map file and in association diagnostics.
pub type LandmarkId = i32;

/// A single map landmark
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: LandmarkId,
    pub x: f64,
    pub y: f64,
}
impl Landmark {
    pub fn new(id: LandmarkId, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
    /// Squared Euclidean distance to a map-frame point
    pub fn distance_squared(&self, x: f64, y: f64) -> f64 {
        (self.x - x).powi(2) + (self.y - y).powi(2)
    }
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark(id: {}, x: {}, y: {})", self.id, self.x, self.y)
    }
}

/// Static, ordered landmark map. Iteration order is file order and is what the nearest-neighbour
/// association uses to break ties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
}
impl Display for LandmarkMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LandmarkMap({} landmarks)", self.landmarks.len())
    }
}
impl From<Vec<Landmark>> for LandmarkMap {
    fn from(landmarks: Vec<Landmark>) -> Self {
        LandmarkMap::new(landmarks)
    }
}
impl FromStr for LandmarkMap {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut landmarks = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            landmarks.push(parse_landmark_line(line).with_context(|| {
                format!("invalid landmark on line {}: '{}'", index + 1, line)
            })?);
        }
        Ok(LandmarkMap::new(landmarks))
    }
}
impl LandmarkMap {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        LandmarkMap { landmarks }
    }
    /// Load a map from a whitespace-delimited text file.
    ///
    /// # Example
    /// ```ignore
    /// use landmark_pf::LandmarkMap;
    /// let map = LandmarkMap::from_file("data/map_data.txt").expect("could not read map");
    /// println!("{map}");
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not open map file '{}'", path.display()))?;
        let map: LandmarkMap = text
            .parse()
            .with_context(|| format!("could not parse map file '{}'", path.display()))?;
        debug!("Loaded {} landmarks from {}", map.len(), path.display());
        Ok(map)
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// First landmark carrying `id`
    pub fn get(&self, id: LandmarkId) -> Option<&Landmark> {
        self.iter().find(|l| l.id == id)
    }
    /// Landmarks within `range` (inclusive) of a map-frame point, in map order.
    pub fn within_range(&self, x: f64, y: f64, range: f64) -> Vec<Landmark> {
        let range_squared = range * range;
        self.iter()
            .filter(|l| l.distance_squared(x, y) <= range_squared)
            .copied()
            .collect()
    }
}
impl<'a> IntoIterator for &'a LandmarkMap {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;

    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}

fn parse_landmark_line(line: &str) -> Result<Landmark> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        bail!("expected 3 columns (x y id), found {}", fields.len());
    }
    let x: f64 = fields[0]
        .parse()
        .with_context(|| format!("bad x coordinate '{}'", fields[0]))?;
    let y: f64 = fields[1]
        .parse()
        .with_context(|| format!("bad y coordinate '{}'", fields[1]))?;
    let id: LandmarkId = fields[2]
        .parse()
        .with_context(|| format!("bad landmark id '{}'", fields[2]))?;
    if !x.is_finite() || !y.is_finite() {
        bail!("landmark coordinates must be finite");
    }
    Ok(Landmark::new(id, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_parse_tabs_and_spaces() {
        let text = "92.064\t-34.777\t1\n61.109  -47.132 2\n\n# comment\n17.42\t-4.5005\t3\n";
        let map: LandmarkMap = text.parse().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.landmarks()[0].id, 1);
        assert_approx_eq!(map.landmarks()[1].x, 61.109, 1e-12);
        assert_approx_eq!(map.landmarks()[2].y, -4.5005, 1e-12);
    }
    #[test]
    fn test_parse_reports_line_number() {
        let text = "1.0 2.0 1\n3.0 oops 2\n";
        let err = text.parse::<LandmarkMap>().unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
    #[test]
    fn test_parse_rejects_wrong_column_count() {
        assert!("1.0 2.0\n".parse::<LandmarkMap>().is_err());
        assert!("1.0 2.0 3 4\n".parse::<LandmarkMap>().is_err());
        assert!("1.0 2.0 3.5\n".parse::<LandmarkMap>().is_err());
    }
    #[test]
    fn test_within_range_is_inclusive_and_ordered() {
        let map = LandmarkMap::new(vec![
            Landmark::new(1, 3.0, 4.0),
            Landmark::new(2, 10.0, 0.0),
            Landmark::new(3, 0.0, 5.0),
        ]);
        let near = map.within_range(0.0, 0.0, 5.0);
        assert_eq!(near.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 3]);
    }
    #[test]
    fn test_get_by_id() {
        let map = LandmarkMap::new(vec![Landmark::new(4, 1.0, 1.0), Landmark::new(9, 2.0, 2.0)]);
        assert_eq!(map.get(9).map(|l| l.x), Some(2.0));
        assert!(map.get(1).is_none());
    }
    #[test]
    fn test_iteration_follows_map_order() {
        let map = LandmarkMap::new(vec![
            Landmark::new(7, 1.0, 1.0),
            Landmark::new(2, 2.0, 2.0),
            Landmark::new(5, 3.0, 3.0),
        ]);
        let mut ids = Vec::new();
        for landmark in &map {
            ids.push(landmark.id);
        }
        assert_eq!(ids, vec![7, 2, 5]);
        assert_eq!(map.iter().map(|l| l.x).sum::<f64>(), 6.0);
    }
    #[test]
    fn test_from_file() {
        let map = LandmarkMap::from_file("./data/map_data.txt").expect("Failed to read map");
        assert!(!map.is_empty());
        assert_eq!(map.landmarks()[0].id, 1);
    }
    #[test]
    fn test_from_file_missing() {
        assert!(LandmarkMap::from_file("nonexistent_map.txt").is_err());
    }
}
