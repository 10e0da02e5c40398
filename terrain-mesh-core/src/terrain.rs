use crate::{
    error::{MeshError, MeshResult},
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap, fmt};

/// Index of a terrain type inside a [`TerrainTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerrainId(pub u32);

/// Terrain type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainDef {
    /// Unique terrain name used in border files and rule tables.
    pub name: String,
    /// Blend priority; higher priority spreads over lower.
    #[serde(default)]
    pub priority: i32,
    /// Maximum transition distance in meters.
    #[serde(default = "TerrainDef::default_xon_dist")]
    pub xon_dist: Scalar,
    /// Water surface terrain.
    #[serde(default)]
    pub water: bool,
    /// Airport surface terrain.
    #[serde(default)]
    pub airport: bool,
}

impl TerrainDef {
    pub fn new(name: impl Into<String>, priority: i32, xon_dist: Scalar) -> Self {
        Self {
            name: name.into(),
            priority,
            xon_dist,
            water: false,
            airport: false,
        }
    }

    pub fn water(mut self) -> Self {
        self.water = true;
        self
    }

    pub fn airport(mut self) -> Self {
        self.airport = true;
        self
    }

    fn default_xon_dist() -> Scalar {
        100.0
    }
}

/// Terrain definitions with a total blend priority order.
///
/// Ties in `priority` are broken by declaration order.
///
/// # Examples
/// ```
/// use terrain_mesh_core::prelude::*;
///
/// let table = TerrainTable::new(vec![
///     TerrainDef::new("grass", 10, 100.0),
///     TerrainDef::new("rock", 20, 50.0),
/// ])
/// .unwrap();
/// let grass = table.find("grass").unwrap();
/// let rock = table.find("rock").unwrap();
/// assert!(table.is_lower_priority(grass, rock));
/// assert_eq!(table.xon_dist(grass, rock), 50.0);
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TerrainTable {
    defs: Vec<TerrainDef>,
    names: HashMap<String, TerrainId>,
}

impl TerrainTable {
    pub fn new(defs: Vec<TerrainDef>) -> MeshResult<Self> {
        let mut names = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if def.name.is_empty() || def.name.contains(char::is_whitespace) {
                return Err(MeshError::InvalidConfig(format!(
                    "terrain name must be a non-empty word: {:?}",
                    def.name
                )));
            }
            if names.insert(def.name.clone(), TerrainId(i as u32)).is_some() {
                return Err(MeshError::InvalidConfig(format!(
                    "duplicate terrain name: {}",
                    def.name
                )));
            }
            if def.xon_dist < 0.0 {
                return Err(MeshError::InvalidConfig(format!(
                    "negative transition distance for terrain: {}",
                    def.name
                )));
            }
        }
        Ok(Self { defs, names })
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TerrainId> {
        (0..self.defs.len() as u32).map(TerrainId)
    }

    pub fn get(&self, id: TerrainId) -> Option<&TerrainDef> {
        self.defs.get(id.0 as usize)
    }

    pub fn find(&self, name: &str) -> Option<TerrainId> {
        self.names.get(name).copied()
    }

    /// Like [`Self::find`] but unknown names are a configuration error.
    pub fn resolve(&self, name: &str) -> MeshResult<TerrainId> {
        self.find(name)
            .ok_or_else(|| MeshError::UnknownTerrain(name.to_owned()))
    }

    pub fn name(&self, id: TerrainId) -> &str {
        self.get(id).map(|d| d.name.as_str()).unwrap_or("?")
    }

    pub fn is_water(&self, id: TerrainId) -> bool {
        self.get(id).map(|d| d.water).unwrap_or(false)
    }

    pub fn is_airport(&self, id: TerrainId) -> bool {
        self.get(id).map(|d| d.airport).unwrap_or(false)
    }

    /// First water terrain, used for faces tagged as water by the constraint map.
    pub fn water_terrain(&self) -> Option<TerrainId> {
        self.ids().find(|id| self.is_water(*id))
    }

    /// Total priority order.
    pub fn compare_priority(&self, a: TerrainId, b: TerrainId) -> Ordering {
        let pa = self.get(a).map(|d| d.priority).unwrap_or(i32::MIN);
        let pb = self.get(b).map(|d| d.priority).unwrap_or(i32::MIN);
        pa.cmp(&pb).then(a.0.cmp(&b.0))
    }

    /// Tells if `a` has strictly lower blend priority than `b`.
    pub fn is_lower_priority(&self, a: TerrainId, b: TerrainId) -> bool {
        self.compare_priority(a, b) == Ordering::Less
    }

    /// Transition radius between two terrains: the smaller of both radii.
    pub fn xon_dist(&self, a: TerrainId, b: TerrainId) -> Scalar {
        let da = self.get(a).map(|d| d.xon_dist).unwrap_or(0.0);
        let db = self.get(b).map(|d| d.xon_dist).unwrap_or(0.0);
        da.min(db)
    }
}

/// Raster derived feature vector of a single triangle.
///
/// Categorical features are `None` when their plane is missing or has no data.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainFeatures {
    pub land_use: Option<i32>,
    pub climate: Option<i32>,
    pub agri_style: Option<i32>,
    /// Surface slope in degrees.
    pub slope: Scalar,
    /// Downhill heading in degrees, clockwise from north.
    pub heading: Scalar,
    pub elevation: Scalar,
    pub temperature: Option<Scalar>,
    pub temperature_range: Option<Scalar>,
    pub rainfall: Option<Scalar>,
    pub relative_elevation: Option<Scalar>,
    pub relative_elevation_range: Option<Scalar>,
    pub urban_density: Option<Scalar>,
    pub urban_radial: Option<Scalar>,
    pub urban_transport: Option<Scalar>,
    pub urban_square: bool,
    pub latitude: Scalar,
}

impl fmt::Display for TerrainFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "land_use={:?} climate={:?} agri={:?} slope={:.2} heading={:.1} elev={:.1} \
             temp={:?}/{:?} rain={:?} rel_elev={:?}/{:?} urban={:?}/{:?}/{:?} square={} lat={:.4}",
            self.land_use,
            self.climate,
            self.agri_style,
            self.slope,
            self.heading,
            self.elevation,
            self.temperature,
            self.temperature_range,
            self.rainfall,
            self.relative_elevation,
            self.relative_elevation_range,
            self.urban_density,
            self.urban_radial,
            self.urban_transport,
            self.urban_square,
            self.latitude,
        )
    }
}

/// Pure mapping from a feature vector to a terrain type.
pub trait TerrainSelector {
    fn select(&self, features: &TerrainFeatures) -> Option<TerrainId>;
}

impl<F> TerrainSelector for F
where
    F: Fn(&TerrainFeatures) -> Option<TerrainId>,
{
    fn select(&self, features: &TerrainFeatures) -> Option<TerrainId> {
        self(features)
    }
}

/// Closed numeric interval; either end may be open ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    #[serde(default)]
    pub min: Option<Scalar>,
    #[serde(default)]
    pub max: Option<Scalar>,
}

impl FeatureRange {
    pub fn new(min: Scalar, max: Scalar) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: Scalar) -> bool {
        self.min.map(|m| value >= m).unwrap_or(true) && self.max.map(|m| value <= m).unwrap_or(true)
    }

    fn contains_opt(&self, value: Option<Scalar>) -> bool {
        value.map(|v| self.contains(v)).unwrap_or(false)
    }
}

/// Single row of the rule table. Unset conditions match anything.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainRule {
    pub terrain: String,
    #[serde(default)]
    pub land_use: Option<Vec<i32>>,
    #[serde(default)]
    pub climate: Option<Vec<i32>>,
    #[serde(default)]
    pub agri_style: Option<Vec<i32>>,
    #[serde(default)]
    pub slope: Option<FeatureRange>,
    #[serde(default)]
    pub heading: Option<FeatureRange>,
    #[serde(default)]
    pub elevation: Option<FeatureRange>,
    #[serde(default)]
    pub temperature: Option<FeatureRange>,
    #[serde(default)]
    pub temperature_range: Option<FeatureRange>,
    #[serde(default)]
    pub rainfall: Option<FeatureRange>,
    #[serde(default)]
    pub relative_elevation: Option<FeatureRange>,
    #[serde(default)]
    pub relative_elevation_range: Option<FeatureRange>,
    #[serde(default)]
    pub urban_density: Option<FeatureRange>,
    #[serde(default)]
    pub urban_radial: Option<FeatureRange>,
    #[serde(default)]
    pub urban_transport: Option<FeatureRange>,
    #[serde(default)]
    pub urban_square: Option<bool>,
    #[serde(default)]
    pub latitude: Option<FeatureRange>,
}

impl TerrainRule {
    pub fn matches(&self, f: &TerrainFeatures) -> bool {
        fn category(allowed: &Option<Vec<i32>>, value: Option<i32>) -> bool {
            match allowed {
                Some(allowed) => value.map(|v| allowed.contains(&v)).unwrap_or(false),
                None => true,
            }
        }
        fn range(r: &Option<FeatureRange>, value: Scalar) -> bool {
            r.as_ref().map(|r| r.contains(value)).unwrap_or(true)
        }
        fn range_opt(r: &Option<FeatureRange>, value: Option<Scalar>) -> bool {
            r.as_ref().map(|r| r.contains_opt(value)).unwrap_or(true)
        }
        category(&self.land_use, f.land_use)
            && category(&self.climate, f.climate)
            && category(&self.agri_style, f.agri_style)
            && range(&self.slope, f.slope)
            && range(&self.heading, f.heading)
            && range(&self.elevation, f.elevation)
            && range(&self.latitude, f.latitude)
            && range_opt(&self.temperature, f.temperature)
            && range_opt(&self.temperature_range, f.temperature_range)
            && range_opt(&self.rainfall, f.rainfall)
            && range_opt(&self.relative_elevation, f.relative_elevation)
            && range_opt(&self.relative_elevation_range, f.relative_elevation_range)
            && range_opt(&self.urban_density, f.urban_density)
            && range_opt(&self.urban_radial, f.urban_radial)
            && range_opt(&self.urban_transport, f.urban_transport)
            && self
                .urban_square
                .map(|s| s == f.urban_square)
                .unwrap_or(true)
    }
}

/// First-match rule table with terrain names resolved against a [`TerrainTable`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RuleTable {
    rules: Vec<(TerrainRule, TerrainId)>,
}

impl RuleTable {
    pub fn new(rules: Vec<TerrainRule>, terrains: &TerrainTable) -> MeshResult<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let id = terrains.resolve(&rule.terrain)?;
                Ok((rule, id))
            })
            .collect::<MeshResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TerrainSelector for RuleTable {
    fn select(&self, features: &TerrainFeatures) -> Option<TerrainId> {
        self.rules
            .iter()
            .find(|(rule, _)| rule.matches(features))
            .map(|(_, id)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TerrainTable {
        TerrainTable::new(vec![
            TerrainDef::new("water", 0, 0.0).water(),
            TerrainDef::new("grass", 10, 200.0),
            TerrainDef::new("forest", 10, 100.0),
            TerrainDef::new("rock", 30, 50.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_priority_is_total() {
        let t = table();
        let grass = t.find("grass").unwrap();
        let forest = t.find("forest").unwrap();
        assert!(t.is_lower_priority(grass, forest));
        assert!(!t.is_lower_priority(forest, grass));
        assert!(!t.is_lower_priority(grass, grass));
        assert_eq!(t.water_terrain(), t.find("water"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = TerrainTable::new(vec![
            TerrainDef::new("grass", 1, 1.0),
            TerrainDef::new("grass", 2, 1.0),
        ]);
        assert!(matches!(result, Err(MeshError::InvalidConfig(_))));
    }

    #[test]
    fn test_rule_table_first_match() {
        let t = table();
        let rules = RuleTable::new(
            vec![
                TerrainRule {
                    terrain: "rock".to_owned(),
                    slope: Some(FeatureRange {
                        min: Some(30.0),
                        max: None,
                    }),
                    ..Default::default()
                },
                TerrainRule {
                    terrain: "forest".to_owned(),
                    land_use: Some(vec![5, 6]),
                    ..Default::default()
                },
                TerrainRule {
                    terrain: "grass".to_owned(),
                    ..Default::default()
                },
            ],
            &t,
        )
        .unwrap();
        let mut f = TerrainFeatures {
            slope: 45.0,
            land_use: Some(5),
            ..Default::default()
        };
        assert_eq!(rules.select(&f), t.find("rock"));
        f.slope = 5.0;
        assert_eq!(rules.select(&f), t.find("forest"));
        f.land_use = None;
        assert_eq!(rules.select(&f), t.find("grass"));
    }

    #[test]
    fn test_rule_with_unknown_terrain_is_fatal() {
        let rules = vec![TerrainRule {
            terrain: "lava".to_owned(),
            ..Default::default()
        }];
        assert!(matches!(
            RuleTable::new(rules, &table()),
            Err(MeshError::UnknownTerrain(name)) if name == "lava"
        ));
    }

    #[test]
    fn test_rule_deserializes_from_json() {
        let rule: TerrainRule =
            serde_json::from_str(r#"{"terrain":"rock","slope":{"min":20.0}}"#).unwrap();
        assert_eq!(rule.slope.unwrap().min, Some(20.0));
        assert!(rule.land_use.is_none());
    }
}
