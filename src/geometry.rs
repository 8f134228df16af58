// 🌐 Tract geometry - GeoJSON polygons, CRS guard, state plane projection
//
// The only numeric use of geometry is area. Area in degrees is meaningless
// (and shrinks with latitude), so area is refused on geographic geometry;
// callers project to NAD83 / California zone 3 (EPSG:2227) first, the
// same projection the density maps were originally built with.

use crate::error::{PipelineError, Result};
use crate::records::GeoId;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Square US survey feet in a square US survey mile (5280²)
pub const SQ_FT_PER_SQ_MI: f64 = 27_878_400.0;

/// Metres per US survey foot
pub const US_SURVEY_FOOT_M: f64 = 1200.0 / 3937.0;

// ============================================================================
// COORDINATE REFERENCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude degrees (EPSG:4326, CRS84, NAD83 geographic)
    Geographic,

    /// NAD83 / California zone 3, US survey feet (EPSG:2227)
    CaliforniaZone3Feet,
}

impl Crs {
    /// Resolve a GeoJSON `crs.properties.name`
    ///
    /// Accepts "EPSG:2227", "urn:ogc:def:crs:EPSG::2227", "...:CRS84", etc.
    pub fn from_name(name: &str) -> Option<Crs> {
        let upper = name.to_uppercase();
        let code = upper.rsplit(':').next().unwrap_or("");
        match code {
            "4326" | "4269" | "CRS84" => Some(Crs::Geographic),
            "2227" => Some(Crs::CaliforniaZone3Feet),
            _ => None,
        }
    }

    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Geographic)
    }

    pub fn urn(&self) -> &'static str {
        match self {
            Crs::Geographic => "urn:ogc:def:crs:OGC:1.3:CRS84",
            Crs::CaliforniaZone3Feet => "urn:ogc:def:crs:EPSG::2227",
        }
    }
}

// ============================================================================
// LAMBERT CONFORMAL CONIC (2SP)
// ============================================================================

/// Ellipsoidal Lambert Conformal Conic with two standard parallels
///
/// Snyder, "Map Projections - A Working Manual" (USGS PP 1395), eq. 15-1..15-10.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertConformalConic {
    a: f64,
    e: f64,
    n: f64,
    big_f: f64,
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    /// Metres per output unit
    unit: f64,
    target: Crs,
}

impl LambertConformalConic {
    /// EPSG:2227 on the GRS80 ellipsoid, output in US survey feet
    pub fn california_zone3() -> Self {
        let a = 6_378_137.0;
        let f = 1.0 / 298.257_222_101;
        Self::new(
            a,
            f,
            38.0 + 26.0 / 60.0, // 38°26'
            37.0 + 4.0 / 60.0,  // 37°04'
            36.5,
            -120.5,
            2_000_000.000_101_6,
            500_000.000_101_6,
            US_SURVEY_FOOT_M,
            Crs::CaliforniaZone3Feet,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        a: f64,
        flattening: f64,
        lat1_deg: f64,
        lat2_deg: f64,
        lat0_deg: f64,
        lon0_deg: f64,
        false_easting_m: f64,
        false_northing_m: f64,
        unit: f64,
        target: Crs,
    ) -> Self {
        let e = (2.0 * flattening - flattening * flattening).sqrt();
        let (lat1, lat2, lat0) = (lat1_deg.to_radians(), lat2_deg.to_radians(), lat0_deg.to_radians());

        let m = |phi: f64| phi.cos() / (1.0 - (e * phi.sin()).powi(2)).sqrt();
        let t = |phi: f64| {
            let es = e * phi.sin();
            (std::f64::consts::FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
        };

        let (m1, m2) = (m(lat1), m(lat2));
        let (t1, t2, t0) = (t(lat1), t(lat2), t(lat0));

        let n = (m1.ln() - m2.ln()) / (t1.ln() - t2.ln());
        let big_f = m1 / (n * t1.powf(n));
        let rho0 = a * big_f * t0.powf(n);

        LambertConformalConic {
            a,
            e,
            n,
            big_f,
            rho0,
            lon0: lon0_deg.to_radians(),
            false_easting: false_easting_m,
            false_northing: false_northing_m,
            unit,
            target,
        }
    }

    pub fn target(&self) -> Crs {
        self.target
    }

    /// (lon, lat) degrees → (x, y) in output units
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let phi = lat_deg.to_radians();
        let es = self.e * phi.sin();
        let t = (std::f64::consts::FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0);
        let rho = self.a * self.big_f * t.powf(self.n);
        let theta = self.n * (lon_deg.to_radians() - self.lon0);

        let x = self.false_easting + rho * theta.sin();
        let y = self.false_northing + self.rho0 - rho * theta.cos();
        (x / self.unit, y / self.unit)
    }
}

// ============================================================================
// POLYGONS
// ============================================================================

pub type Coord = (f64, f64);

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    pub holes: Vec<Vec<Coord>>,
}

impl Polygon {
    fn map_coords(&self, f: &impl Fn(Coord) -> Coord) -> Polygon {
        Polygon {
            exterior: self.exterior.iter().map(|c| f(*c)).collect(),
            holes: self
                .holes
                .iter()
                .map(|ring| ring.iter().map(|c| f(*c)).collect())
                .collect(),
        }
    }

    /// Planar area: exterior minus holes, in squared coordinate units
    fn planar_area(&self) -> Result<f64> {
        let mut area = ring_area(&self.exterior)?;
        for hole in &self.holes {
            area -= ring_area(hole)?;
        }
        Ok(area.max(0.0))
    }

    fn to_coordinates(&self) -> Value {
        let ring = |r: &Vec<Coord>| Value::Array(r.iter().map(|(x, y)| json!([x, y])).collect());
        let mut rings = vec![ring(&self.exterior)];
        rings.extend(self.holes.iter().map(ring));
        Value::Array(rings)
    }
}

/// Shoelace formula; closed or open rings give the same result
fn ring_area(ring: &[Coord]) -> Result<f64> {
    if ring.len() < 3 {
        return Err(PipelineError::Geometry(format!(
            "ring has {} positions, need at least 3",
            ring.len()
        )));
    }

    let twice: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|((x1, y1), (x2, y2))| x1 * y2 - x2 * y1)
        .sum();

    Ok(twice.abs() / 2.0)
}

/// Polygons of one tract in a known CRS
#[derive(Debug, Clone, PartialEq)]
pub struct TractGeometry {
    pub tract_id: GeoId,
    pub crs: Crs,
    pub polygons: Vec<Polygon>,
}

impl TractGeometry {
    /// Area in square US survey feet; refuses geographic coordinates
    pub fn area_sq_ft(&self) -> Result<f64> {
        if !self.crs.is_projected() {
            return Err(PipelineError::Geometry(format!(
                "tract {}: area requested in a geographic CRS, project it first",
                self.tract_id
            )));
        }

        self.polygons.iter().try_fold(0.0, |acc, p| Ok(acc + p.planar_area()?))
    }

    pub fn area_sqmi(&self) -> Result<f64> {
        Ok(self.area_sq_ft()? / SQ_FT_PER_SQ_MI)
    }

    /// Reproject geographic geometry; already-projected geometry must match
    pub fn project(&self, projection: &LambertConformalConic) -> Result<TractGeometry> {
        match self.crs {
            Crs::Geographic => Ok(TractGeometry {
                tract_id: self.tract_id.clone(),
                crs: projection.target(),
                polygons: self
                    .polygons
                    .iter()
                    .map(|p| p.map_coords(&|(lon, lat)| projection.forward(lon, lat)))
                    .collect(),
            }),
            crs if crs == projection.target() => Ok(self.clone()),
            crs => Err(PipelineError::Geometry(format!(
                "tract {}: cannot reproject {:?} to {:?}",
                self.tract_id,
                crs,
                projection.target()
            ))),
        }
    }

    /// Area in square miles, projecting first when needed
    pub fn projected_area_sqmi(&self, projection: &LambertConformalConic) -> Result<f64> {
        if self.crs.is_projected() {
            self.area_sqmi()
        } else {
            self.project(projection)?.area_sqmi()
        }
    }

    /// GeoJSON geometry object (Polygon or MultiPolygon)
    pub fn to_geojson(&self) -> Value {
        match self.polygons.as_slice() {
            [single] => json!({ "type": "Polygon", "coordinates": single.to_coordinates() }),
            many => json!({
                "type": "MultiPolygon",
                "coordinates": Value::Array(many.iter().map(|p| p.to_coordinates()).collect()),
            }),
        }
    }
}

// ============================================================================
// GEOJSON INPUT
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawCollection {
    features: Vec<RawFeature>,
    #[serde(default)]
    crs: Option<RawCrs>,
}

#[derive(Debug, Deserialize)]
struct RawCrs {
    properties: RawCrsProperties,
}

#[derive(Debug, Deserialize)]
struct RawCrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawGeometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

/// Parse a FeatureCollection keyed by `id_field`
///
/// Features without geometry are skipped. Two features for one tract is a
/// data integrity error.
pub fn parse_feature_collection(text: &str, id_field: &str) -> Result<Vec<TractGeometry>> {
    let raw: RawCollection =
        serde_json::from_str(text).map_err(|e| PipelineError::config(format!("invalid GeoJSON: {}", e)))?;

    let crs = match &raw.crs {
        None => Crs::Geographic,
        Some(named) => Crs::from_name(&named.properties.name).ok_or_else(|| {
            PipelineError::config(format!("unsupported CRS '{}'", named.properties.name))
        })?,
    };

    let mut seen = std::collections::HashSet::new();
    let mut tracts = Vec::with_capacity(raw.features.len());

    for (index, feature) in raw.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            tracing::debug!(index, "feature without geometry skipped");
            continue;
        };

        let tract_id = feature_id(feature.properties.as_ref(), id_field)
            .map_err(|msg| PipelineError::config(format!("feature {}: {}", index, msg)))?;

        if !seen.insert(tract_id.clone()) {
            return Err(PipelineError::DataIntegrity(format!(
                "tract {} has more than one geometry feature",
                tract_id
            )));
        }

        let polygons = match geometry {
            RawGeometry::Polygon { coordinates } => vec![polygon(coordinates, index)?],
            RawGeometry::MultiPolygon { coordinates } => coordinates
                .into_iter()
                .map(|p| polygon(p, index))
                .collect::<Result<Vec<_>>>()?,
        };

        tracts.push(TractGeometry { tract_id, crs, polygons });
    }

    Ok(tracts)
}

fn feature_id(properties: Option<&Map<String, Value>>, id_field: &str) -> std::result::Result<GeoId, String> {
    let value = properties
        .and_then(|p| p.get(id_field))
        .ok_or_else(|| format!("missing '{}' property", id_field))?;

    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(format!("'{}' is not a string or number: {}", id_field, other)),
    };

    GeoId::parse(&raw)
}

fn polygon(rings: Vec<Vec<Vec<f64>>>, feature: usize) -> Result<Polygon> {
    let mut rings = rings.into_iter().map(|ring| {
        ring.into_iter()
            .map(|pos| match pos.as_slice() {
                [x, y, ..] => Ok((*x, *y)),
                _ => Err(PipelineError::Geometry(format!(
                    "feature {}: position with fewer than 2 ordinates",
                    feature
                ))),
            })
            .collect::<Result<Vec<Coord>>>()
    });

    let exterior = rings
        .next()
        .ok_or_else(|| PipelineError::Geometry(format!("feature {}: polygon without rings", feature)))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;

    Ok(Polygon { exterior, holes })
}
