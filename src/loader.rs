// 📂 Loaders - WAC tables, crosswalk, tract geometry
//
// Every read failure is a Configuration error naming the file, raised
// before any stage runs. Inputs ending in .gz are decompressed on the fly.

use crate::error::{PipelineError, Result};
use crate::geometry::{parse_feature_collection, TractGeometry};
use crate::records::{BlockRecord, CrosswalkEntry, GeoId, RAW_CATEGORY_COUNT};
use csv::{ByteRecord, Reader, ReaderBuilder};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

// ============================================================================
// INPUT FILES
// ============================================================================

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Open an input, gunzipping `*.gz`
fn open_input(path: &Path, what: &str) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| PipelineError::config_at(path, format!("cannot open {}: {}", what, e)))?;
    let reader = BufReader::new(file);
    if is_gzip(path) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn csv_reader(path: &Path, what: &str) -> Result<Reader<Box<dyn Read>>> {
    Ok(ReaderBuilder::new().has_headers(true).from_reader(open_input(path, what)?))
}

/// Header row as raw bytes; a row that is missing, or not CSV, is a
/// Configuration error
fn byte_headers(reader: &mut Reader<Box<dyn Read>>, path: &Path) -> Result<ByteRecord> {
    let headers = reader
        .byte_headers()
        .map_err(|e| PipelineError::config_at(path, format!("cannot read header: {}", e)))?
        .clone();
    if headers.is_empty() {
        return Err(PipelineError::config_at(path, "empty file, no header row"));
    }
    Ok(headers)
}

fn column_index(headers: &ByteRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name.as_bytes())
        .ok_or_else(|| PipelineError::config_at(path, format!("missing column '{}'", name)))
}

// ============================================================================
// WAC (Workplace Area Characteristics)
// ============================================================================

/// One row of a LODES WAC file; the other ~30 columns are ignored
#[derive(Debug, Deserialize)]
struct WacRow {
    w_geocode: String,
    #[serde(rename = "C000")]
    c000: u64,
    #[serde(rename = "CNS01")]
    cns01: u64,
    #[serde(rename = "CNS02")]
    cns02: u64,
    #[serde(rename = "CNS03")]
    cns03: u64,
    #[serde(rename = "CNS04")]
    cns04: u64,
    #[serde(rename = "CNS05")]
    cns05: u64,
    #[serde(rename = "CNS06")]
    cns06: u64,
    #[serde(rename = "CNS07")]
    cns07: u64,
    #[serde(rename = "CNS08")]
    cns08: u64,
    #[serde(rename = "CNS09")]
    cns09: u64,
    #[serde(rename = "CNS10")]
    cns10: u64,
    #[serde(rename = "CNS11")]
    cns11: u64,
    #[serde(rename = "CNS12")]
    cns12: u64,
    #[serde(rename = "CNS13")]
    cns13: u64,
    #[serde(rename = "CNS14")]
    cns14: u64,
    #[serde(rename = "CNS15")]
    cns15: u64,
    #[serde(rename = "CNS16")]
    cns16: u64,
    #[serde(rename = "CNS17")]
    cns17: u64,
    #[serde(rename = "CNS18")]
    cns18: u64,
    #[serde(rename = "CNS19")]
    cns19: u64,
    #[serde(rename = "CNS20")]
    cns20: u64,
}

impl WacRow {
    fn into_block(self) -> std::result::Result<BlockRecord, String> {
        let raw: [u64; RAW_CATEGORY_COUNT] = [
            self.cns01, self.cns02, self.cns03, self.cns04, self.cns05, self.cns06, self.cns07, self.cns08,
            self.cns09, self.cns10, self.cns11, self.cns12, self.cns13, self.cns14, self.cns15, self.cns16,
            self.cns17, self.cns18, self.cns19, self.cns20,
        ];

        Ok(BlockRecord {
            block_id: GeoId::parse(&self.w_geocode)?,
            raw,
            total_jobs: self.c000,
        })
    }
}

/// Read a WAC CSV (columns `w_geocode`, `C000`, `CNS01`..`CNS20`)
pub fn load_wac(path: &Path) -> Result<Vec<BlockRecord>> {
    let mut reader = csv_reader(path, "WAC table")?;

    // serde only looks at the header once a row exists, so check it up front
    let headers = byte_headers(&mut reader, path)?;
    column_index(&headers, "w_geocode", path)?;
    column_index(&headers, "C000", path)?;
    for n in 1..=RAW_CATEGORY_COUNT {
        column_index(&headers, &format!("CNS{:02}", n), path)?;
    }

    let mut blocks = Vec::new();
    for (line_num, result) in reader.deserialize::<WacRow>().enumerate() {
        // +2 because: 1-indexed + header row
        let row = result.map_err(|e| PipelineError::config_at(path, format!("line {}: {}", line_num + 2, e)))?;
        let block = row
            .into_block()
            .map_err(|e| PipelineError::config_at(path, format!("line {}: {}", line_num + 2, e)))?;
        blocks.push(block);
    }

    info!(path = %path.display(), blocks = blocks.len(), "loaded WAC table");
    Ok(blocks)
}

// ============================================================================
// CROSSWALK
// ============================================================================

const XWALK_BLOCK: &str = "tabblk2010";
const XWALK_TRACT: &str = "trct";
const XWALK_COUNTY: &str = "cty";

/// Read the LODES geography crosswalk
///
/// The published file is ISO-8859-1 (place names), so rows are read as raw
/// bytes and only the three ASCII id columns are decoded.
pub fn load_crosswalk(path: &Path) -> Result<Vec<CrosswalkEntry>> {
    let mut reader = csv_reader(path, "crosswalk")?;
    let headers = byte_headers(&mut reader, path)?;
    let block_col = column_index(&headers, XWALK_BLOCK, path)?;
    let tract_col = column_index(&headers, XWALK_TRACT, path)?;
    let county_col = column_index(&headers, XWALK_COUNTY, path)?;

    let mut entries = Vec::new();
    for (line_num, result) in reader.byte_records().enumerate() {
        let line = line_num + 2;
        let record = result.map_err(|e| PipelineError::config_at(path, format!("line {}: {}", line, e)))?;

        let block_id = GeoId::parse(ascii_field(&record, block_col, XWALK_BLOCK, line, path)?)
            .map_err(|e| PipelineError::config_at(path, format!("line {}: {}", line, e)))?;
        let tract_id = GeoId::parse(ascii_field(&record, tract_col, XWALK_TRACT, line, path)?)
            .map_err(|e| PipelineError::config_at(path, format!("line {}: {}", line, e)))?;
        let county_raw = ascii_field(&record, county_col, XWALK_COUNTY, line, path)?;
        let county_fips: u32 = county_raw.parse().map_err(|_| {
            PipelineError::config_at(path, format!("line {}: county '{}' is not a FIPS code", line, county_raw))
        })?;

        entries.push(CrosswalkEntry {
            block_id,
            tract_id,
            county_fips,
        });
    }

    info!(path = %path.display(), rows = entries.len(), "loaded crosswalk");
    Ok(entries)
}

fn ascii_field<'r>(record: &'r ByteRecord, index: usize, name: &str, line: usize, path: &Path) -> Result<&'r str> {
    let bytes = record
        .get(index)
        .ok_or_else(|| PipelineError::config_at(path, format!("line {}: missing '{}'", line, name)))?;
    std::str::from_utf8(bytes)
        .map(str::trim)
        .map_err(|_| PipelineError::config_at(path, format!("line {}: '{}' is not ASCII", line, name)))
}

// ============================================================================
// TRACT GEOMETRY
// ============================================================================

/// Read tract polygons from a GeoJSON FeatureCollection
pub fn load_tract_geometry(path: &Path, id_field: &str) -> Result<Vec<TractGeometry>> {
    let mut text = String::new();
    open_input(path, "geometry")?
        .read_to_string(&mut text)
        .map_err(|e| PipelineError::config_at(path, format!("cannot read geometry: {}", e)))?;

    let tracts = parse_feature_collection(&text, id_field).map_err(|e| match e {
        PipelineError::Configuration { message, .. } => PipelineError::config_at(path, message),
        other => other,
    })?;

    info!(path = %path.display(), tracts = tracts.len(), "loaded tract geometry");
    Ok(tracts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn wac_header() -> String {
        let cns: Vec<String> = (1..=20).map(|i| format!("CNS{:02}", i)).collect();
        format!("w_geocode,C000,CA01,{},createdate", cns.join(","))
    }

    fn wac_line(block: &str, c000: u64, cns: [u64; 20]) -> String {
        let values: Vec<String> = cns.iter().map(|v| v.to_string()).collect();
        format!("{},{},0,{},20160219", block, c000, values.join(","))
    }

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    fn write_temp_gz(content: &[u8]) -> NamedTempFile {
        let mut file = Builder::new().suffix(".csv.gz").tempfile().unwrap();
        file.write_all(&gzip(content)).unwrap();
        file.flush().unwrap();
        file
    }

    fn write_temp(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_wac() {
        let mut cns = [0u64; 20];
        cns[0] = 10;
        cns[6] = 5;
        let content = format!("{}\n{}\n", wac_header(), wac_line("060014001001000", 15, cns));
        let file = write_temp(content.as_bytes());

        let blocks = load_wac(file.path()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_id.as_str(), "60014001001000");
        assert_eq!(blocks[0].total_jobs, 15);
        assert_eq!(blocks[0].raw[0], 10);
        assert_eq!(blocks[0].raw[6], 5);
        assert_eq!(blocks[0].aggregate().unwrap().services, 5);
    }

    #[test]
    fn test_load_wac_bad_count_names_line() {
        let zeros = vec!["0"; 20].join(",");
        let content = format!("{}\n0600140010,abc,0,{},20160219\n", wac_header(), zeros);
        let file = write_temp(content.as_bytes());

        let err = load_wac(file.path()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_wac_wrong_header_without_rows() {
        let file = write_temp(b"geocode,jobs\n");

        let err = load_wac(file.path()).unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("missing column 'w_geocode'"));
    }

    #[test]
    fn test_load_wac_header_missing_one_sector() {
        let header = wac_header().replace(",CNS17", "");
        let file = write_temp(format!("{}\n", header).as_bytes());

        let err = load_wac(file.path()).unwrap_err();
        assert!(err.to_string().contains("CNS17"));
    }

    #[test]
    fn test_load_wac_empty_file() {
        let file = write_temp(b"");

        let err = load_wac(file.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_wac_header_only_is_empty_table() {
        let file = write_temp(format!("{}\n", wac_header()).as_bytes());

        assert!(load_wac(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_compressed_bytes_without_gz_name_rejected() {
        let content = format!("{}\n{}\n", wac_header(), wac_line("1", 0, [0; 20]));
        let file = write_temp(&gzip(content.as_bytes()));

        let err = load_wac(file.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_wac_gzip() {
        let mut cns = [0u64; 20];
        cns[11] = 4;
        let content = format!("{}\n{}\n", wac_header(), wac_line("060014001001000", 4, cns));
        let file = write_temp_gz(content.as_bytes());

        let blocks = load_wac(file.path()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].aggregate().unwrap().professions, 4);
    }

    #[test]
    fn test_load_crosswalk_gzip() {
        let file = write_temp_gz(b"tabblk2010,cty,trct\n060014001001000,06001,06001400100\n");

        let entries = load_crosswalk(file.path()).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tract_id.as_str(), "6001400100");
    }

    #[test]
    fn test_load_wac_missing_file() {
        let err = load_wac(Path::new("/nonexistent/ca_wac_S000_JT00_2015.csv")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("ca_wac_S000_JT00_2015.csv"));
    }

    #[test]
    fn test_load_crosswalk_latin1() {
        // 0xF1 is ñ in ISO-8859-1 and invalid UTF-8 on its own
        let mut content = b"tabblk2010,st,cty,ctyname,trct\n".to_vec();
        content.extend_from_slice(b"060014001001000,06,06001,Alameda County,06001400100\n");
        content.extend_from_slice(b"060855001001000,06,06085,Santa Clara County,06085500100\n");
        content.extend_from_slice(b"060370101001000,06,06037,Los \xC1ngeles Cou\xF1ty,06037010100\n");
        let file = write_temp(&content);

        let entries = load_crosswalk(file.path()).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].county_fips, 6001);
        assert_eq!(entries[0].tract_id.as_str(), "6001400100");
        assert_eq!(entries[2].county_fips, 6037);
    }

    #[test]
    fn test_load_crosswalk_missing_column() {
        let file = write_temp(b"tabblk2010,cty\n1,6001\n");

        let err = load_crosswalk(file.path()).unwrap_err();
        assert!(err.to_string().contains("trct"));
    }

    #[test]
    fn test_load_tract_geometry_names_path_on_error() {
        let file = write_temp(b"{ not json");

        let err = load_tract_geometry(file.path(), "GEOID10").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
