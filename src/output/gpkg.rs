// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/output/gpkg.rs - GeoPackage 矢量输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 ADAF Contributors

use std::path::{Path, PathBuf};

use geo::{BoundingRect, LineString, Polygon, Rect};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{VectorOutput, VectorWriter};
use crate::{raster::Crs, resolve::Feature};

/// "GPKG"
pub const APPLICATION_ID: i32 = 0x4750_4B47;
/// GeoPackage 1.3.0
pub const USER_VERSION: i32 = 10300;

const UNDEFINED_CARTESIAN_SRS: i32 = -1;

const WGS84_DEFINITION: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]]";

const SLOVENIA_1996_TM_DEFINITION: &str = "PROJCS[\"Slovenia 1996 / Slovene National Grid\",GEOGCS[\"Slovenia 1996\",DATUM[\"Slovenia_Geodetic_Datum_1996\",SPHEROID[\"GRS 1980\",6378137,298.257222101,AUTHORITY[\"EPSG\",\"7019\"]],TOWGS84[0,0,0,0,0,0,0],AUTHORITY[\"EPSG\",\"6765\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4765\"]],PROJECTION[\"Transverse_Mercator\"],PARAMETER[\"latitude_of_origin\",0],PARAMETER[\"central_meridian\",15],PARAMETER[\"scale_factor\",0.9999],PARAMETER[\"false_easting\",500000],PARAMETER[\"false_northing\",-5000000],UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]],AXIS[\"Easting\",EAST],AXIS[\"Northing\",NORTH],AUTHORITY[\"EPSG\",\"3794\"]]";

const IRISH_TM_DEFINITION: &str = "PROJCS[\"IRENET95 / Irish Transverse Mercator\",GEOGCS[\"IRENET95\",DATUM[\"IRENET95\",SPHEROID[\"GRS 1980\",6378137,298.257222101,AUTHORITY[\"EPSG\",\"7019\"]],TOWGS84[0,0,0,0,0,0,0],AUTHORITY[\"EPSG\",\"6173\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4173\"]],PROJECTION[\"Transverse_Mercator\"],PARAMETER[\"latitude_of_origin\",53.5],PARAMETER[\"central_meridian\",-8],PARAMETER[\"scale_factor\",0.99982],PARAMETER[\"false_easting\",600000],PARAMETER[\"false_northing\",750000],UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]],AXIS[\"Easting\",EAST],AXIS[\"Northing\",NORTH],AUTHORITY[\"EPSG\",\"2157\"]]";

/// 内置 WKT 的坐标系；其余编码写 "undefined"，读取端按 organization = EPSG 解析
pub fn srs_definition(crs: Crs) -> Option<&'static str> {
  match crs.epsg() {
    4326 => Some(WGS84_DEFINITION),
    3794 => Some(SLOVENIA_1996_TM_DEFINITION),
    2157 => Some(IRISH_TM_DEFINITION),
    _ => None,
  }
}

const SCHEMA: &str = r#"
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition TEXT NOT NULL,
  description TEXT
);
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL,
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
"#;

#[derive(Error, Debug)]
pub enum GpkgError {
  #[error("无法写入 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("SQLite 错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("输出文件名无效: {0}")]
  InvalidName(PathBuf),
}

/// 按 GeoPackage 二进制格式编码多边形：GP 头 + 小端 WKB
pub fn encode_geometry(polygon: &Polygon<f64>, srs_id: i32) -> Vec<u8> {
  let mut blob = Vec::with_capacity(64);
  blob.extend_from_slice(b"GP");
  blob.push(0);
  // 小端，envelope 类型 1（xy）
  blob.push(0b0000_0011);
  blob.extend_from_slice(&srs_id.to_le_bytes());

  let envelope = polygon
    .bounding_rect()
    .map(|r| [r.min().x, r.max().x, r.min().y, r.max().y])
    .unwrap_or([0.0; 4]);
  for value in envelope {
    blob.extend_from_slice(&value.to_le_bytes());
  }

  blob.push(1);
  blob.extend_from_slice(&3u32.to_le_bytes());
  let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
    .chain(polygon.interiors())
    .collect();
  blob.extend_from_slice(&(rings.len() as u32).to_le_bytes());
  for ring in rings {
    blob.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
    for coord in &ring.0 {
      blob.extend_from_slice(&coord.x.to_le_bytes());
      blob.extend_from_slice(&coord.y.to_le_bytes());
    }
  }
  blob
}

fn quote_identifier(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

fn extent(features: &[Feature]) -> Option<Rect<f64>> {
  features
    .iter()
    .filter_map(|f| f.polygon.bounding_rect())
    .reduce(|a, b| {
      Rect::new(
        (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
        (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
      )
    })
}

/// GeoPackage 写出器，图层名取自文件名
pub struct GpkgWriter {
  path: PathBuf,
}

impl GpkgWriter {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn layer_name(&self) -> Result<String, GpkgError> {
    self
      .path
      .file_stem()
      .and_then(|s| s.to_str())
      .filter(|s| !s.is_empty())
      .map(str::to_string)
      .ok_or_else(|| GpkgError::InvalidName(self.path.clone()))
  }

  fn write(&self, crs: Option<Crs>, features: &[Feature]) -> Result<(), GpkgError> {
    let layer = self.layer_name()?;
    if self.path.exists() {
      debug!("覆盖已有文件: {}", self.path.display());
      std::fs::remove_file(&self.path).map_err(|source| GpkgError::Io {
        path: self.path.clone(),
        source,
      })?;
    }

    let mut conn = Connection::open(&self.path)?;
    conn.execute_batch(&format!(
      "PRAGMA application_id = {};\nPRAGMA user_version = {};",
      APPLICATION_ID, USER_VERSION
    ))?;

    let srs_id = crs.map(|c| c.epsg() as i32).unwrap_or(UNDEFINED_CARTESIAN_SRS);
    let table = quote_identifier(&layer);
    let now = chrono::Utc::now()
      .format("%Y-%m-%dT%H:%M:%S%.3fZ")
      .to_string();
    let bounds = extent(features);

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.execute(
      "INSERT INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        "Undefined cartesian SRS",
        UNDEFINED_CARTESIAN_SRS,
        "NONE",
        UNDEFINED_CARTESIAN_SRS,
        "undefined",
        "undefined cartesian coordinate reference system"
      ],
    )?;
    tx.execute(
      "INSERT INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        "Undefined geographic SRS",
        0,
        "NONE",
        0,
        "undefined",
        "undefined geographic coordinate reference system"
      ],
    )?;
    tx.execute(
      "INSERT INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        "WGS 84 geodetic",
        4326,
        "EPSG",
        4326,
        WGS84_DEFINITION,
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
      ],
    )?;
    if let Some(crs) = crs.filter(|c| c.epsg() != 4326) {
      let definition = srs_definition(crs).unwrap_or_else(|| {
        warn!("{} 没有内置 WKT 定义，写入 undefined", crs);
        "undefined"
      });
      tx.execute(
        "INSERT INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![crs.to_string(), srs_id, "EPSG", srs_id, definition],
      )?;
    }

    tx.execute(
      "INSERT INTO gpkg_contents (table_name, data_type, identifier, last_change, min_x, min_y, max_x, max_y, srs_id) VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        layer,
        now,
        bounds.map(|r| r.min().x),
        bounds.map(|r| r.min().y),
        bounds.map(|r| r.max().x),
        bounds.map(|r| r.max().y),
        srs_id
      ],
    )?;
    tx.execute(
      "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', 'POLYGON', ?2, 0, 0)",
      params![layer, srs_id],
    )?;
    tx.execute_batch(&format!(
      "CREATE TABLE {} (fid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, geom POLYGON, label TEXT NOT NULL, prediction_path TEXT);",
      table
    ))?;

    {
      let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} (geom, label, prediction_path) VALUES (?1, ?2, ?3)",
        table
      ))?;
      for feature in features {
        stmt.execute(params![
          encode_geometry(&feature.polygon, srs_id),
          feature.label,
          feature.provenance
        ])?;
      }
    }
    tx.commit()?;
    Ok(())
  }
}

impl VectorWriter for GpkgWriter {
  type Error = GpkgError;

  fn write_features(
    &self,
    crs: Option<Crs>,
    features: &[Feature],
  ) -> Result<VectorOutput, Self::Error> {
    if features.is_empty() {
      info!("没有要素，不生成 {}", self.path.display());
      return Ok(VectorOutput::NoDetections);
    }
    self.write(crs, features)?;
    info!("写入 {} 个要素到 {}", features.len(), self.path.display());
    Ok(VectorOutput::Written(self.path.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use geo::Coord;

  fn feature(label: &str, x: f64) -> Feature {
    Feature {
      label: label.to_string(),
      polygon: Rect::new(Coord { x, y: 0.0 }, Coord { x: x + 2.0, y: 1.0 }).to_polygon(),
      provenance: None,
    }
  }

  #[test]
  fn geometry_blob_layout() {
    let blob = encode_geometry(&feature("barrow", 1.0).polygon, 3794);
    assert_eq!(&blob[0..2], b"GP");
    assert_eq!(blob[2], 0);
    assert_eq!(blob[3], 0x03);
    assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 3794);
    let envelope: Vec<f64> = blob[8..40]
      .chunks_exact(8)
      .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
      .collect();
    assert_eq!(envelope, [1.0, 3.0, 0.0, 1.0]);
    assert_eq!(blob[40], 1);
    assert_eq!(u32::from_le_bytes(blob[41..45].try_into().unwrap()), 3);
    assert_eq!(u32::from_le_bytes(blob[45..49].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(blob[49..53].try_into().unwrap()), 5);
    assert_eq!(blob.len(), 53 + 5 * 16);
  }

  #[test]
  fn writes_features_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("object_detection.gpkg");
    let writer = GpkgWriter::new(&path);
    let output = writer
      .write_features(
        Some(Crs::from_epsg(3794)),
        &[feature("barrow", 0.0), feature("AO", 5.0)],
      )
      .unwrap();
    assert_eq!(output, VectorOutput::Written(path.clone()));

    let conn = Connection::open(&path).unwrap();
    let app_id: i32 = conn
      .query_row("PRAGMA application_id", [], |row| row.get(0))
      .unwrap();
    assert_eq!(app_id, APPLICATION_ID);
    let labels: Vec<String> = conn
      .prepare("SELECT label FROM object_detection ORDER BY fid")
      .unwrap()
      .query_map([], |row| row.get(0))
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();
    assert_eq!(labels, ["barrow", "AO"]);
    let (srs, min_x, max_x): (i32, f64, f64) = conn
      .query_row(
        "SELECT srs_id, min_x, max_x FROM gpkg_contents WHERE table_name = 'object_detection'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .unwrap();
    assert_eq!((srs, min_x, max_x), (3794, 0.0, 7.0));
  }

  fn stored_definition(path: &Path, srs_id: i32) -> String {
    let conn = Connection::open(path).unwrap();
    conn
      .query_row(
        "SELECT definition FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
        [srs_id],
        |row| row.get(0),
      )
      .unwrap()
  }

  #[test]
  fn known_crs_is_stored_as_wkt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("object_detection.gpkg");
    for epsg in [3794, 2157] {
      GpkgWriter::new(&path)
        .write_features(Some(Crs::from_epsg(epsg)), &[feature("barrow", 0.0)])
        .unwrap();
      let definition = stored_definition(&path, epsg as i32);
      assert!(definition.starts_with("PROJCS["), "{}", definition);
      assert!(definition.ends_with(&format!("AUTHORITY[\"EPSG\",\"{}\"]]", epsg)));
    }
    assert!(stored_definition(&path, 4326).starts_with("GEOGCS["));
  }

  #[test]
  fn unknown_crs_keeps_the_epsg_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("object_detection.gpkg");
    GpkgWriter::new(&path)
      .write_features(Some(Crs::from_epsg(32633)), &[feature("barrow", 0.0)])
      .unwrap();
    assert_eq!(stored_definition(&path, 32633), "undefined");
    let conn = Connection::open(&path).unwrap();
    let (organization, code): (String, i32) = conn
      .query_row(
        "SELECT organization, organization_coordsys_id FROM gpkg_spatial_ref_sys WHERE srs_id = 32633",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .unwrap();
    assert_eq!((organization.as_str(), code), ("EPSG", 32633));
  }

  #[test]
  fn empty_feature_set_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("semantic_segmentation.gpkg");
    let output = GpkgWriter::new(&path)
      .write_features(Some(Crs::from_epsg(3794)), &[])
      .unwrap();
    assert_eq!(output, VectorOutput::NoDetections);
    assert!(!path.exists());
  }

  #[test]
  fn existing_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("object_detection.gpkg");
    let writer = GpkgWriter::new(&path);
    writer
      .write_features(None, &[feature("barrow", 0.0), feature("barrow", 5.0)])
      .unwrap();
    writer.write_features(None, &[feature("barrow", 0.0)]).unwrap();
    let conn = Connection::open(&path).unwrap();
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM object_detection", [], |row| row.get(0))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn unwritable_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("object_detection.gpkg");
    assert!(GpkgWriter::new(&path).write_features(None, &[feature("barrow", 0.0)]).is_err());
  }
}
