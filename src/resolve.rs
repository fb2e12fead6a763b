// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/resolve.rs - 同标签重叠几何合并
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

//! 按标签分组，外包矩形相交（含相接）的记录归为一簇，簇内求并后拆分为单多边形。
//! 不同标签之间从不合并。

use std::collections::BTreeMap;

use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon, Rect};
use tracing::{debug, info};

use crate::extract::GeometryRecord;

/// 输出要素：单个简单多边形
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
  pub label: String,
  pub polygon: Polygon<f64>,
  pub provenance: Option<String>,
}

struct DisjointSet {
  parent: Vec<usize>,
}

impl DisjointSet {
  fn new(size: usize) -> Self {
    Self {
      parent: (0..size).collect(),
    }
  }

  fn find(&mut self, mut i: usize) -> usize {
    while self.parent[i] != i {
      self.parent[i] = self.parent[self.parent[i]];
      i = self.parent[i];
    }
    i
  }

  fn union(&mut self, a: usize, b: usize) {
    let (ra, rb) = (self.find(a), self.find(b));
    if ra != rb {
      // 以较小下标为根，簇的顺序与输入顺序一致
      let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
      self.parent[child] = root;
    }
  }
}

fn rects_touch(a: &Rect<f64>, b: &Rect<f64>) -> bool {
  a.min().x <= b.max().x
    && b.min().x <= a.max().x
    && a.min().y <= b.max().y
    && b.min().y <= a.max().y
}

/// 按外包矩形相交关系聚簇，返回每簇成员下标（按输入顺序）
fn clusters(polygons: &[&Polygon<f64>]) -> Vec<Vec<usize>> {
  let rects: Vec<Option<Rect<f64>>> = polygons.iter().map(|p| p.bounding_rect()).collect();
  let mut order: Vec<usize> = (0..polygons.len()).filter(|&i| rects[i].is_some()).collect();
  order.sort_by(|&a, &b| {
    let (ra, rb) = (rects[a].map(|r| r.min().x), rects[b].map(|r| r.min().x));
    ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut set = DisjointSet::new(polygons.len());
  let mut active: Vec<usize> = Vec::new();
  for &i in &order {
    let Some(current) = rects[i] else { continue };
    active.retain(|&j| rects[j].is_some_and(|r| r.max().x >= current.min().x));
    for &j in &active {
      if rects[j].is_some_and(|other| rects_touch(&current, &other)) {
        set.union(i, j);
      }
    }
    active.push(i);
  }

  let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
  for i in 0..polygons.len() {
    let root = set.find(i);
    groups.entry(root).or_default().push(i);
  }
  groups.into_values().collect()
}

/// 两两归并求并集
fn union_all(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
  let mut parts: Vec<MultiPolygon<f64>> = polygons
    .into_iter()
    .map(|p| MultiPolygon::new(vec![p]))
    .collect();
  while parts.len() > 1 {
    let mut next = Vec::with_capacity(parts.len().div_ceil(2));
    let mut iter = parts.into_iter();
    while let Some(a) = iter.next() {
      match iter.next() {
        Some(b) => next.push(a.union(&b)),
        None => next.push(a),
      }
    }
    parts = next;
  }
  parts.pop().unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

/// 合并同标签的重叠或相接几何，并拆分为单多边形
pub fn resolve_overlaps(records: Vec<GeometryRecord>) -> Vec<Feature> {
  let input = records.len();
  let mut by_label: BTreeMap<String, Vec<GeometryRecord>> = BTreeMap::new();
  for record in records {
    by_label.entry(record.label.clone()).or_default().push(record);
  }

  let mut features = Vec::new();
  for (label, group) in by_label {
    let polygons: Vec<&Polygon<f64>> = group.iter().map(|r| &r.polygon).collect();
    let groups = clusters(&polygons);
    debug!("标签 {}: {} 条记录，{} 个簇", label, group.len(), groups.len());

    for members in groups {
      if let [single] = members.as_slice() {
        let record = &group[*single];
        features.push(Feature {
          label: label.clone(),
          polygon: record.polygon.clone(),
          provenance: record.provenance.clone(),
        });
        continue;
      }

      let merged = union_all(members.iter().map(|&i| group[i].polygon.clone()).collect());
      for part in merged {
        let provenance = members
          .iter()
          .map(|&i| &group[i])
          .find(|record| record.polygon.intersects(&part))
          .or_else(|| members.first().map(|&i| &group[i]))
          .and_then(|record| record.provenance.clone());
        features.push(Feature {
          label: label.clone(),
          polygon: part,
          provenance,
        });
      }
    }
  }

  info!("重叠合并: {} 条记录 -> {} 个要素", input, features.len());
  features
}

#[cfg(test)]
mod tests {
  use super::*;
  use geo::{Area, Coord};

  fn square(x: f64, y: f64, size: f64, label: &str, source: &str) -> GeometryRecord {
    GeometryRecord {
      polygon: Rect::new(Coord { x, y }, Coord { x: x + size, y: y + size }).to_polygon(),
      label: label.to_string(),
      score: Some(0.9),
      provenance: Some(source.to_string()),
    }
  }

  #[test]
  fn overlapping_boxes_merge_into_their_union() {
    let features = resolve_overlaps(vec![
      square(0.0, 0.0, 10.0, "barrow", "a"),
      square(5.0, 0.0, 10.0, "barrow", "b"),
    ]);
    assert_eq!(features.len(), 1);
    assert!((features[0].polygon.unsigned_area() - 150.0).abs() < 1e-9);
    assert_eq!(features[0].provenance.as_deref(), Some("a"));
  }

  #[test]
  fn touching_boxes_merge() {
    let features = resolve_overlaps(vec![
      square(0.0, 0.0, 1.0, "barrow", "a"),
      square(1.0, 0.0, 1.0, "barrow", "b"),
    ]);
    assert_eq!(features.len(), 1);
    assert!((features[0].polygon.unsigned_area() - 2.0).abs() < 1e-9);
  }

  #[test]
  fn labels_are_never_merged() {
    let features = resolve_overlaps(vec![
      square(0.0, 0.0, 10.0, "barrow", "a"),
      square(5.0, 0.0, 10.0, "enclosure", "b"),
    ]);
    assert_eq!(features.len(), 2);
    let labels: Vec<_> = features.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, ["barrow", "enclosure"]);
  }

  #[test]
  fn disjoint_input_is_unchanged_and_idempotent() {
    let records = vec![
      square(0.0, 0.0, 1.0, "barrow", "a"),
      square(5.0, 5.0, 1.0, "barrow", "b"),
      square(10.0, 0.0, 1.0, "barrow", "c"),
    ];
    let once = resolve_overlaps(records.clone());
    assert_eq!(once.len(), 3);
    for (feature, record) in once.iter().zip(&records) {
      assert_eq!(feature.polygon, record.polygon);
    }

    let again = resolve_overlaps(
      once
        .iter()
        .map(|f| GeometryRecord {
          polygon: f.polygon.clone(),
          label: f.label.clone(),
          score: None,
          provenance: f.provenance.clone(),
        })
        .collect(),
    );
    assert_eq!(again, once);
  }

  #[test]
  fn chain_of_overlaps_forms_one_cluster() {
    let features = resolve_overlaps(vec![
      square(0.0, 0.0, 2.0, "AO", "a"),
      square(10.0, 0.0, 2.0, "AO", "c"),
      square(1.0, 0.0, 2.0, "AO", "b"),
      square(2.5, 0.0, 8.0, "AO", "d"),
    ]);
    assert_eq!(features.len(), 1);
    assert!((features[0].polygon.unsigned_area() - 24.0).abs() < 1e-9);
  }

  #[test]
  fn bounding_overlap_without_geometry_overlap_stays_apart() {
    let l_shape = GeometryRecord {
      polygon: Polygon::new(
        vec![(0.0, 0.0), (10.0, 0.0), (10.0, 1.0), (1.0, 1.0), (1.0, 10.0), (0.0, 10.0)].into(),
        vec![],
      ),
      label: "barrow".to_string(),
      score: None,
      provenance: Some("l".to_string()),
    };
    let features = resolve_overlaps(vec![l_shape, square(5.0, 5.0, 2.0, "barrow", "s")]);
    assert_eq!(features.len(), 2);
    let provenances: Vec<_> = features.iter().map(|f| f.provenance.clone().unwrap()).collect();
    assert!(provenances.contains(&"l".to_string()));
    assert!(provenances.contains(&"s".to_string()));
  }
}
