// 该文件是 ADAF （考古地物自动检测） 项目的一部分。
// src/extract/polygonize.rs - 二值栅格矢量化
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

//! 沿像素边界追踪 4 连通区域，输出带洞多边形。
//!
//! 顶点为像素角点（整数坐标，y 轴向下）。每个前景像素与非同区域像素相邻的边
//! 按“区域在右侧”的方向加入边集，外环在像素坐标下面积为正，洞为负。
//! 对角相接的两个像素在该顶点处右转分开，与 4 连通一致。

use std::collections::{BTreeMap, HashMap};

use geo::{Coord, LineString, Polygon};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::raster::GeoTransform;

type Vertex = (i64, i64);

const FOREGROUND: u8 = 255;

/// 按阈值二值化；NaN 视为背景
pub fn binarize(values: &[f32], width: u32, height: u32, threshold: f32) -> GrayImage {
  ImageBuffer::from_fn(width, height, |x, y| {
    let value = values[y as usize * width as usize + x as usize];
    if value >= threshold {
      Luma([FOREGROUND])
    } else {
      Luma([0])
    }
  })
}

/// 追踪掩膜中的全部前景区域并映射到世界坐标
pub fn polygonize(mask: &GrayImage, transform: &GeoTransform) -> Vec<Polygon<f64>> {
  let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));
  let (width, height) = labels.dimensions();

  let label_at = |x: i64, y: i64| -> u32 {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
      0
    } else {
      labels.get_pixel(x as u32, y as u32)[0]
    }
  };

  let mut edges: BTreeMap<u32, Vec<(Vertex, Vertex)>> = BTreeMap::new();
  for (x, y, pixel) in labels.enumerate_pixels() {
    let label = pixel[0];
    if label == 0 {
      continue;
    }
    let (x, y) = (x as i64, y as i64);
    let region = edges.entry(label).or_default();
    if label_at(x, y - 1) != label {
      region.push(((x, y), (x + 1, y)));
    }
    if label_at(x + 1, y) != label {
      region.push(((x + 1, y), (x + 1, y + 1)));
    }
    if label_at(x, y + 1) != label {
      region.push(((x + 1, y + 1), (x, y + 1)));
    }
    if label_at(x - 1, y) != label {
      region.push(((x, y + 1), (x, y)));
    }
  }

  edges
    .into_values()
    .flat_map(|region| assemble(trace_rings(region)))
    .map(|(exterior, holes)| {
      Polygon::new(
        to_world(&exterior, transform),
        holes.iter().map(|hole| to_world(hole, transform)).collect(),
      )
    })
    .collect()
}

fn cross(a: Vertex, b: Vertex) -> i64 {
  a.0 * b.1 - a.1 * b.0
}

fn direction(from: Vertex, to: Vertex) -> Vertex {
  (to.0 - from.0, to.1 - from.1)
}

fn trace_rings(edges: Vec<(Vertex, Vertex)>) -> Vec<Vec<Vertex>> {
  let mut outgoing: BTreeMap<Vertex, Vec<Vertex>> = BTreeMap::new();
  for (from, to) in edges {
    outgoing.entry(from).or_default().push(to);
  }

  let mut rings = Vec::new();
  while let Some((&start, targets)) = outgoing.iter_mut().next() {
    let first = targets.remove(0);
    if targets.is_empty() {
      outgoing.remove(&start);
    }

    let mut ring = vec![start];
    let (mut previous, mut current) = (start, first);
    loop {
      let incoming = direction(previous, current);
      let closing = (current == start).then_some(first);
      let candidates = outgoing.get(&current).map(Vec::as_slice).unwrap_or(&[]);
      let best = candidates
        .iter()
        .copied()
        .chain(closing)
        .max_by_key(|next| cross(incoming, direction(current, *next)));

      let Some(next) = best else {
        // 边集不闭合时丢弃该环
        ring.clear();
        break;
      };
      if closing == Some(next) {
        break;
      }

      ring.push(current);
      if let Some(targets) = outgoing.get_mut(&current) {
        targets.retain(|t| *t != next);
        if targets.is_empty() {
          outgoing.remove(&current);
        }
      }
      previous = current;
      current = next;
    }

    if ring.len() >= 3 {
      rings.push(simplify(ring));
    }
  }
  rings
}

/// 去掉共线的中间顶点
fn simplify(ring: Vec<Vertex>) -> Vec<Vertex> {
  let n = ring.len();
  (0..n)
    .filter(|&i| {
      let prev = ring[(i + n - 1) % n];
      let next = ring[(i + 1) % n];
      cross(direction(prev, ring[i]), direction(ring[i], next)) != 0
    })
    .map(|i| ring[i])
    .collect()
}

/// 鞋带公式的两倍面积，像素坐标下外环为正
fn doubled_area(ring: &[Vertex]) -> i64 {
  let n = ring.len();
  (0..n)
    .map(|i| {
      let (a, b) = (ring[i], ring[(i + 1) % n]);
      a.0 * b.1 - b.0 * a.1
    })
    .sum()
}

fn bounds(ring: &[Vertex]) -> (Vertex, Vertex) {
  ring.iter().fold(
    ((i64::MAX, i64::MAX), (i64::MIN, i64::MIN)),
    |(min, max), v| ((min.0.min(v.0), min.1.min(v.1)), (max.0.max(v.0), max.1.max(v.1))),
  )
}

fn assemble(rings: Vec<Vec<Vertex>>) -> Vec<(Vec<Vertex>, Vec<Vec<Vertex>>)> {
  let (exteriors, holes): (Vec<_>, Vec<_>) =
    rings.into_iter().partition(|ring| doubled_area(ring) > 0);

  let mut polygons: Vec<(Vec<Vertex>, Vec<Vec<Vertex>>)> =
    exteriors.into_iter().map(|ring| (ring, Vec::new())).collect();

  let mut by_area: HashMap<usize, i64> = HashMap::new();
  for (i, (exterior, _)) in polygons.iter().enumerate() {
    by_area.insert(i, doubled_area(exterior));
  }

  for hole in holes {
    let (hmin, hmax) = bounds(&hole);
    let owner = polygons
      .iter()
      .enumerate()
      .filter(|(_, (exterior, _))| {
        let (emin, emax) = bounds(exterior);
        emin.0 <= hmin.0 && emin.1 <= hmin.1 && emax.0 >= hmax.0 && emax.1 >= hmax.1
      })
      .min_by_key(|(i, _)| by_area[i])
      .map(|(i, _)| i);
    if let Some(i) = owner {
      polygons[i].1.push(hole);
    }
  }
  polygons
}

fn to_world(ring: &[Vertex], transform: &GeoTransform) -> LineString<f64> {
  let mut coords: Vec<Coord<f64>> = ring
    .iter()
    .map(|&(col, row)| {
      let (x, y) = transform.apply(col as f64, row as f64);
      Coord { x, y }
    })
    .collect();
  if let Some(first) = coords.first().copied() {
    coords.push(first);
  }
  LineString::new(coords)
}
