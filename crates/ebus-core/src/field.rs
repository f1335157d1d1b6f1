//! Gridded ensemble data model.
//!
//! A `Field` is one ensemble member of one variable on the POP/CAM grid,
//! stored row-major as `[time][level][nlat][nlon]` f32 with NaN marking land
//! or missing cells. Coordinates and cell metrics use f64.
use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::{TimeAxis, YearMonth};

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// JSON has no NaN: write missing values as `null`, read `null` back as NaN.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[f32], s: S) -> Result<S::Ok, S::Error> {
        let opt: Vec<Option<f32>> = v.iter().map(|x| x.is_finite().then_some(*x)).collect();
        opt.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f32>, D::Error> {
        let v: Vec<Option<f32>> = Vec::deserialize(d)?;
        Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
    }
}

/// f64 flavour of [`nan_as_null`], used for coordinates and cell metrics.
pub mod nan_as_null_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
        let opt: Vec<Option<f64>> = v.iter().map(|x| x.is_finite().then_some(*x)).collect();
        opt.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let v: Vec<Option<f64>> = Vec::deserialize(d)?;
        Ok(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
    }
}

/// Optional-vector variant of [`nan_as_null_f64`].
pub mod opt_nan_as_null_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<f64>>, s: S) -> Result<S::Ok, S::Error> {
        let opt: Option<Vec<Option<f64>>> = v
            .as_ref()
            .map(|v| v.iter().map(|x| x.is_finite().then_some(*x)).collect());
        opt.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<f64>>, D::Error> {
        let v: Option<Vec<Option<f64>>> = Option::deserialize(d)?;
        Ok(v.map(|v| v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()))
    }
}

// ── Grid ──────────────────────────────────────────────────────────────────────

/// Horizontal grid with curvilinear coordinates (POP `TLAT`/`TLONG`) or a
/// regular lat/lon grid expanded to 2-D.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub nlat: usize,
    pub nlon: usize,
    /// Latitude in degrees, row-major `nlat × nlon`.
    #[serde(with = "nan_as_null_f64")]
    pub lat: Vec<f64>,
    /// Longitude in degrees (0..360 unless wrapped), row-major.
    #[serde(with = "nan_as_null_f64")]
    pub lon: Vec<f64>,
    /// Cell area (TAREA).
    #[serde(with = "nan_as_null_f64")]
    pub area: Vec<f64>,
    /// Velocity-cell area (UAREA).
    #[serde(default, with = "opt_nan_as_null_f64", skip_serializing_if = "Option::is_none")]
    pub uarea: Option<Vec<f64>>,
    /// Zonal cell width (DXT) in cm.
    #[serde(default, with = "opt_nan_as_null_f64", skip_serializing_if = "Option::is_none")]
    pub dxt: Option<Vec<f64>>,
    /// POP region mask; 0 marks land.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_mask: Option<Vec<i32>>,
}

impl Grid {
    /// Regular lat/lon grid with unit areas.
    pub fn regular(lats: &[f64], lons: &[f64]) -> Self {
        let nlat = lats.len();
        let nlon = lons.len();
        let mut lat = Vec::with_capacity(nlat * nlon);
        let mut lon = Vec::with_capacity(nlat * nlon);
        for &la in lats {
            for &lo in lons {
                lat.push(la);
                lon.push(lo);
            }
        }
        Self {
            nlat,
            nlon,
            lat,
            lon,
            area: vec![1.0; nlat * nlon],
            uarea: None,
            dxt: None,
            region_mask: None,
        }
    }

    #[inline]
    pub fn cells(&self) -> usize {
        self.nlat * self.nlon
    }

    #[inline]
    pub fn idx(&self, j: usize, i: usize) -> usize {
        j * self.nlon + i
    }

    pub fn lat_at(&self, j: usize, i: usize) -> f64 {
        self.lat[self.idx(j, i)]
    }

    pub fn lon_at(&self, j: usize, i: usize) -> f64 {
        self.lon[self.idx(j, i)]
    }

    /// Area used for area weighting: UAREA when present, TAREA otherwise.
    pub fn weights(&self) -> &[f64] {
        self.uarea.as_deref().unwrap_or(&self.area)
    }

    /// Latitudes of the first column (regular grids).
    pub fn lat_1d(&self) -> Vec<f64> {
        (0..self.nlat).map(|j| self.lat_at(j, 0)).collect()
    }

    /// Longitudes of the first row (regular grids).
    pub fn lon_1d(&self) -> Vec<f64> {
        (0..self.nlon).map(|i| self.lon_at(0, i)).collect()
    }

    /// Map longitudes above 180 into -180..180 (needed for the Benguela,
    /// which straddles the prime meridian).
    pub fn wrap_longitudes(&mut self) {
        for lon in self.lon.iter_mut() {
            if *lon > 180.0 {
                *lon -= 360.0;
            }
        }
    }

    /// POP stores areas in cm²; convert both area arrays to m².
    pub fn convert_area_to_m2(&mut self) {
        for a in self.area.iter_mut() {
            *a /= 100.0 * 100.0;
        }
        if let Some(u) = self.uarea.as_mut() {
            for a in u.iter_mut() {
                *a /= 100.0 * 100.0;
            }
        }
    }

    /// Sub-grid covering `rows × cols`.
    pub fn subset(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        if rows.end > self.nlat || cols.end > self.nlon || rows.is_empty() || cols.is_empty() {
            return Err(Error::Shape(format!(
                "subset rows {rows:?} cols {cols:?} outside {}×{} grid",
                self.nlat, self.nlon
            )));
        }
        let pick_f64 = |v: &[f64]| -> Vec<f64> {
            rows.clone()
                .flat_map(|j| cols.clone().map(move |i| (j, i)))
                .map(|(j, i)| v[j * self.nlon + i])
                .collect()
        };
        Ok(Self {
            nlat: rows.len(),
            nlon: cols.len(),
            lat: pick_f64(&self.lat),
            lon: pick_f64(&self.lon),
            area: pick_f64(&self.area),
            uarea: self.uarea.as_deref().map(pick_f64),
            dxt: self.dxt.as_deref().map(pick_f64),
            region_mask: self.region_mask.as_ref().map(|m| {
                rows.clone()
                    .flat_map(|j| cols.clone().map(move |i| (j, i)))
                    .map(|(j, i)| m[j * self.nlon + i])
                    .collect()
            }),
        })
    }

    fn validate(&self) -> Result<()> {
        let n = self.cells();
        let bad = self.lat.len() != n
            || self.lon.len() != n
            || self.area.len() != n
            || self.uarea.as_ref().is_some_and(|v| v.len() != n)
            || self.dxt.as_ref().is_some_and(|v| v.len() != n)
            || self.region_mask.as_ref().is_some_and(|v| v.len() != n);
        if bad {
            return Err(Error::Shape(format!(
                "grid arrays do not match {}×{}",
                self.nlat, self.nlon
            )));
        }
        Ok(())
    }
}

// ── Field ─────────────────────────────────────────────────────────────────────

/// One ensemble member of one gridded variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    pub time: TimeAxis,
    pub grid: Grid,
    /// Vertical levels (1 for surface fields).
    pub levels: usize,
    /// Row-major `[time][level][nlat][nlon]`; NaN = missing.
    #[serde(with = "nan_as_null")]
    pub data: Vec<f32>,
}

impl Field {
    /// Build a field, checking that `data` matches the declared shape.
    pub fn new(name: impl Into<String>, time: TimeAxis, grid: Grid, levels: usize, data: Vec<f32>) -> Result<Self> {
        let f = Self {
            name: name.into(),
            units: None,
            attrs: BTreeMap::new(),
            time,
            grid,
            levels,
            data,
        };
        f.validate()?;
        Ok(f)
    }

    /// A surface field filled with `fill`.
    pub fn filled(name: impl Into<String>, time: TimeAxis, grid: Grid, fill: f32) -> Self {
        let n = time.len * grid.cells();
        Self {
            name: name.into(),
            units: None,
            attrs: BTreeMap::new(),
            time,
            grid,
            levels: 1,
            data: vec![fill; n],
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        if self.levels == 0 {
            return Err(Error::Shape(format!("{}: zero vertical levels", self.name)));
        }
        let expected = self.time.len * self.levels * self.grid.cells();
        if self.data.len() != expected {
            return Err(Error::Shape(format!(
                "{}: {} values for {} steps × {} levels × {}×{} grid",
                self.name,
                self.data.len(),
                self.time.len,
                self.levels,
                self.grid.nlat,
                self.grid.nlon
            )));
        }
        Ok(())
    }

    #[inline]
    fn offset(&self, t: usize, k: usize, j: usize, i: usize) -> usize {
        ((t * self.levels + k) * self.grid.nlat + j) * self.grid.nlon + i
    }

    /// Value at surface level.
    #[inline]
    pub fn get(&self, t: usize, j: usize, i: usize) -> f32 {
        self.data[self.offset(t, 0, j, i)]
    }

    #[inline]
    pub fn set(&mut self, t: usize, j: usize, i: usize, val: f32) {
        let o = self.offset(t, 0, j, i);
        self.data[o] = val;
    }

    #[inline]
    pub fn get_level(&self, t: usize, k: usize, j: usize, i: usize) -> f32 {
        self.data[self.offset(t, k, j, i)]
    }

    /// Surface time series at grid cell `(j, i)`.
    pub fn series_at(&self, j: usize, i: usize) -> Vec<f32> {
        (0..self.time.len).map(|t| self.get(t, j, i)).collect()
    }

    /// Surface time series at flat cell index `c`.
    pub fn series_at_cell(&self, c: usize) -> Vec<f32> {
        let cells = self.grid.cells();
        (0..self.time.len)
            .map(|t| self.data[t * self.levels * cells + c])
            .collect()
    }

    /// Build a surface field from one series per cell (`per_cell[c][t]`).
    pub fn from_cell_series(
        name: impl Into<String>,
        time: TimeAxis,
        grid: Grid,
        per_cell: &[Vec<f32>],
    ) -> Result<Self> {
        let cells = grid.cells();
        if per_cell.len() != cells || per_cell.iter().any(|s| s.len() != time.len) {
            return Err(Error::Shape("per-cell series do not match grid/time".into()));
        }
        let mut data = vec![f32::NAN; time.len * cells];
        for (c, s) in per_cell.iter().enumerate() {
            for (t, &v) in s.iter().enumerate() {
                data[t * cells + c] = v;
            }
        }
        Field::new(name, time, grid, 1, data)
    }

    /// True if the cell has no finite value at any time (land).
    pub fn is_land(&self, c: usize) -> bool {
        let cells = self.grid.cells();
        (0..self.time.len).all(|t| !self.data[t * self.levels * cells + c].is_finite())
    }

    /// Restrict to `from..=to`.
    pub fn slice_time(&self, from: YearMonth, to: YearMonth) -> Result<Self> {
        let (range, axis) = self.time.slice(from, to)?;
        let step = self.levels * self.grid.cells();
        let data = self.data[range.start * step..range.end * step].to_vec();
        Ok(Self { time: axis, data, ..self.clone_meta() })
    }

    /// Replace the time labels, keeping values. Lengths must agree.
    pub fn relabel_time(&mut self, axis: TimeAxis) -> Result<()> {
        if axis.len != self.time.len {
            return Err(Error::Shape(format!(
                "{}: cannot relabel {} steps with a {}-step axis",
                self.name, self.time.len, axis.len
            )));
        }
        self.time = axis;
        Ok(())
    }

    /// Spatial subset `rows × cols` across all steps and levels.
    pub fn subset(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        let grid = self.grid.subset(rows.clone(), cols.clone())?;
        let mut data = Vec::with_capacity(self.time.len * self.levels * grid.cells());
        for t in 0..self.time.len {
            for k in 0..self.levels {
                for j in rows.clone() {
                    for i in cols.clone() {
                        data.push(self.get_level(t, k, j, i));
                    }
                }
            }
        }
        Ok(Self { grid, data, ..self.clone_meta() })
    }

    pub fn scale(&mut self, k: f32) {
        for v in self.data.iter_mut() {
            *v *= k;
        }
    }

    /// Elementwise combination with a field of identical shape.
    pub fn zip_with(&self, other: &Field, name: impl Into<String>, f: impl Fn(f32, f32) -> f32) -> Result<Self> {
        if self.data.len() != other.data.len()
            || self.time.len != other.time.len
            || self.grid.nlat != other.grid.nlat
            || self.grid.nlon != other.grid.nlon
            || self.levels != other.levels
        {
            return Err(Error::Shape(format!(
                "{} and {} differ in shape",
                self.name, other.name
            )));
        }
        let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
        Ok(Self { name: name.into(), data, ..self.clone_meta() })
    }

    /// Set every value to NaN at cells where `keep[c]` is false.
    pub fn mask_cells(&mut self, keep: &[bool]) -> Result<()> {
        let cells = self.grid.cells();
        if keep.len() != cells {
            return Err(Error::Shape(format!(
                "mask has {} cells, grid has {cells}",
                keep.len()
            )));
        }
        for (n, v) in self.data.iter_mut().enumerate() {
            if !keep[n % cells] {
                *v = f32::NAN;
            }
        }
        Ok(())
    }

    /// Sum over vertical levels, skipping NaN (cells NaN at every level stay NaN).
    pub fn sum_levels(&self, name: impl Into<String>) -> Self {
        let cells = self.grid.cells();
        let mut data = vec![f32::NAN; self.time.len * cells];
        for t in 0..self.time.len {
            for c in 0..cells {
                let mut acc = 0.0f64;
                let mut any = false;
                for k in 0..self.levels {
                    let v = self.data[(t * self.levels + k) * cells + c];
                    if v.is_finite() {
                        acc += v as f64;
                        any = true;
                    }
                }
                if any {
                    data[t * cells + c] = acc as f32;
                }
            }
        }
        Self { name: name.into(), levels: 1, data, ..self.clone_meta() }
    }

    /// Area-weighted mean over the surface level at each step.
    ///
    /// Σ(v·w) / Σw over cells with a finite value and finite weight, so land
    /// and masked cells drop out of both sums.
    pub fn area_weighted_series(&self, weights: &[f64]) -> Result<Series> {
        let cells = self.grid.cells();
        if weights.len() != cells {
            return Err(Error::Shape(format!(
                "{} weights for {cells} cells",
                weights.len()
            )));
        }
        let values = (0..self.time.len)
            .map(|t| {
                let base = t * self.levels * cells;
                let (mut num, mut den) = (0.0f64, 0.0f64);
                for (c, &w) in weights.iter().enumerate() {
                    let v = self.data[base + c];
                    if v.is_finite() && w.is_finite() {
                        num += v as f64 * w;
                        den += w;
                    }
                }
                if den > 0.0 { (num / den) as f32 } else { f32::NAN }
            })
            .collect();
        Ok(Series { name: self.name.clone(), time: self.time, values })
    }

    /// Copy of metadata with empty data, for struct-update construction.
    fn clone_meta(&self) -> Self {
        Self {
            name: self.name.clone(),
            units: self.units.clone(),
            attrs: self.attrs.clone(),
            time: self.time,
            grid: self.grid.clone(),
            levels: self.levels,
            data: Vec::new(),
        }
    }
}

// ── Series ────────────────────────────────────────────────────────────────────

/// A single monthly time series (one member, or the forced signal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub time: TimeAxis,
    #[serde(with = "nan_as_null")]
    pub values: Vec<f32>,
}

impl Series {
    pub fn new(name: impl Into<String>, time: TimeAxis, values: Vec<f32>) -> Result<Self> {
        if values.len() != time.len {
            return Err(Error::Shape(format!(
                "{} values for a {}-step axis",
                values.len(),
                time.len
            )));
        }
        Ok(Self { name: name.into(), time, values })
    }

    pub fn slice_time(&self, from: YearMonth, to: YearMonth) -> Result<Self> {
        let (range, time) = self.time.slice(from, to)?;
        Ok(Self { name: self.name.clone(), time, values: self.values[range].to_vec() })
    }
}

/// Member × time table of series sharing one axis (climate indices,
/// area-weighted residuals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSeries {
    pub name: String,
    pub members: Vec<String>,
    pub time: TimeAxis,
    /// One row per member.
    pub data: Vec<Series>,
}

impl EnsembleSeries {
    pub fn new(name: impl Into<String>, members: Vec<String>, time: TimeAxis, rows: Vec<Vec<f32>>) -> Result<Self> {
        let name = name.into();
        if members.len() != rows.len() {
            return Err(Error::Shape(format!(
                "{name}: {} members but {} rows",
                members.len(),
                rows.len()
            )));
        }
        let data = rows
            .into_iter()
            .map(|r| Series::new(name.clone(), time, r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name, members, time, data })
    }

    pub fn member(&self, id: &str) -> Result<&Series> {
        self.members
            .iter()
            .position(|m| m == id)
            .map(|i| &self.data[i])
            .ok_or_else(|| Error::UnknownMember(id.to_string()))
    }

    /// NaN-skipping mean across members.
    pub fn mean(&self) -> Series {
        let values = (0..self.time.len)
            .map(|t| nan_mean(self.data.iter().map(|s| s.values[t])))
            .collect();
        Series { name: self.name.clone(), time: self.time, values }
    }

    /// Each member minus the ensemble mean.
    pub fn residuals(&self) -> Self {
        let mean = self.mean();
        let data = self
            .data
            .iter()
            .map(|s| Series {
                name: s.name.clone(),
                time: s.time,
                values: s.values.iter().zip(&mean.values).map(|(a, b)| a - b).collect(),
            })
            .collect();
        Self { name: self.name.clone(), members: self.members.clone(), time: self.time, data }
    }

    /// Put every row on `axis`, which must have the same number of steps.
    pub fn relabel_time(&mut self, axis: TimeAxis) -> Result<()> {
        if axis.len != self.time.len {
            return Err(Error::Shape(format!(
                "{}: cannot relabel {} steps with a {}-step axis",
                self.name, self.time.len, axis.len
            )));
        }
        self.time = axis;
        self.data.iter_mut().for_each(|s| s.time = axis);
        Ok(())
    }

    /// Annual means, one step per calendar year. Used when the predictor is
    /// only annual.
    pub fn resample_annual(&self) -> Self {
        let years = self.time.years();
        let time = TimeAxis::annual(years.first().map_or(0, |y| y.0), years.len());
        let data = self
            .data
            .iter()
            .map(|s| Series {
                name: s.name.clone(),
                time,
                values: years
                    .iter()
                    .map(|(_, idx)| nan_mean(idx.iter().map(|&i| s.values[i])))
                    .collect(),
            })
            .collect();
        Self { name: self.name.clone(), members: self.members.clone(), time, data }
    }
}

// ── EnsembleField ─────────────────────────────────────────────────────────────

/// All members of one variable on a common grid and axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleField {
    pub members: Vec<String>,
    pub fields: Vec<Field>,
}

impl EnsembleField {
    /// Stack member fields; all must share shape.
    pub fn new(members: Vec<String>, fields: Vec<Field>) -> Result<Self> {
        if members.len() != fields.len() || fields.is_empty() {
            return Err(Error::Shape(format!(
                "{} members for {} fields",
                members.len(),
                fields.len()
            )));
        }
        let first = &fields[0];
        for f in &fields[1..] {
            if f.data.len() != first.data.len()
                || f.grid.nlat != first.grid.nlat
                || f.grid.nlon != first.grid.nlon
                || f.time.len != first.time.len
            {
                return Err(Error::Shape(format!(
                    "member fields of {} differ in shape",
                    first.name
                )));
            }
        }
        Ok(Self { members, fields })
    }

    pub fn template(&self) -> &Field {
        &self.fields[0]
    }

    /// NaN-skipping mean over members (the forced signal).
    pub fn mean(&self) -> Field {
        let n = self.template().data.len();
        let data = (0..n)
            .map(|x| nan_mean(self.fields.iter().map(|f| f.data[x])))
            .collect();
        Field { data, ..self.template().clone_meta() }
    }

    /// Member minus forced signal, for every member.
    pub fn residuals(&self) -> Self {
        let mean = self.mean();
        let fields = self
            .fields
            .iter()
            .map(|f| Field {
                data: f.data.iter().zip(&mean.data).map(|(a, b)| a - b).collect(),
                ..f.clone_meta()
            })
            .collect();
        Self { members: self.members.clone(), fields }
    }

    pub fn area_weighted(&self, weights: &[f64]) -> Result<EnsembleSeries> {
        let data = self
            .fields
            .iter()
            .map(|f| f.area_weighted_series(weights))
            .collect::<Result<Vec<_>>>()?;
        let t = self.template();
        Ok(EnsembleSeries {
            name: t.name.clone(),
            members: self.members.clone(),
            time: t.time,
            data,
        })
    }

    pub fn mask_cells(&mut self, keep: &[bool]) -> Result<()> {
        for f in self.fields.iter_mut() {
            f.mask_cells(keep)?;
        }
        Ok(())
    }

    pub fn subset(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.subset(rows.clone(), cols.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { members: self.members.clone(), fields })
    }

    /// Per surface cell: time standard deviation of each member, averaged
    /// over members. Members with no finite value at a cell are skipped.
    pub fn std_over_time_mean_members(&self) -> Vec<f64> {
        let cells = self.template().grid.cells();
        (0..cells)
            .map(|c| {
                let (mut sum, mut n) = (0.0f64, 0usize);
                for f in &self.fields {
                    let s = crate::stats::nan_std(&f.series_at_cell(c));
                    if s.is_finite() {
                        sum += s;
                        n += 1;
                    }
                }
                if n == 0 { f64::NAN } else { sum / n as f64 }
            })
            .collect()
    }
}

/// Mean of the finite values; NaN if none.
pub fn nan_mean(vals: impl Iterator<Item = f32>) -> f32 {
    let (mut sum, mut n) = (0.0f64, 0usize);
    for v in vals {
        if v.is_finite() {
            sum += v as f64;
            n += 1;
        }
    }
    if n == 0 { f32::NAN } else { (sum / n as f64) as f32 }
}
