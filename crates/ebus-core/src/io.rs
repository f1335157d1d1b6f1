//! Reading and writing data products.
//!
//! JSON is the canonical encoding. Gridded fields may also be stored as
//! NetCDF (`.nc`) when the crate is built with the `netcdf` feature.
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::{EnsembleField, Field};

fn is_netcdf(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("nc")
}

/// Deserialize a JSON product.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Serialize a product as JSON, creating parent directories.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string(value)?;
    fs::write(path, json)?;
    debug!(path = %path.display(), "wrote");
    Ok(())
}

/// Load variable `var` of one member. JSON files hold a single field, whose
/// name must match.
pub fn load_field(path: &Path, var: &str) -> Result<Field> {
    let field: Field = if is_netcdf(path) {
        nc::read(path, var)?
    } else {
        load(path)?
    };
    if field.name != var {
        return Err(Error::MissingVariable(format!(
            "{var} (file {} holds {})",
            path.display(),
            field.name
        )));
    }
    field.validate()?;
    Ok(field)
}

pub fn save_field(path: &Path, field: &Field) -> Result<()> {
    if is_netcdf(path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        nc::write(path, field)
    } else {
        save(path, field)
    }
}

/// Load one field per member and stack them.
pub fn load_members<F>(members: &[String], var: &str, path_of: F) -> Result<EnsembleField>
where
    F: Fn(&str) -> PathBuf,
{
    let fields = members
        .iter()
        .map(|m| load_field(&path_of(m), var))
        .collect::<Result<Vec<_>>>()?;
    info!(var, members = members.len(), "loaded ensemble");
    EnsembleField::new(members.to_vec(), fields)
}

#[cfg(feature = "netcdf")]
mod nc {
    //! POP-style NetCDF: data dims `(time, [z_t,] nlat, nlon)`, curvilinear
    //! `TLAT`/`TLONG`, cell metrics `TAREA`, `UAREA`, `DXT`, `REGION_MASK`.
    use std::collections::BTreeMap;
    use std::path::Path;

    use netcdf::AttributeValue;

    use crate::error::{Error, Result};
    use crate::field::{Field, Grid};
    use crate::time::{TimeAxis, YearMonth};

    /// Values at or above this magnitude are POP fill values.
    const FILL_THRESHOLD: f32 = 1.0e30;
    const FILL_VALUE_F32: f32 = 9.969_21e36;

    fn values_f64(file: &netcdf::File, name: &str) -> Result<Option<Vec<f64>>> {
        match file.variable(name) {
            Some(v) => Ok(Some(v.get_values::<f64, _>(..)?)),
            None => Ok(None),
        }
    }

    fn string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
        match var.attribute_value(name) {
            Some(Ok(AttributeValue::Str(s))) => Some(s),
            _ => None,
        }
    }

    /// `months since YYYY-MM-01`; any other encoding starts at 1920-01 and
    /// is expected to be relabelled by the caller.
    fn axis_start(file: &netcdf::File) -> YearMonth {
        file.variable("time")
            .and_then(|t| string_attr(&t, "units"))
            .and_then(|u| {
                let rest = u.strip_prefix("months since ")?;
                rest.get(..7)?.parse().ok()
            })
            .unwrap_or(YearMonth::new(1920, 1))
    }

    pub(super) fn read(path: &Path, var: &str) -> Result<Field> {
        let file = netcdf::open(path)?;
        let v = file
            .variable(var)
            .ok_or_else(|| Error::MissingVariable(format!("{var} in {}", path.display())))?;
        let shape: Vec<usize> = v.dimensions().iter().map(|d| d.len()).collect();
        let (nt, levels, nlat, nlon) = match shape.as_slice() {
            [t, y, x] => (*t, 1, *y, *x),
            [t, z, y, x] => (*t, *z, *y, *x),
            _ => return Err(Error::Shape(format!("{var} has dims {shape:?}"))),
        };
        let data: Vec<f32> = v
            .get_values::<f32, _>(..)?
            .into_iter()
            .map(|x| if x.abs() >= FILL_THRESHOLD { f32::NAN } else { x })
            .collect();

        let cells = nlat * nlon;
        let (lat, lon) = match (values_f64(&file, "TLAT")?, values_f64(&file, "TLONG")?) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                let lat1 = values_f64(&file, "lat")?.ok_or_else(|| Error::MissingVariable("TLAT or lat".into()))?;
                let lon1 = values_f64(&file, "lon")?.ok_or_else(|| Error::MissingVariable("TLONG or lon".into()))?;
                let g = Grid::regular(&lat1, &lon1);
                (g.lat, g.lon)
            }
        };
        let mask_fill = |x: Vec<f64>| -> Vec<f64> {
            x.into_iter().map(|v| if v.abs() >= FILL_THRESHOLD as f64 { f64::NAN } else { v }).collect()
        };
        let area = values_f64(&file, "TAREA")?.map(mask_fill).unwrap_or_else(|| vec![1.0; cells]);
        let uarea = values_f64(&file, "UAREA")?.map(mask_fill);
        let dxt = values_f64(&file, "DXT")?.map(mask_fill);
        let region_mask = match file.variable("REGION_MASK") {
            Some(m) => Some(m.get_values::<i32, _>(..)?),
            None => None,
        };
        let grid = Grid { nlat, nlon, lat: mask_fill(lat), lon: mask_fill(lon), area, uarea, dxt, region_mask };

        let mut field = Field::new(var, TimeAxis::new(axis_start(&file), nt), grid, levels, data)?;
        field.units = string_attr(&v, "units");
        let mut attrs = BTreeMap::new();
        for key in ["long_name", "carbon flux units", "area units", "description"] {
            if let Some(s) = string_attr(&v, key) {
                attrs.insert(key.to_string(), s);
            }
        }
        field.attrs = attrs;
        Ok(field)
    }

    pub(super) fn write(path: &Path, field: &Field) -> Result<()> {
        let g = &field.grid;
        let mut file = netcdf::create(path)?;
        file.add_dimension("time", field.time.len)?;
        file.add_dimension("nlat", g.nlat)?;
        file.add_dimension("nlon", g.nlon)?;
        let dims: Vec<&str> = if field.levels > 1 {
            file.add_dimension("z_t", field.levels)?;
            vec!["time", "z_t", "nlat", "nlon"]
        } else {
            vec!["time", "nlat", "nlon"]
        };

        {
            let mut t = file.add_variable::<f64>("time", &["time"])?;
            let units = format!("months since {}-01", field.time.start);
            t.put_attribute("units", units.as_str())?;
            let months: Vec<f64> = (0..field.time.len).map(|i| (i * field.time.step as usize) as f64).collect();
            t.put_values(&months, ..)?;
        }
        let metrics = [
            ("TLAT", Some(&g.lat)),
            ("TLONG", Some(&g.lon)),
            ("TAREA", Some(&g.area)),
            ("UAREA", g.uarea.as_ref()),
            ("DXT", g.dxt.as_ref()),
        ];
        for (name, values) in metrics {
            if let Some(values) = values {
                let mut v = file.add_variable::<f64>(name, &["nlat", "nlon"])?;
                v.put_values(values, ..)?;
            }
        }
        if let Some(mask) = &g.region_mask {
            let mut v = file.add_variable::<i32>("REGION_MASK", &["nlat", "nlon"])?;
            v.put_values(mask, ..)?;
        }

        let mut v = file.add_variable::<f32>(&field.name, &dims)?;
        v.put_attribute("_FillValue", FILL_VALUE_F32)?;
        if let Some(u) = &field.units {
            v.put_attribute("units", u.as_str())?;
        }
        for (k, s) in &field.attrs {
            v.put_attribute(k, s.as_str())?;
        }
        let data: Vec<f32> = field
            .data
            .iter()
            .map(|&x| if x.is_finite() { x } else { FILL_VALUE_F32 })
            .collect();
        v.put_values(&data, ..)?;
        Ok(())
    }
}

#[cfg(not(feature = "netcdf"))]
mod nc {
    use std::path::Path;

    use crate::error::{Error, Result};
    use crate::field::Field;

    pub(super) fn read(path: &Path, _var: &str) -> Result<Field> {
        Err(Error::FeatureDisabled(path.display().to_string()))
    }

    pub(super) fn write(path: &Path, _field: &Field) -> Result<()> {
        Err(Error::FeatureDisabled(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use crate::time::{TimeAxis, YearMonth};

    fn sample(name: &str, offset: f32) -> Field {
        let g = Grid::regular(&[30.0, 31.0], &[230.0]);
        let data = vec![offset, f32::NAN, offset + 1.0, f32::NAN];
        Field::new(name, TimeAxis::new(YearMonth::new(1920, 1), 2), g, 1, data).unwrap()
    }

    #[test]
    fn field_roundtrip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SST/CalCS/SST.001.CalCS.192001-201512.json");
        save_field(&path, &sample("SST", 1.0)).unwrap();
        let back = load_field(&path, "SST").unwrap();
        assert_eq!(back.data[0], 1.0);
        assert!(back.data[1].is_nan());
    }

    #[test]
    fn wrong_variable_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        save_field(&path, &sample("SST", 0.0)).unwrap();
        assert!(matches!(load_field(&path, "FG_CO2"), Err(Error::MissingVariable(_))));
    }

    #[test]
    fn members_stack_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let members = vec!["001".to_string(), "002".to_string()];
        for (k, m) in members.iter().enumerate() {
            save_field(&dir.path().join(format!("SST.{m}.json")), &sample("SST", k as f32 * 10.0)).unwrap();
        }
        let ens = load_members(&members, "SST", |m| dir.path().join(format!("SST.{m}.json"))).unwrap();
        assert_eq!(ens.fields[1].data[0], 10.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_field(&dir.path().join("nope.json"), "SST"), Err(Error::Io(_))));
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn netcdf_needs_feature() {
        let dir = tempfile::tempdir().unwrap();
        let r = save_field(&dir.path().join("a.nc"), &sample("SST", 0.0));
        assert!(matches!(r, Err(Error::FeatureDisabled(_))));
    }

    #[cfg(feature = "netcdf")]
    #[test]
    fn netcdf_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.nc");
        let mut f = sample("SST", 2.0);
        f.units = Some("degC".into());
        save_field(&path, &f).unwrap();
        let back = load_field(&path, "SST").unwrap();
        assert_eq!(back.data[0], 2.0);
        assert!(back.data[1].is_nan());
        assert_eq!(back.units.as_deref(), Some("degC"));
        assert_eq!(back.time.start, YearMonth::new(1920, 1));
    }
}
