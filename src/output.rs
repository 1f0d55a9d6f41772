use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use log::{info, warn};

use crate::config::ParameterRecord;
use crate::errors::Result;
use crate::metadata::FileMetadata;
use crate::statistics::AirspaceStatistics;

/// Column order of the raw results sheet
pub const RESULT_COLUMNS: [&str; 22] = [
    "FileName",
    "Animal_id",
    "Location",
    "Img_num",
    "Species",
    "Magnification",
    "Fixed_Field",
    "Scale(px/um)",
    "Image_Width(um)",
    "Image_Height(um)",
    "Obj_Num",
    "Mean_Area(sq_um)",
    "Stdev_Area(sq_um)",
    "Mean_Dia(um)",
    "Mean_Per(um)",
    "Total_Airspace_Area(sq_um)",
    "Total_Tissue_Area(sq_um)",
    "EXP",
    "Lm(um)",
    "D0",
    "D1",
    "D2",
];

/// Column order of the grouped averages sheet
pub const GROUPED_COLUMNS: [&str; 21] = [
    "Animal_id",
    "Location",
    "Img_num",
    "Species",
    "Magnification",
    "Fixed_Field",
    "Scale(px/um)",
    "Image_Width(um)",
    "Image_Height(um)",
    "Obj_Num",
    "Mean_Area(sq_um)",
    "Stdev_Area(sq_um)",
    "Mean_Dia(um)",
    "Mean_Per(um)",
    "Total_Airspace_Area(sq_um)",
    "Total_Tissue_Area(sq_um)",
    "EXP",
    "Lm(um)",
    "D0",
    "D1",
    "D2",
];

/// Number of averaged columns, `Img_num` through `D2` without the text keys
pub const NUMERIC_COLUMNS: usize = 16;

/// One output row: filename metadata, configured image fields and statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResultRecord {
    pub metadata: FileMetadata,
    pub species: String,
    pub magnification: String,
    pub fixed_field: String,
    pub scale: f64,
    pub stats: AirspaceStatistics,
}

impl ImageResultRecord {
    pub fn new(metadata: FileMetadata, params: &ParameterRecord, stats: AirspaceStatistics) -> Self {
        ImageResultRecord {
            metadata,
            species: params.species.clone(),
            magnification: params.magnification.clone(),
            fixed_field: params.fixed_field.clone(),
            scale: params.scale,
            stats,
        }
    }

    /// Numeric columns in output order; a missing image number is NaN
    pub fn numeric_values(&self) -> [f64; NUMERIC_COLUMNS] {
        let s = &self.stats;
        [
            self.metadata.img_num.map_or(f64::NAN, f64::from),
            self.scale,
            s.image_width,
            s.image_height,
            s.obj_num as f64,
            s.mean_area,
            s.stdev_area,
            s.mean_diameter,
            s.mean_perimeter,
            s.total_airspace_area,
            s.total_tissue_area,
            s.exp,
            s.lm,
            s.d0,
            s.d1,
            s.d2,
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        let mut row = vec![
            self.metadata.file_name.clone(),
            self.metadata.animal_id.clone().unwrap_or_default(),
            self.metadata.location.clone().unwrap_or_default(),
            self.metadata.img_num.map(|n| n.to_string()).unwrap_or_default(),
            self.species.clone(),
            self.magnification.clone(),
            self.fixed_field.clone(),
        ];
        let values = self.numeric_values();
        for (idx, value) in values.iter().enumerate().skip(1) {
            // Obj_Num stays an integer in the raw sheet
            if idx == 4 {
                row.push(self.stats.obj_num.to_string());
            } else {
                row.push(format_float(*value));
            }
        }
        row
    }
}

/// Group key of the averages sheet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub animal_id: String,
    pub location: String,
    pub species: String,
    pub magnification: String,
    pub fixed_field: String,
}

/// Averages of every numeric column over one group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRow {
    pub key: GroupKey,
    pub values: [f64; NUMERIC_COLUMNS],
    pub count: usize,
}

impl GroupedRow {
    fn csv_row(&self) -> Vec<String> {
        let mut row = vec![
            self.key.animal_id.clone(),
            self.key.location.clone(),
            format_float(self.values[0]),
            self.key.species.clone(),
            self.key.magnification.clone(),
            self.key.fixed_field.clone(),
        ];
        row.extend(self.values.iter().skip(1).map(|v| format_float(*v)));
        row
    }
}

/// Full-precision float; NaN is written literally
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{}", value)
    }
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn group_key(record: &ImageResultRecord) -> Option<GroupKey> {
    Some(GroupKey {
        animal_id: record.metadata.animal_id.clone()?,
        location: record.metadata.location.clone()?,
        species: record.species.clone(),
        magnification: record.magnification.clone(),
        fixed_field: record.fixed_field.clone(),
    })
}

/// Mean over the non-NaN values; NaN when there are none
fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Sort raw rows by animal, location and image number (nulls last) and
/// average each group. Rows without an animal id or location are left out
/// of the grouped sheet.
pub fn group_and_summarize(
    records: &[ImageResultRecord],
) -> (Vec<ImageResultRecord>, Vec<GroupedRow>) {
    let mut raw = records.to_vec();
    raw.sort_by(|a, b| {
        nulls_last(&a.metadata.animal_id, &b.metadata.animal_id)
            .then_with(|| nulls_last(&a.metadata.location, &b.metadata.location))
            .then_with(|| nulls_last(&a.metadata.img_num, &b.metadata.img_num))
            .then_with(|| a.metadata.file_name.cmp(&b.metadata.file_name))
    });

    let mut groups: BTreeMap<GroupKey, Vec<&ImageResultRecord>> = BTreeMap::new();
    for record in &raw {
        match group_key(record) {
            Some(key) => groups.entry(key).or_default().push(record),
            None => warn!(
                "{} has no animal id or location; excluded from grouped averages",
                record.metadata.file_name
            ),
        }
    }

    let grouped = groups
        .into_iter()
        .map(|(key, members)| {
            let rows: Vec<[f64; NUMERIC_COLUMNS]> = members.iter().map(|r| r.numeric_values()).collect();
            let mut values = [f64::NAN; NUMERIC_COLUMNS];
            for (col, value) in values.iter_mut().enumerate() {
                *value = nan_mean(rows.iter().map(|row| row[col]));
            }
            GroupedRow { key, values, count: members.len() }
        })
        .collect();

    (raw, grouped)
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write the raw results sheet
pub fn write_raw_csv<P: AsRef<Path>>(records: &[ImageResultRecord], path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record(RESULT_COLUMNS)?;
    for record in records {
        writer.write_record(record.csv_row())?;
    }
    writer.flush()?;

    Ok(())
}

/// Write the grouped averages sheet
pub fn write_grouped_csv<P: AsRef<Path>>(rows: &[GroupedRow], path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record(GROUPED_COLUMNS)?;
    for row in rows {
        writer.write_record(row.csv_row())?;
    }
    writer.flush()?;

    Ok(())
}

/// Group the records and write both sheets into `output_dir` as
/// `Lung_Data_<YYYYmmdd-HHMMSS>_raw.csv` and `..._grouped.csv`, stamped
/// with the local time.
pub fn write_output<P: AsRef<Path>>(
    records: &[ImageResultRecord],
    output_dir: P,
) -> Result<(PathBuf, PathBuf)> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let raw_path = output_dir.join(format!("Lung_Data_{}_raw.csv", timestamp));
    let grouped_path = output_dir.join(format!("Lung_Data_{}_grouped.csv", timestamp));

    info!("Writing results to {}", output_dir.display());
    let (raw, grouped) = group_and_summarize(records);
    write_raw_csv(&raw, &raw_path)?;
    write_grouped_csv(&grouped, &grouped_path)?;

    Ok((raw_path, grouped_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn stats(lm: f64, obj_num: usize) -> AirspaceStatistics {
        AirspaceStatistics {
            image_width: 10.0,
            image_height: 5.0,
            obj_num,
            mean_area: 2.0,
            stdev_area: 0.5,
            mean_diameter: 1.5,
            mean_perimeter: 4.0,
            total_airspace_area: 20.0,
            total_tissue_area: 30.0,
            exp: 66.0,
            lm,
            d0: 1.0,
            d1: 1.1,
            d2: 1.2,
            issues: Vec::new(),
        }
    }

    fn record(name: &str, animal: Option<&str>, location: Option<&str>, img: Option<u32>, lm: f64) -> ImageResultRecord {
        let metadata = FileMetadata {
            file_name: name.to_string(),
            animal_id: animal.map(str::to_string),
            location: location.map(str::to_string),
            img_num: img,
        };
        ImageResultRecord::new(metadata, &ParameterRecord::default(), stats(lm, 3))
    }

    #[test]
    fn column_lists_differ_only_by_file_name() {
        assert_eq!(RESULT_COLUMNS[0], "FileName");
        assert_eq!(&RESULT_COLUMNS[1..], &GROUPED_COLUMNS[..]);
        assert_eq!(GROUPED_COLUMNS.len() - 5, NUMERIC_COLUMNS);
    }

    #[test]
    fn raw_rows_sort_with_nulls_last() {
        let records = vec![
            record("bad.tif", None, None, None, 1.0),
            record("B-RUL-1.tif", Some("B"), Some("RUL"), Some(1), 1.0),
            record("A-RUL-2.tif", Some("A"), Some("RUL"), Some(2), 1.0),
            record("A-RUL.tif", Some("A"), Some("RUL"), None, 1.0),
            record("A-LUL-9.tif", Some("A"), Some("LUL"), Some(9), 1.0),
        ];
        let (raw, _) = group_and_summarize(&records);
        let names: Vec<&str> = raw.iter().map(|r| r.metadata.file_name.as_str()).collect();
        assert_eq!(names, vec!["A-LUL-9.tif", "A-RUL-2.tif", "A-RUL.tif", "B-RUL-1.tif", "bad.tif"]);
    }

    #[test]
    fn groups_average_and_skip_nan() {
        let records = vec![
            record("A-RUL-1.tif", Some("A"), Some("RUL"), Some(1), 2.0),
            record("A-RUL-2.tif", Some("A"), Some("RUL"), Some(3), f64::NAN),
            record("A-RUL-3.tif", Some("A"), Some("RUL"), Some(5), 4.0),
            record("A-LUL-1.tif", Some("A"), Some("LUL"), Some(1), f64::NAN),
            record("bad.tif", None, None, None, 7.0),
        ];
        let (_, grouped) = group_and_summarize(&records);
        assert_eq!(grouped.len(), 2);

        let lul = &grouped[0];
        assert_eq!(lul.key.location, "LUL");
        assert!(lul.values[12].is_nan());

        let rul = &grouped[1];
        assert_eq!(rul.count, 3);
        assert_approx_eq!(rul.values[0], 3.0, 1e-12);
        assert_approx_eq!(rul.values[12], 3.0, 1e-12);
        assert_approx_eq!(rul.values[4], 3.0, 1e-12);
    }

    #[test]
    fn csv_rows_follow_column_order() {
        let row = record("bad.tif", None, None, None, f64::NAN).csv_row();
        assert_eq!(row.len(), RESULT_COLUMNS.len());
        assert_eq!(row[0], "bad.tif");
        assert_eq!(row[1], "");
        assert_eq!(row[3], "");
        assert_eq!(row[4], "mouse");
        assert_eq!(row[10], "3");
        assert_eq!(row[18], "NaN");
        assert_eq!(row[21], "1.2");
    }

    #[test]
    fn writes_both_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record("A-RUL-1.tif", Some("A"), Some("RUL"), Some(1), 2.0),
            record("A-RUL-2.tif", Some("A"), Some("RUL"), Some(2), 4.0),
        ];
        let (raw_path, grouped_path) = write_output(&records, dir.path().join("out")).unwrap();

        let mut raw = csv::Reader::from_path(&raw_path).unwrap();
        let headers: Vec<String> = raw.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, RESULT_COLUMNS.to_vec());
        assert_eq!(raw.records().count(), 2);

        let mut grouped = csv::Reader::from_path(&grouped_path).unwrap();
        let rows: Vec<csv::StringRecord> = grouped.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "A");
        assert_eq!(&rows[0][17], "3");
    }

    #[test]
    fn sheet_names_carry_a_local_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("A-RUL-1.tif", Some("A"), Some("RUL"), Some(1), 2.0)];
        let (raw_path, grouped_path) = write_output(&records, dir.path()).unwrap();

        let raw_name = raw_path.file_name().unwrap().to_str().unwrap();
        let stamp = raw_name
            .strip_prefix("Lung_Data_")
            .and_then(|rest| rest.strip_suffix("_raw.csv"))
            .unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d-%H%M%S").is_ok(), "{}", stamp);
        assert_eq!(
            grouped_path.file_name().unwrap().to_str().unwrap(),
            format!("Lung_Data_{}_grouped.csv", stamp)
        );
    }
}
