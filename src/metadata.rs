use std::fmt;
use std::path::Path;

use log::warn;

/// Fields parsed from `AnimalID-Location-ImageNumber.ext`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMetadata {
    pub file_name: String,
    pub animal_id: Option<String>,
    pub location: Option<String>,
    pub img_num: Option<u32>,
}

/// A metadata field that could not be extracted and was left empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataWarning {
    MissingAnimalId,
    MissingLocation,
    MissingImageNumber,
}

impl fmt::Display for MetadataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self {
            MetadataWarning::MissingAnimalId => "animal id",
            MetadataWarning::MissingLocation => "location",
            MetadataWarning::MissingImageNumber => "image number",
        };
        write!(f, "could not extract {}", field)
    }
}

fn non_empty(field: Option<&str>) -> Option<String> {
    field.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn leading_number(field: Option<&str>) -> Option<u32> {
    let digits: String = field?.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse animal id, location and image number from a file name.
///
/// Missing fields are `None`, each reported once as a warning and logged.
pub fn extract_metadata(path: &Path) -> (FileMetadata, Vec<MetadataWarning>) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut metadata = FileMetadata { file_name, ..Default::default() };

    if stem.contains('-') {
        let fields: Vec<&str> = stem.split('-').collect();
        metadata.animal_id = non_empty(fields.first().copied());
        metadata.location = non_empty(fields.get(1).copied());
        metadata.img_num = leading_number(fields.get(2).copied());
    }

    let mut warnings = Vec::new();
    if metadata.animal_id.is_none() {
        warnings.push(MetadataWarning::MissingAnimalId);
    }
    if metadata.location.is_none() {
        warnings.push(MetadataWarning::MissingLocation);
    }
    if metadata.img_num.is_none() {
        warnings.push(MetadataWarning::MissingImageNumber);
    }

    for warning in &warnings {
        warn!("{}: {}, left empty in output", metadata.file_name, warning);
    }

    (metadata, warnings)
}
