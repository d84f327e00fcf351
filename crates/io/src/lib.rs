// File I/O: source loaders, GeoPackage codec, result writers

pub mod error;
pub mod exclude;
pub mod gpkg;
pub mod load;
pub mod table;
pub mod validate;
pub mod writer;

use std::path::Path;

pub use error::IoError;
pub use exclude::collect_guids;
pub use load::{load_areas, load_bgt_folder, load_bor, load_rule_rows, LoadOutcome};
pub use validate::OutputValidator;
pub use writer::{write_outputs, GpkgBucketWriter, ResultWriter};

/// Source file formats, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    GeoPackage,
    Csv,
    Xlsx,
}

impl SourceFormat {
    pub fn of(path: &Path) -> Result<Self, IoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gpkg" | "sqlite" => Ok(Self::GeoPackage),
            "csv" | "tsv" => Ok(Self::Csv),
            "xlsx" | "xlsm" | "xls" => Ok(Self::Xlsx),
            _ => Err(IoError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_by_extension() {
        assert_eq!(SourceFormat::of(Path::new("gisib.GPKG")).unwrap(), SourceFormat::GeoPackage);
        assert_eq!(SourceFormat::of(Path::new("bgt/wegdeel.csv")).unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::of(Path::new("controletabel.xlsx")).unwrap(), SourceFormat::Xlsx);
        assert!(matches!(
            SourceFormat::of(Path::new("bgt_wegdeel.shp")),
            Err(IoError::UnsupportedFormat(_))
        ));
    }
}
