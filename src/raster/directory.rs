use std::fs;
use std::path::{Path, PathBuf};

use super::{band_key, Band, RasterError, RasterStore};
use crate::config::YearMonth;

/// Stores each band as a JSON document `<dir>/<name>[_YYYY_MM].json`.
pub struct DirectoryRasterStore {
    root: PathBuf,
}

impl DirectoryRasterStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, RasterError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|err| RasterError::Io(root.display().to_string(), err))?;
        Ok(Self { root })
    }

    pub fn band_path(&self, name: &str, month: Option<YearMonth>) -> PathBuf {
        self.root.join(format!("{}.json", band_key(name, month)))
    }
}

impl RasterStore for DirectoryRasterStore {
    fn read_band(&self, name: &str, month: Option<YearMonth>) -> Result<Band, RasterError> {
        let path = self.band_path(name, month);
        let key = band_key(name, month);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RasterError::Missing(key))
            }
            Err(err) => return Err(RasterError::Io(key, err)),
        };
        serde_json::from_str(&text).map_err(|err| RasterError::Decode(key, err))
    }

    fn write_band(
        &mut self,
        name: &str,
        month: Option<YearMonth>,
        band: &Band,
    ) -> Result<(), RasterError> {
        let path = self.band_path(name, month);
        let key = band_key(name, month);
        let json = serde_json::to_string(band).map_err(|err| RasterError::Decode(key.clone(), err))?;
        fs::write(&path, json).map_err(|err| RasterError::Io(key, err))
    }

    fn has_band(&self, name: &str, month: Option<YearMonth>) -> bool {
        self.band_path(name, month).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_persist_across_store_instances() {
        let temp = tempfile::tempdir().unwrap();
        let month = YearMonth::new(2018, 7).unwrap();
        {
            let mut store = DirectoryRasterStore::new(temp.path()).unwrap();
            store
                .write_band("forage_biomass", Some(month), &Band::new(2, 1, vec![1.5, 2.5]))
                .unwrap();
        }
        let store = DirectoryRasterStore::new(temp.path()).unwrap();
        assert!(store.band_path("forage_biomass", Some(month)).ends_with("forage_biomass_2018_07.json"));
        let band = store.read_band("forage_biomass", Some(month)).unwrap();
        assert_eq!(band.values(), &[1.5, 2.5]);
        assert!(matches!(
            store.read_band("forage_biomass", None),
            Err(RasterError::Missing(_))
        ));
    }

    #[test]
    fn truncated_band_file_fails_to_decode() {
        let temp = tempfile::tempdir().unwrap();
        let month = YearMonth::new(2016, 1).unwrap();
        let store = DirectoryRasterStore::new(temp.path()).unwrap();
        fs::write(
            store.band_path("precip", Some(month)),
            r#"{"width":2,"height":1,"data":[50.0]}"#,
        )
        .unwrap();
        assert!(matches!(
            store.read_band("precip", Some(month)),
            Err(RasterError::Decode(..))
        ));
        assert!(store.read_band_with_shape("precip", Some(month), 2, 1).is_err());
    }
}
