//! Mapping a direct field and a timestamp to the source file holding its data.
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};

use crate::{
    fields::{DirectField, DirectSource, SourceGroup},
    registry::G5NR_FILE_PREFIX,
};

/// Time-averaged collections are stamped with the middle of their averaging
/// window, which is this far before the instant they are used for.
pub const TIME_AVERAGE_OFFSET_MINUTES: i64 = 15;

/// How a G5NR collection's files are organized in time, determined from the
/// collection name's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CollectionKind {
    /// One file per day (`const*` collections)
    Constant,
    /// One file per output time, stamped at the averaging window's midpoint (`tavg*`)
    TimeAveraged,
    /// One file per output time (everything else)
    Instantaneous,
}

impl CollectionKind {
    pub fn from_dataset(dataset: &str) -> Self {
        if dataset.starts_with("const") {
            Self::Constant
        } else if dataset.starts_with("tavg") {
            Self::TimeAveraged
        } else {
            Self::Instantaneous
        }
    }
}

/// Computes source file paths. This is pure path arithmetic; whether the file
/// exists is checked by whoever opens it.
#[derive(Debug, Clone)]
pub struct SourceLocator {
    g5nr_root: PathBuf,
    lis_root: PathBuf,
    file_prefix: String,
    lis_domain: u32,
}

impl SourceLocator {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(g5nr_root: P, lis_root: Q) -> Self {
        Self {
            g5nr_root: g5nr_root.into(),
            lis_root: lis_root.into(),
            file_prefix: G5NR_FILE_PREFIX.to_string(),
            lis_domain: 1,
        }
    }

    pub fn with_file_prefix<S: ToString>(mut self, prefix: S) -> Self {
        self.file_prefix = prefix.to_string();
        self
    }

    pub fn g5nr_root(&self) -> &Path {
        &self.g5nr_root
    }

    /// Path to the file holding `field` at `timestamp`.
    pub fn locate(&self, field: &DirectField, timestamp: NaiveDateTime) -> PathBuf {
        self.locate_source(&field.source, timestamp)
    }

    pub fn locate_source(&self, source: &DirectSource, timestamp: NaiveDateTime) -> PathBuf {
        match source.group {
            SourceGroup::G5nr => {
                let kind = CollectionKind::from_dataset(&source.dataset);
                self.g5nr_path(&source.dataset, kind, timestamp)
            }
            SourceGroup::Lis => self.lis_path(timestamp),
        }
    }

    /// `<root>/<dataset>/<prefix><dataset>.<stamp>.nc4`
    fn g5nr_path(&self, dataset: &str, kind: CollectionKind, timestamp: NaiveDateTime) -> PathBuf {
        let stamp = match kind {
            CollectionKind::Constant => timestamp.format("%Y%m%d"),
            CollectionKind::TimeAveraged => {
                (timestamp - Duration::minutes(TIME_AVERAGE_OFFSET_MINUTES)).format("%Y%m%d_%H%Mz")
            }
            CollectionKind::Instantaneous => timestamp.format("%Y%m%d_%H%Mz"),
        };
        let file_name = format!("{}{dataset}.{stamp}.nc4", self.file_prefix);
        self.g5nr_root.join(dataset).join(file_name)
    }

    /// `<root>/<YYYYmm>/LIS_HIST_<YYYYmmddHHMM>.d<NN>.nc`
    fn lis_path(&self, timestamp: NaiveDateTime) -> PathBuf {
        let file_name = format!(
            "LIS_HIST_{}.d{:02}.nc",
            timestamp.format("%Y%m%d%H%M"),
            self.lis_domain
        );
        self.lis_root
            .join(timestamp.format("%Y%m").to_string())
            .join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn locator() -> SourceLocator {
        SourceLocator::new("/data/g5nr", "/data/lis")
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[rstest]
    fn test_instantaneous_path(locator: SourceLocator) {
        let src = DirectSource::g5nr("inst30mn_3d_T_Nv", "T");
        let p = locator.locate_source(&src, ts("2006-09-04 00:00"));
        assert_eq!(
            p,
            PathBuf::from(
                "/data/g5nr/inst30mn_3d_T_Nv/c1440_NR.inst30mn_3d_T_Nv.20060904_0000z.nc4"
            )
        );
    }

    #[rstest]
    fn test_constant_path_is_daily(locator: SourceLocator) {
        let src = DirectSource::g5nr("const_2d_asm_Nx", "FRLAND");
        let morning = locator.locate_source(&src, ts("2006-09-04 00:00"));
        let evening = locator.locate_source(&src, ts("2006-09-04 18:30"));
        assert_eq!(morning, evening);
        assert_eq!(
            morning,
            PathBuf::from("/data/g5nr/const_2d_asm_Nx/c1440_NR.const_2d_asm_Nx.20060904.nc4")
        );
    }

    #[rstest]
    fn test_time_averaged_offset(locator: SourceLocator) {
        // A tavg file at T is the same as an inst-style name at T - 15 minutes
        let tavg = DirectSource::g5nr("tavg30mn_2d_met2_Nx", "SNOMAS");
        let p = locator.locate_source(&tavg, ts("2006-09-04 00:00"));
        assert_eq!(
            p,
            PathBuf::from(
                "/data/g5nr/tavg30mn_2d_met2_Nx/c1440_NR.tavg30mn_2d_met2_Nx.20060903_2345z.nc4"
            )
        );

        let as_inst = locator.g5nr_path(
            "tavg30mn_2d_met2_Nx",
            CollectionKind::Instantaneous,
            ts("2006-09-03 23:45"),
        );
        assert_eq!(p, as_inst);
    }

    #[rstest]
    fn test_lis_path(locator: SourceLocator) {
        let src = DirectSource::lis("SoilMoist_tavg");
        let p = locator.locate_source(&src, ts("2006-09-04 06:00"));
        assert_eq!(
            p,
            PathBuf::from("/data/lis/200609/LIS_HIST_200609040600.d01.nc")
        );
    }

    #[test]
    fn test_collection_kind() {
        assert_eq!(CollectionKind::from_dataset("const_2d_asm_Nx"), CollectionKind::Constant);
        assert_eq!(CollectionKind::from_dataset("tavg30mn_2d_met3_Nx"), CollectionKind::TimeAveraged);
        assert_eq!(CollectionKind::from_dataset("inst30mn_2d_met1_Nx"), CollectionKind::Instantaneous);
    }
}
