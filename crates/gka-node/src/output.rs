use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gka_metrics::Aggregate;

/// Write the statistics CSV for one run.
///
/// Pattern: `<dir>/<member_count>/statistic-#<n>.csv` with the first unused `n`.
/// Each process writes its own file from an aggregate holding only its own
/// snapshot, so `MEMBER_COUNT` is 1 and the counters cover this member
/// alone. Summing the files of one directory gives the whole group.
pub fn write_statistics(dir: &Path, aggregate: &Aggregate) -> io::Result<PathBuf> {
    let dir = dir.join(aggregate.member_count.to_string());
    fs::create_dir_all(&dir)?;
    let path = find_unique_path(&dir, "statistic-#", "csv");
    fs::write(&path, aggregate.to_csv())?;
    Ok(path)
}

/// First `<base><n>.<ext>` in `dir` that does not exist yet, counting from 0.
fn find_unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let mut n: u64 = 0;
    loop {
        let candidate = dir.join(format!("{base}{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gka_metrics::{CountMetric, StatisticsRecorder, StatisticsSink};

    fn aggregate(member_count: u16) -> Aggregate {
        let recorder = StatisticsRecorder::new();
        recorder.record_count_by(CountMetric::MemberCount, 1);
        let mut aggregate = Aggregate::new(member_count);
        aggregate.absorb(&recorder.snapshot());
        aggregate
    }

    #[test]
    fn files_are_numbered_per_member_count() {
        let tmp = tempfile::tempdir().unwrap();
        let first = write_statistics(tmp.path(), &aggregate(4)).unwrap();
        let second = write_statistics(tmp.path(), &aggregate(4)).unwrap();
        let other = write_statistics(tmp.path(), &aggregate(6)).unwrap();

        assert_eq!(first, tmp.path().join("4").join("statistic-#0.csv"));
        assert_eq!(second, tmp.path().join("4").join("statistic-#1.csv"));
        assert_eq!(other, tmp.path().join("6").join("statistic-#0.csv"));
    }

    #[test]
    fn csv_has_header_and_one_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_statistics(tmp.path(), &aggregate(2)).unwrap();
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("MEMBER_COUNT,"));
        assert!(lines[1].starts_with("1,"));
    }

    #[test]
    fn gaps_are_reused() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("3")).unwrap();
        fs::write(tmp.path().join("3").join("statistic-#1.csv"), "").unwrap();
        let path = write_statistics(tmp.path(), &aggregate(3)).unwrap();
        assert_eq!(path, tmp.path().join("3").join("statistic-#0.csv"));
    }

    #[test]
    fn per_process_file_holds_one_member() {
        let tmp = tempfile::tempdir().unwrap();
        let agg = aggregate(4);
        assert!(!agg.is_complete());
        let path = write_statistics(tmp.path(), &agg).unwrap();
        assert_eq!(path.parent(), Some(tmp.path().join("4").as_path()));
        let content = fs::read_to_string(path).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert_eq!(row.split(',').next(), Some("1"));
    }
}
