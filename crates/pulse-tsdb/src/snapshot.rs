use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use pulse_core::labels::is_valid_metric_name;
use pulse_core::{now_millis, Labels, MetricKind, Point, StoreError, Timestamp};

use crate::series::Series;
use crate::store::TimeSeriesStore;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    created_at: Timestamp,
    series: Vec<SeriesRecord>,
}

#[derive(Serialize, Deserialize)]
struct SeriesRecord {
    metric: String,
    labels: Labels,
    #[serde(default)]
    kind: MetricKind,
    points: Vec<Point>,
}

impl TimeSeriesStore {
    /// 将全部序列写入 JSON 快照（先写临时文件再改名）
    pub fn snapshot(&self, path: &Path) -> Result<usize, StoreError> {
        let mut records = Vec::new();
        self.for_each_series(|series| {
            records.push(SeriesRecord {
                metric: series.metric().to_string(),
                labels: series.labels().clone(),
                kind: series.kind(),
                points: series.points().copied().collect(),
            });
        });

        let count = records.len();
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            created_at: now_millis(),
            series: records,
        };
        let body = serde_json::to_vec(&file).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(&body)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        info!(path = %path.display(), series = count, "Snapshot written");
        Ok(count)
    }

    /// 从快照恢复；文件不存在时返回 0，内容损坏返回 `StoreError::Corrupt`
    pub fn restore(&self, path: &Path) -> Result<usize, StoreError> {
        let body = match fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let file: SnapshotFile =
            serde_json::from_slice(&body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if file.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported snapshot version {}",
                file.version
            )));
        }

        let mut restored = Vec::with_capacity(file.series.len());
        for record in file.series {
            if !is_valid_metric_name(&record.metric) {
                return Err(StoreError::Corrupt(format!("invalid metric name '{}'", record.metric)));
            }
            record
                .labels
                .validate()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;

            let mut series = Series::new(record.metric, record.labels, record.kind, self.retention());
            for point in record.points {
                series
                    .append(point.timestamp, point.value)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            }
            restored.push(series);
        }

        let count = restored.len();
        for series in restored {
            self.insert_series(series);
        }
        info!(path = %path.display(), series = count, "Snapshot restored");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RetentionPolicy, TimeRange};
    use pulse_core::Sample;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/snapshot.json");

        let store = TimeSeriesStore::new(RetentionPolicy::unbounded());
        let labels = Labels::from_pairs([("instance", "a:1")]).unwrap();
        store.append(&Sample::new("up", labels.clone(), 1000, 1.0)).unwrap();
        store.append(&Sample::new("up", labels.clone(), 2000, f64::NAN)).unwrap();
        assert_eq!(store.snapshot(&path).unwrap(), 1);

        let restored = TimeSeriesStore::new(RetentionPolicy::unbounded());
        assert_eq!(restored.restore(&path).unwrap(), 1);

        let result = restored.query("up", &[], TimeRange::all());
        let points: Vec<Point> = result.series().next().unwrap().points().collect();
        assert_eq!(points.len(), 2);
        assert!(points[1].value.is_nan());

        // 恢复后继续保持单调
        assert!(restored.append(&Sample::new("up", labels, 2000, 1.0)).is_err());
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = TimeSeriesStore::default();
        assert_eq!(store.restore(&dir.path().join("none.json")).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");

        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            TimeSeriesStore::default().restore(&path),
            Err(StoreError::Corrupt(_))
        ));

        let unordered = r#"{"version":1,"created_at":0,"series":[
            {"metric":"up","labels":{},"points":[{"timestamp":2,"value":1},{"timestamp":1,"value":1}]}]}"#;
        std::fs::write(&path, unordered).unwrap();
        assert!(matches!(
            TimeSeriesStore::default().restore(&path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
