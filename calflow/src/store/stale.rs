//! Stale-artifact inventory.
//!
//! The pipeline never deletes artifacts. This listing gives operators (and
//! the startup log) visibility into what has accumulated so external
//! housekeeping can act on it.

use super::ArtifactStore;
use crate::core::ArtifactKind;
use crate::errors::CalflowError;
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::fs;

/// An artifact (or abandoned scratch directory) older than a threshold.
#[derive(Debug, Clone, Serialize)]
pub struct StaleArtifact {
    /// Location on disk.
    pub path: PathBuf,
    /// Artifact kind, or `None` for scratch directories and orphaned
    /// temporary files.
    pub kind: Option<ArtifactKind>,
    /// Time since last modification.
    pub age: Duration,
}

impl ArtifactStore {
    /// Lists artifacts, scratch run directories and orphaned temporary
    /// files not modified for `max_age`.
    pub async fn stale_artifacts(
        &self,
        max_age: Duration,
    ) -> Result<Vec<StaleArtifact>, CalflowError> {
        let now = SystemTime::now();
        let mut stale = Vec::new();
        let mut seen_dirs = HashSet::new();

        for kind in ArtifactKind::ALL {
            let dir = self.kind_dir(kind);
            if !seen_dirs.insert(dir.clone()) {
                continue;
            }

            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let orphan = is_temp_file(&name);
                if name.starts_with('.') && !orphan {
                    continue;
                }
                let Some(age) = age_of(&entry, now).await else {
                    continue;
                };
                if age >= max_age {
                    let kind = if orphan {
                        None
                    } else {
                        kind_for(kind.directory(), &name)
                    };
                    stale.push(StaleArtifact {
                        path: entry.path(),
                        kind,
                        age,
                    });
                }
            }
        }

        let mut users = match fs::read_dir(self.scratch_root()).await {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(users) = users.as_mut() {
            while let Some(user_dir) = users.next_entry().await? {
                if !user_dir.file_type().await?.is_dir() {
                    continue;
                }
                let mut runs = fs::read_dir(user_dir.path()).await?;
                while let Some(run) = runs.next_entry().await? {
                    if let Some(age) = age_of(&run, now).await {
                        if age >= max_age {
                            stale.push(StaleArtifact {
                                path: run.path(),
                                kind: None,
                                age,
                            });
                        }
                    }
                }
            }
        }

        stale.sort_by(|a, b| b.age.cmp(&a.age));
        Ok(stale)
    }
}

async fn age_of(entry: &fs::DirEntry, now: SystemTime) -> Option<Duration> {
    let modified = entry.metadata().await.ok()?.modified().ok()?;
    Some(now.duration_since(modified).unwrap_or(Duration::ZERO))
}

/// Leftover of an interrupted write: `.{file}.{id}.tmp`.
fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(".tmp")
}

fn kind_for(directory: &str, file_name: &str) -> Option<ArtifactKind> {
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext)?;
    ArtifactKind::ALL
        .into_iter()
        .find(|k| k.directory() == directory && k.extension() == extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UserIdentifier;
    use uuid::Uuid;

    #[test]
    fn test_kind_for_shared_directory() {
        assert_eq!(kind_for("timetables", "1.ics"), Some(ArtifactKind::CalendarFile));
        assert_eq!(kind_for("timetables", "1.json"), Some(ArtifactKind::Timetable));
        assert_eq!(kind_for("timetables", "1.pdf"), None);
        assert_eq!(kind_for("html", "noext"), None);
        assert!(is_temp_file(".1.ics.abc.tmp"));
        assert!(!is_temp_file("1.tmp"));
    }

    #[tokio::test]
    async fn test_lists_everything_with_zero_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = UserIdentifier::parse("12345").unwrap();

        store.write(&id, ArtifactKind::CalendarFile, b"x").await.unwrap();
        store.write(&id, ArtifactKind::TimetableView, b"x").await.unwrap();
        store.create_scratch_dir(&id, Uuid::now_v7()).await.unwrap();

        let stale = store.stale_artifacts(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 3);
        assert_eq!(stale.iter().filter(|s| s.kind.is_none()).count(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_temp_files_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let timetables = store.kind_dir(ArtifactKind::Timetable);
        std::fs::write(timetables.join(".12345.json.0190a1b2c3d4.tmp"), b"{").unwrap();
        std::fs::write(timetables.join(".gitkeep"), b"").unwrap();

        let stale = store.stale_artifacts(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert!(stale[0].path.ends_with(".12345.json.0190a1b2c3d4.tmp"));
        assert_eq!(stale[0].kind, None);
    }

    #[tokio::test]
    async fn test_fresh_artifacts_are_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = UserIdentifier::parse("12345").unwrap();
        store.write(&id, ArtifactKind::Timetable, b"{}").await.unwrap();

        let stale = store
            .stale_artifacts(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
