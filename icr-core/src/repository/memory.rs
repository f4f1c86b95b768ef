//! DashMap-backed repositories for tests, the CLI and database-less servers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    Page, Pagination, RepoResult, RepositoryError, ScanRepository, StitchedLabelRepository,
};
use crate::model::{GradedCardScan, ScanStatus, StitchStatus, StitchedLabel};

fn paginate<T: Clone>(mut items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len() as u64;
    let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
    let page: Vec<T> = if offset >= items.len() {
        Vec::new()
    } else {
        items
            .drain(offset..)
            .take(pagination.limit as usize)
            .collect()
    };
    Page::new(page, pagination, total)
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryScanRepository {
    records: Arc<DashMap<Uuid, GradedCardScan>>,
    by_hash: Arc<DashMap<String, Uuid>>,
}

impl InMemoryScanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ScanRepository for InMemoryScanRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<GradedCardScan>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<GradedCardScan>> {
        let Some(id) = self.by_hash.get(image_hash).map(|r| *r.value()) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn create(&self, scan: &GradedCardScan) -> RepoResult<()> {
        match self.by_hash.entry(scan.image_hash.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate(format!(
                "image_hash {}",
                scan.image_hash
            ))),
            Entry::Vacant(slot) => {
                self.records.insert(scan.id, scan.clone());
                slot.insert(scan.id);
                Ok(())
            }
        }
    }

    async fn update(&self, scan: &GradedCardScan) -> RepoResult<()> {
        match self.records.get_mut(&scan.id) {
            Some(mut record) => {
                *record = scan.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(scan.id)),
        }
    }

    async fn update_status(&self, id: Uuid, status: ScanStatus) -> RepoResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        record.processing_status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_many_by_status(
        &self,
        status: Option<ScanStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<GradedCardScan>> {
        let mut items: Vec<GradedCardScan> = self
            .records
            .iter()
            .filter(|r| status.map_or(true, |s| r.processing_status == s))
            .map(|r| r.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, pagination))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(ScanStatus, u64)>> {
        Ok(ScanStatus::ALL
            .into_iter()
            .map(|status| {
                let count = self
                    .records
                    .iter()
                    .filter(|r| r.processing_status == status)
                    .count() as u64;
                (status, count)
            })
            .collect())
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        match self.records.remove(&id) {
            Some((_, scan)) => {
                self.by_hash.remove(&scan.image_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStitchedLabelRepository {
    records: Arc<DashMap<Uuid, StitchedLabel>>,
    by_hash: Arc<DashMap<String, Uuid>>,
    by_label_set: Arc<DashMap<String, Uuid>>,
}

impl InMemoryStitchedLabelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn lookup(&self, index: &DashMap<String, Uuid>, key: &str) -> Option<StitchedLabel> {
        let id = index.get(key).map(|r| *r.value())?;
        self.records.get(&id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl StitchedLabelRepository for InMemoryStitchedLabelRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<StitchedLabel>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<StitchedLabel>> {
        Ok(self.lookup(&self.by_hash, image_hash))
    }

    async fn find_by_label_set(&self, label_set_hash: &str) -> RepoResult<Option<StitchedLabel>> {
        Ok(self.lookup(&self.by_label_set, label_set_hash))
    }

    async fn create(&self, label: &StitchedLabel) -> RepoResult<()> {
        // Lock order: label set, then image hash.
        let set_slot = match self.by_label_set.entry(label.label_set_hash().to_string()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Duplicate(format!(
                    "label_set_hash {}",
                    label.label_set_hash()
                )))
            }
            Entry::Vacant(slot) => slot,
        };
        let hash_slot = match self.by_hash.entry(label.image_hash().to_string()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Duplicate(format!(
                    "image_hash {}",
                    label.image_hash()
                )))
            }
            Entry::Vacant(slot) => slot,
        };

        self.records.insert(label.id(), label.clone());
        hash_slot.insert(label.id());
        set_slot.insert(label.id());
        Ok(())
    }

    async fn update(&self, label: &StitchedLabel) -> RepoResult<()> {
        match self.records.get_mut(&label.id()) {
            Some(mut record) => {
                *record = label.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(label.id())),
        }
    }

    async fn update_status(&self, id: Uuid, status: StitchStatus) -> RepoResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        record.overwrite_status(status);
        Ok(())
    }

    async fn find_many_by_status(
        &self,
        status: Option<StitchStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<StitchedLabel>> {
        let mut items: Vec<StitchedLabel> = self
            .records
            .iter()
            .filter(|r| status.map_or(true, |s| r.status() == s))
            .map(|r| r.value().clone())
            .collect();
        items.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then(a.id().cmp(&b.id()))
        });
        Ok(paginate(items, pagination))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(StitchStatus, u64)>> {
        Ok(StitchStatus::ALL
            .into_iter()
            .map(|status| {
                let count = self.records.iter().filter(|r| r.status() == status).count() as u64;
                (status, count)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::LabelPosition;
    use crate::model::NewStitchedLabel;
    use crate::storage::StorageRef;

    fn scan(hash: &str) -> GradedCardScan {
        GradedCardScan::new(hash, StorageRef::new(format!("scans/b/{hash}.png")), "b", None, 1)
    }

    fn stitched(image_hash: &str, labels: &[&str]) -> StitchedLabel {
        StitchedLabel::new(NewStitchedLabel {
            image_hash: image_hash.into(),
            image: StorageRef::new(format!("stitched/{image_hash}.png")),
            width: 10,
            height: 10,
            positions: (0..labels.len())
                .map(|index| LabelPosition {
                    index,
                    y_offset: index as u32 * 5,
                    height: 4,
                    x_offset: 0,
                    width: 10,
                })
                .collect(),
            label_hashes: labels.iter().map(|l| l.to_string()).collect(),
            scan_ids: labels.iter().map(|_| Uuid::new_v4()).collect(),
            batch_id: "b".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_scan_hash_is_unique() {
        let repo = InMemoryScanRepository::new();
        repo.create(&scan("h1")).await.unwrap();

        let err = repo.create(&scan("h1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_find_update_delete() {
        let repo = InMemoryScanRepository::new();
        let mut s = scan("h1");
        repo.create(&s).await.unwrap();

        assert_eq!(repo.find_by_hash("h1").await.unwrap().unwrap().id, s.id);

        s.original_filename = Some("slab.jpg".into());
        repo.update(&s).await.unwrap();
        assert_eq!(
            repo.find_by_id(s.id).await.unwrap().unwrap().original_filename.as_deref(),
            Some("slab.jpg")
        );

        repo.update_status(s.id, ScanStatus::Extracted).await.unwrap();
        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(ScanStatus::Extracted, 1)));

        assert!(repo.delete(s.id).await.unwrap());
        assert!(repo.find_by_hash("h1").await.unwrap().is_none());
        assert!(!repo.delete(s.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_update_missing() {
        let repo = InMemoryScanRepository::new();
        assert!(matches!(
            repo.update(&scan("nope")).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_status_paginates() {
        let repo = InMemoryScanRepository::new();
        for i in 0..5 {
            repo.create(&scan(&format!("h{i}"))).await.unwrap();
        }

        let page = repo
            .find_many_by_status(Some(ScanStatus::Uploaded), Pagination::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);

        let none = repo
            .find_many_by_status(Some(ScanStatus::Matched), Pagination::default())
            .await
            .unwrap();
        assert!(none.items.is_empty());
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn test_stitched_label_set_is_unique() {
        let repo = InMemoryStitchedLabelRepository::new();
        let first = stitched("c1", &["a", "b"]);
        repo.create(&first).await.unwrap();

        let same_set = stitched("c2", &["a", "b"]);
        assert!(matches!(
            repo.create(&same_set).await,
            Err(RepositoryError::Duplicate(_))
        ));

        let found = repo
            .find_by_label_set(first.label_set_hash())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), first.id());
        assert!(repo.find_by_hash("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stitched_update_status() {
        let repo = InMemoryStitchedLabelRepository::new();
        let label = stitched("c1", &["a"]);
        repo.create(&label).await.unwrap();

        repo.update_status(label.id(), StitchStatus::Matched).await.unwrap();
        let stored = repo.find_by_id(label.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), StitchStatus::Matched);
    }
}
