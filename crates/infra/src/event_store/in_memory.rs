use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use super::r#trait::{BackendError, Item, KeyQuery, KeyedStore, Page, SortOrder};

/// Records scanned per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory keyed store.
///
/// Intended for tests/dev. Not optimized for performance. Conditional inserts are checked
/// and applied under one write guard, which gives the same single-winner guarantee as a
/// native conditional put.
///
/// Pages are cut by records *scanned*, not records matched, so a filtered query can see
/// empty pages that still carry a resume key.
#[derive(Debug)]
pub struct InMemoryKeyedStore {
    partitions: RwLock<HashMap<String, BTreeMap<i64, Item>>>,
    page_size: usize,
}

impl Default for InMemoryKeyedStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl InMemoryKeyedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page size of zero is treated as one.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of records stored across all partitions.
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .map(|p| p.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyedStore for InMemoryKeyedStore {
    async fn put_if_absent(&self, item: Item) -> Result<(), BackendError> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| BackendError::Poisoned)?;

        let partition = partitions.entry(item.id.clone()).or_default();
        if partition.contains_key(&item.version) {
            return Err(BackendError::ConditionalCheckFailed);
        }
        partition.insert(item.version, item);
        Ok(())
    }

    async fn query_page(&self, query: &KeyQuery) -> Result<Page, BackendError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| BackendError::Poisoned)?;

        let Some(partition) = partitions.get(&query.partition) else {
            return Ok(Page::default());
        };

        let lower = query.min_version.map_or(Bound::Unbounded, Bound::Included);
        let (lower, upper) = match (query.order, query.exclusive_start) {
            (SortOrder::Ascending, Some(start)) => {
                let resume = match query.min_version {
                    Some(min) if min > start => Bound::Included(min),
                    _ => Bound::Excluded(start),
                };
                (resume, Bound::Unbounded)
            }
            (SortOrder::Descending, Some(start)) => (lower, Bound::Excluded(start)),
            (_, None) => (lower, Bound::Unbounded),
        };
        if let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi)) = (lower, upper) {
            if lo >= hi {
                return Ok(Page::default());
            }
        }

        let range = partition.range((lower, upper));
        let mut scan: Box<dyn Iterator<Item = (&i64, &Item)>> = match query.order {
            SortOrder::Ascending => Box::new(range),
            SortOrder::Descending => Box::new(range.rev()),
        };

        let wanted = query.limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut last_scanned = None;
        let mut scanned = 0;

        for (version, item) in scan.by_ref() {
            scanned += 1;
            last_scanned = Some(*version);
            if query.note.matches(&item.note) {
                items.push(item.clone());
            }
            if scanned == self.page_size || items.len() == wanted {
                break;
            }
        }

        let exhausted = scan.next().is_none();
        Ok(Page {
            items,
            last_evaluated: if exhausted { None } else { last_scanned },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::r#trait::NoteFilter;

    fn item(id: &str, version: i64, note: &str) -> Item {
        Item {
            id: id.to_string(),
            version,
            event_name: "hitpoints".to_string(),
            event: vec![version as u8],
            note: note.to_string(),
            latest_version: None,
        }
    }

    async fn drain(store: &InMemoryKeyedStore, query: KeyQuery) -> (Vec<i64>, usize) {
        let mut versions = Vec::new();
        let mut pages = 0;
        let mut start = None;
        loop {
            let page = store
                .query_page(&query.clone().exclusive_start(start))
                .await
                .unwrap();
            pages += 1;
            versions.extend(page.items.iter().map(|i| i.version));
            match page.last_evaluated {
                Some(k) => start = Some(k),
                None => break,
            }
        }
        (versions, pages)
    }

    #[tokio::test]
    async fn second_insert_at_same_key_is_rejected() {
        let store = InMemoryKeyedStore::new();
        store.put_if_absent(item("X", 0, "first")).await.unwrap();

        let err = store.put_if_absent(item("X", 0, "second")).await.unwrap_err();
        assert!(matches!(err, BackendError::ConditionalCheckFailed));

        let page = store.query_page(&KeyQuery::partition("X")).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].note, "first");
    }

    #[tokio::test]
    async fn same_version_in_other_partition_is_independent() {
        let store = InMemoryKeyedStore::new();
        store.put_if_absent(item("X", 0, "")).await.unwrap();
        store.put_if_absent(item("Y", 0, "")).await.unwrap();
        store.put_if_absent(item("X#SNAPSHOT", 0, "SNAPSHOT")).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn ascending_pages_are_drained_in_order() {
        let store = InMemoryKeyedStore::with_page_size(2);
        for v in [4, 0, 2, 1, 3] {
            store.put_if_absent(item("X", v, "")).await.unwrap();
        }

        let (versions, pages) = drain(&store, KeyQuery::partition("X")).await;
        assert_eq!(versions, vec![0, 1, 2, 3, 4]);
        assert_eq!(pages, 3);

        let (versions, _) = drain(&store, KeyQuery::partition("X").min_version(2)).await;
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn filtered_pages_may_be_empty_but_keep_going() {
        let store = InMemoryKeyedStore::with_page_size(1);
        store.put_if_absent(item("X", 0, "SNAPSHOT")).await.unwrap();
        store.put_if_absent(item("X", 1, "")).await.unwrap();

        let first = store
            .query_page(&KeyQuery::partition("X").note(NoteFilter::NotEquals("SNAPSHOT".into())))
            .await
            .unwrap();
        assert!(first.items.is_empty());
        assert_eq!(first.last_evaluated, Some(0));
    }

    #[tokio::test]
    async fn latest_returns_highest_version_only() {
        let store = InMemoryKeyedStore::with_page_size(2);
        for v in 0..5 {
            store.put_if_absent(item("X", v, "")).await.unwrap();
        }

        let page = store
            .query_page(&KeyQuery::partition("X").latest())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].version, 4);

        let (versions, _) = drain(&store, KeyQuery::partition("X").latest()).await;
        assert_eq!(versions.first(), Some(&4));
    }

    #[tokio::test]
    async fn unknown_partition_yields_empty_page() {
        let store = InMemoryKeyedStore::new();
        let page = store.query_page(&KeyQuery::partition("nope")).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.last_evaluated.is_none());
    }
}
