//! Derived, read-only views over a collection snapshot.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::model::{CollectionSnapshot, Entity};

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Text a record exposes to the search box.
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;
}

/// Filter and order applied on top of a snapshot. Never mutates it.
pub struct FilterSortSpec<T> {
    predicates: Vec<Predicate<T>>,
    comparator: Option<Comparator<T>>,
}

impl<T> Clone for FilterSortSpec<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            comparator: self.comparator.clone(),
        }
    }
}

impl<T> Default for FilterSortSpec<T> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            comparator: None,
        }
    }
}

impl<T> fmt::Debug for FilterSortSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSortSpec")
            .field("predicates", &self.predicates.len())
            .field("sorted", &self.comparator.is_some())
            .finish()
    }
}

impl<T: 'static> FilterSortSpec<T> {
    /// Everything, in snapshot order.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a predicate; all predicates must hold.
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn sort_by(mut self, comparator: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    #[must_use]
    pub fn sort_by_key<K: Ord>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort_by(move |a, b| key(a).cmp(&key(b)))
    }

    /// Flips the current ordering. No-op when unsorted.
    #[must_use]
    pub fn descending(mut self) -> Self {
        if let Some(cmp) = self.comparator.take() {
            self.comparator = Some(Arc::new(move |a: &T, b: &T| cmp(b, a)));
        }
        self
    }

    #[must_use]
    pub fn matches(&self, item: &T) -> bool {
        self.predicates.iter().all(|p| p(item))
    }

    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.comparator.is_some()
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        self.comparator.as_ref().map_or(Ordering::Equal, |cmp| cmp(a, b))
    }
}

impl<T: Searchable + 'static> FilterSortSpec<T> {
    /// Case-insensitive substring match over `search_fields`. A blank query
    /// matches everything.
    #[must_use]
    pub fn search(self, query: &str) -> Self {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self;
        }
        self.filter(move |item: &T| {
            item.search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
    }
}

/// Visible records of `snapshot` under `spec`: pending deletes are hidden,
/// predicates applied, then a stable sort.
pub fn visible<T: Entity>(snapshot: &CollectionSnapshot<T>, spec: &FilterSortSpec<T>) -> Vec<T> {
    let mut items: Vec<T> = snapshot
        .iter()
        .filter(|entry| entry.state.is_visible() && spec.matches(&entry.entity))
        .map(|entry| entry.entity.clone())
        .collect();

    if spec.is_sorted() {
        items.sort_by(|a, b| spec.compare(a, b));
    }
    items
}

/// Zero-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub size: usize,
}

impl Page {
    #[must_use]
    pub const fn new(index: usize, size: usize) -> Self {
        Self { index, size }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            index: 0,
            size: crate::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PageView<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_count: usize,
}

/// Slices `items` to `page`. A page past the end is clamped to the last one.
#[must_use]
pub fn paginate<T>(items: Vec<T>, page: Page) -> PageView<T> {
    let total = items.len();
    let size = page.size.max(1);
    let page_count = total.div_ceil(size);
    let index = page.index.min(page_count.saturating_sub(1));

    let items = items.into_iter().skip(index * size).take(size).collect();

    PageView {
        items,
        total,
        page: index,
        page_count,
    }
}
