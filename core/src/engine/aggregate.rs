use std::{
	cmp::Reverse,
	collections::{BinaryHeap, HashMap},
	hash::Hash,
};

use serde::Serialize;
use tracing::info;

use crate::{
	catalog::{Catalog, CatalogError},
	models::FileRecord,
};

/// Entries per dashboard ranking.
pub const TOP_RANKED: usize = 10;
/// Entries per extension breakdown ranking.
pub const TOP_EXTENSIONS: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ranked<K> {
	pub key: K,
	pub value: u64,
}

/// Storage totals and rankings over the whole catalog.
/// All rankings are sorted by value, largest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogSummary {
	pub total_files: u64,
	pub total_bytes: u64,
	pub largest_file: Option<FileRecord>,
	pub top_dirs_by_count: Vec<Ranked<String>>,
	pub top_dirs_by_size: Vec<Ranked<String>>,
	pub top_extensions_by_count: Vec<Ranked<Option<String>>>,
	pub top_extensions_by_size: Vec<Ranked<Option<String>>>,
	pub extension_breakdown_by_count: Vec<Ranked<Option<String>>>,
	pub extension_breakdown_by_size: Vec<Ranked<Option<String>>>,
}

impl CatalogSummary {
	pub fn is_empty(&self) -> bool {
		self.total_files == 0
	}
}

/// Per-key sums that remember the order keys were first seen in.
struct Tally<K> {
	slots: HashMap<K, usize>,
	entries: Vec<(K, u64)>,
}

impl<K: Eq + Hash + Clone> Tally<K> {
	fn new() -> Self {
		Tally {
			slots: HashMap::new(),
			entries: Vec::new(),
		}
	}

	fn add(&mut self, key: &K, amount: u64) {
		match self.slots.get(key) {
			Some(&slot) => {
				let sum = &mut self.entries[slot].1;
				*sum = sum.saturating_add(amount);
			}
			None => {
				self.slots.insert(key.clone(), self.entries.len());
				self.entries.push((key.clone(), amount));
			}
		}
	}

	/// The `k` largest sums without sorting every key.
	///
	/// Min-heap of size `k`; among equal sums the key seen first wins and
	/// sorts first.
	fn top(&self, k: usize) -> Vec<Ranked<K>> {
		if k == 0 {
			return Vec::new();
		}

		let mut heap: BinaryHeap<Reverse<(u64, Reverse<usize>)>> = BinaryHeap::with_capacity(k + 1);
		for (slot, (_, value)) in self.entries.iter().enumerate() {
			heap.push(Reverse((*value, Reverse(slot))));
			if heap.len() > k {
				heap.pop();
			}
		}

		// Ascending order of Reverse(..) is descending order of (value, first seen).
		heap.into_sorted_vec()
			.into_iter()
			.map(|Reverse((value, Reverse(slot)))| Ranked {
				key: self.entries[slot].0.clone(),
				value,
			})
			.collect()
	}
}

/// One pass over the records; `finish` builds the rankings.
pub struct Accumulator {
	total_files: u64,
	total_bytes: u64,
	largest: Option<FileRecord>,
	dir_count: Tally<String>,
	dir_size: Tally<String>,
	ext_count: Tally<Option<String>>,
	ext_size: Tally<Option<String>>,
}

impl Default for Accumulator {
	fn default() -> Self {
		Accumulator {
			total_files: 0,
			total_bytes: 0,
			largest: None,
			dir_count: Tally::new(),
			dir_size: Tally::new(),
			ext_count: Tally::new(),
			ext_size: Tally::new(),
		}
	}
}

impl Accumulator {
	pub fn add(&mut self, record: &FileRecord) {
		let size = record.size_bytes.unwrap_or(0);

		self.total_files = self.total_files.saturating_add(1);
		self.total_bytes = self.total_bytes.saturating_add(size);

		self.dir_count.add(&record.directory_path, 1);
		self.dir_size.add(&record.directory_path, size);
		self.ext_count.add(&record.extension, 1);
		self.ext_size.add(&record.extension, size);

		// Strictly greater: the first record with the maximum size stays.
		if let Some(candidate) = record.size_bytes {
			let current = self.largest.as_ref().and_then(|r| r.size_bytes);
			if current.map_or(true, |c| candidate > c) {
				self.largest = Some(record.clone());
			}
		}
	}

	pub fn finish(self) -> CatalogSummary {
		CatalogSummary {
			total_files: self.total_files,
			total_bytes: self.total_bytes,
			largest_file: self.largest,
			top_dirs_by_count: self.dir_count.top(TOP_RANKED),
			top_dirs_by_size: self.dir_size.top(TOP_RANKED),
			top_extensions_by_count: self.ext_count.top(TOP_RANKED),
			top_extensions_by_size: self.ext_size.top(TOP_RANKED),
			extension_breakdown_by_count: self.ext_count.top(TOP_EXTENSIONS),
			extension_breakdown_by_size: self.ext_size.top(TOP_EXTENSIONS),
		}
	}
}

/// Scan the catalog page by page and summarize it.
pub async fn summarize(catalog: &Catalog, page_size: usize) -> Result<CatalogSummary, CatalogError> {
	let mut acc = Accumulator::default();
	let mut pages = catalog.pages(page_size);

	while let Some(page) = pages.next().await? {
		for record in &page {
			acc.add(record);
		}
	}

	let summary = acc.finish();
	info!(files = summary.total_files, bytes = summary.total_bytes, "catalog summarized");
	Ok(summary)
}
