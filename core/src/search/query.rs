use serde::{Deserialize, Serialize};

use super::analysis::auto_fuzziness;

/// Hard cap on hits returned by one search.
pub const MAX_RESULTS: usize = 15;

/// The only field name queries run against.
pub const NAME_FIELD: &str = "name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fuzziness {
	/// Edit budget grows with term length.
	Auto,
	Fixed(u8),
}

impl Fuzziness {
	pub fn max_edits(self, term: &str) -> usize {
		match self {
			Fuzziness::Auto => auto_fuzziness(term),
			Fuzziness::Fixed(n) => n as usize,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyClause {
	pub field: String,
	pub value: String,
	pub fuzziness: Fuzziness,
}

/// Every clause must match a term of the field, with at most `slop` other
/// terms in between; `in_order` pins the clause order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanQuery {
	pub clauses: Vec<FuzzyClause>,
	pub slop: u32,
	pub in_order: bool,
	pub size: usize,
}

/// Lowercase, split on whitespace, drop empty tokens.
pub fn tokenize_query(text: &str) -> Vec<String> {
	text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

impl SpanQuery {
	/// Fuzzy, order-insensitive, adjacent-terms query over file names.
	/// `None` when the text has no tokens.
	pub fn for_text(text: &str, size: usize) -> Option<SpanQuery> {
		let tokens = tokenize_query(text);
		if tokens.is_empty() {
			return None;
		}

		Some(SpanQuery {
			clauses: tokens
				.into_iter()
				.map(|value| FuzzyClause {
					field: NAME_FIELD.to_string(),
					value,
					fuzziness: Fuzziness::Auto,
				})
				.collect(),
			slop: 0,
			in_order: false,
			size: size.min(MAX_RESULTS),
		})
	}
}
