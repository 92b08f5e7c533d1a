//! Term analysis shared by every backend.

use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Name the file name analyzer is registered under in the local index.
pub const FILE_NAME_TOKENIZER: &str = "file_name";

/// Splits on every run of characters that are not letters or digits, then
/// lowercases.
pub fn file_name_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.build()
}

/// `final_report_2023.pdf` → `["final", "report", "2023", "pdf"]`
pub fn analyze_name(name: &str) -> Vec<String> {
	let mut analyzer = file_name_analyzer();
	let mut stream = analyzer.token_stream(name);
	let mut terms = Vec::new();
	stream.process(&mut |token| terms.push(token.text.clone()));
	terms
}

/// Edit budget of the `AUTO` fuzziness policy (low = 3, high = 6).
pub fn auto_fuzziness(term: &str) -> usize {
	match term.chars().count() {
		0..=2 => 0,
		3..=5 => 1,
		_ => 2,
	}
}
