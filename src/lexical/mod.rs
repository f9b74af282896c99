mod bm25;
mod tokenizer;

pub use bm25::{Bm25Index, DocStats, DEFAULT_B, DEFAULT_K1, DEFAULT_TERM_LIMIT};
pub use tokenizer::{split_identifier, tokenize};
