//! 意图识别：文本归一化、封闭词表与分类器

pub mod classifier;
pub mod text;
pub mod vocabulary;

pub use classifier::{Classification, IntentClassifier, SearchParams};
pub use text::{contains_word, find_word, fold};
pub use vocabulary::{Vocabulary, DEFAULT_CITIES, DEFAULT_PROPERTY_TYPES};
