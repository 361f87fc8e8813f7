pub mod prompts;
pub mod stopwords;
