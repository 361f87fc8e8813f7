pub mod provider_schema;
pub mod request;

pub use request::GenerateQuestionsRequest;
