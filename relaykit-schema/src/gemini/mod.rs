mod generate_content_request;
mod model_list;
mod v1beta_response;

pub use generate_content_request::GeminiGenerateContentRequest;
pub use generate_content_request::{Content, FunctionDeclaration, GenerationConfig, Part, Tool, ToolConfig};
pub use model_list::{GeminiModel, GeminiModelList};
pub use v1beta_response::Candidate;
pub use v1beta_response::GeminiResponseBody;
