//! Static catalog of models this proxy advertises via `GET /v1/models`.

use relaykit_schema::gemini::GeminiModelList;
use relaykit_schema::openai::OpenaiModelList;

const MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-pro-preview-06-05",
    "gemini-2.5-pro-preview-05-06",
    "gemini-2.5-flash-preview-09-2025",
    "gemini-2.5-flash-preview-05-20",
    "gpt-5",
    "gpt-5-codex",
];

pub fn openai_catalog() -> OpenaiModelList {
    OpenaiModelList::from_model_names(MODELS.iter().copied(), "relaykit".to_string())
}

pub fn gemini_catalog() -> GeminiModelList {
    GeminiModelList::from_model_names(MODELS.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_non_empty() {
        assert!(!MODELS.is_empty());
        assert_eq!(openai_catalog().data.len(), MODELS.len());
    }
}
