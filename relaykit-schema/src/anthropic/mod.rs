mod messages;

pub use messages::{
    AnthropicContentBlock, AnthropicErrorBody, AnthropicErrorObject, AnthropicMessage,
    AnthropicMessagesRequest, AnthropicMessagesResponse, AnthropicSystem, AnthropicTool,
};
