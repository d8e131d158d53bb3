mod chat;
mod model_list;

pub use chat::{
    ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, ChatContent, ChatContentPart, ChatDelta, ChatMessage,
    FunctionCallBody, FunctionCallDeltaBody, FunctionDef, ImageUrl, OpenaiChatErrorBody,
    OpenaiChatErrorObject, ToolCall, ToolCallDelta, ToolDef,
};
pub use model_list::{OpenaiModel, OpenaiModelList};
