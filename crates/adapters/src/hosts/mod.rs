mod chatgpt;
mod claude;
mod deepseek;
mod gemini;
mod grok;
mod kimi;
mod qwen;

pub use chatgpt::ChatGptAdapter;
pub use claude::ClaudeAdapter;
pub use deepseek::DeepSeekAdapter;
pub use gemini::GeminiAdapter;
pub use grok::GrokAdapter;
pub use kimi::KimiAdapter;
pub use qwen::QwenAdapter;
