mod convert;
mod openai_assistants;

pub use openai_assistants::OpenAiAssistants;
