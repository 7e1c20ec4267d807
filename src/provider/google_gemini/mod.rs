//! Google Gemini GenerateContent (`/v1beta/models/{model}:generateContent`).

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::GoogleGeminiProvider;
