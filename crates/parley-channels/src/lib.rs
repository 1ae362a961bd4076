pub mod whatsapp;

pub use whatsapp::{InboundDecision, ProviderMessage, WahaGateway, WebhookBody, classify_webhook};
