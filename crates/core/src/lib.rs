//! Core types shared across the hearth crates:
//! - PCM sample conversion and loudness post-processing
//! - Role-tagged chat messages
//! - The cooperative per-session cancellation token
//! - The client transport kind

pub mod audio;
pub mod cancel;
pub mod message;

pub use audio::{boost_limit_pcm16, pcm16_bytes_to_f32, pcm16_to_bytes};
pub use cancel::CancelToken;
pub use message::{ChatMessage, Role};

/// Transport kind of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Browser/desktop client: JSON envelopes with base64 PCM payloads.
    Desktop,
    /// Embedded device: raw PCM in, Opus frames out.
    Device,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Desktop => "desktop",
            ClientKind::Device => "device",
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(ClientKind::Desktop),
            "device" | "embedded" => Ok(ClientKind::Device),
            _ => Err(()),
        }
    }
}
