//! Shared contracts between the host engine and agent scripts.
//!
//! Everything that crosses the host/script boundary as data is defined here.
//! Message-level types flow to `TypeScript` via `ts-rs` for the script-side
//! standard library.
//!
//! # Modules
//!
//! - [`ids`] -- The [`AgentId`] string wrapper
//! - [`agent`] -- [`AgentState`] with name-based field access
//! - [`message`] -- [`Message`], [`Recipient`], and the host sentinel
//! - [`control`] -- Decoding of `create_agent` / `remove_agent` / `stop`
//! - [`context`] -- Globals, datasets, and [`InitContext`]

pub mod agent;
pub mod context;
pub mod control;
pub mod ids;
pub mod message;

pub use agent::{AgentState, FieldError};
pub use context::{Datasets, Globals, InitContext};
pub use control::{ControlError, ControlMessage, StopSignal};
pub use ids::AgentId;
pub use message::{HOST_SENTINEL, Message, Recipient, recipient_key, recipient_matches};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the script-facing types.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::AgentId::export_all();
        let _ = crate::message::Recipient::export_all();
        let _ = crate::message::Message::export_all();
        let _ = crate::control::StopSignal::export_all();
    }
}
