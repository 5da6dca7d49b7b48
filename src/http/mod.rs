//! HTTP control API for the assistant session
//!
//! - GET /health - Health check
//! - GET /session - Connection state, flags and transcript
//! - POST /session/connect - Open the session
//! - POST /session/disconnect - Tear it down
//! - POST /session/restart - Disconnect, wait, reconnect
//! - PUT /session/mute - Mute or unmute reply audio
//! - PUT /session/mic - Switch the microphone
//! - POST /messages - Send a text message, optionally with an attachment
//! - GET /logs - Transcript entries

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
