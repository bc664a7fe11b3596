/*!
This crate drives the negotiation of a one-to-one `WebRTC` audio/video call between two
browsers that meet through a relaying signaling server.

# Overview

Media itself is left to the browser: this crate sequences everything around it. It
creates the offer when the engine asks for negotiation, answers inbound offers, trickles
ICE candidates both ways (buffering remote ones that arrive before the description they
belong to), and tears the call down on hang-up or connectivity failure.

[`CallManager`] owns the call, [`handle_signaling_frame`] routes frames received from the
signaling server into it. Both are generic over the collaborator traits in [`engine`];
the [`browser`] module (WASM only) implements them with `web-sys`.
*/

#![allow(
    clippy::module_name_repetitions,
    clippy::future_not_send, // false positive in WASM (single threaded) context
)]
// clippy WARN level lints
#![warn(
    // missing_docs,
    clippy::cargo,
    clippy::pedantic,
    // clippy::nursery,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    // clippy::missing_docs_in_private_items,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::pattern_type_mismatch,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::separated_literal_suffix,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads
)]

#[cfg(target_arch = "wasm32")]
pub mod browser;
pub mod call;
mod config;
pub(crate) mod constants;
pub mod engine;
mod error;

pub use call::{handle_signaling_frame, CallManager, CallState, Dispatched, TeardownReason};
pub use config::{CallConfig, ConnectionType, IceServer, IceUrls, MediaConstraints};
pub use error::{Error, Result};
pub use wasm_call_protocol::{ClientId, IceCandidate, MessageKind, SdpType, SessionDescription};
