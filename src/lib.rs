//! Mail Responder: inbox auto-reply and bulk dispatch core.

pub mod config;
pub mod error;
pub mod ledger;
pub mod profiles;
pub mod recipients;
pub mod responder;
pub mod status;
pub mod transport;
