//! KlipperBridge - firmware-side bus endpoints
//!
//! Runs next to Klipper and answers the camera process:
//!
//! - [`PositionResponder`]: position requests answered from Moonraker, echoing
//!   the request's correlation id
//! - [`CommandBridge`]: G-code lines from the bus forwarded to a firmware channel

mod commands;
mod position;

pub use commands::CommandBridge;
pub use position::PositionResponder;
