//! Command dispatch core shared by every entry point.
//!
//! The interactive statement parser, programmatic dispatch, and the REST
//! gateway all funnel into [`Dispatcher::dispatch`], which wraps every
//! handler with timing, panic containment, envelope coercion, and
//! `command.executed` / `command.failed` events.

mod parser;
mod registry;
mod response;

pub use parser::{ParserContext, tokenize};
pub use registry::{CommandMeta, CommandRequest, Dispatcher, Handler};
pub use response::{Response, Status};
