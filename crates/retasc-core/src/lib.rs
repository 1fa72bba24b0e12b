pub mod clients;
pub mod config;
pub mod error;
pub mod inputs;
pub mod io;
pub mod parse_rules;
pub mod prerequisites;
pub mod report;
pub mod rule;
pub mod run;
pub mod runtime_context;
pub mod schema;
pub mod state;
pub mod template;
pub mod value;

mod http_common;

pub use error::{Result, RetascError};
