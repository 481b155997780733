pub mod carve;
pub mod cli;
pub mod config;
pub mod constants;
pub mod evidence;
pub mod evtx;
pub mod filter;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod scanner;
pub mod stats;
pub mod util;
