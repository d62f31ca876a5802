mod app_cfg;
mod app_fns;
mod arg_parse;
mod errors;
mod fingerprint_output;

pub(crate) use app_cfg::*;
pub(crate) use errors::*;

use fingerprint_output::{print_json_line, FingerprintOutput, VerdictOutput};

pub use app_fns::run_app;
