#![forbid(unsafe_code)]
#![forbid(non_ascii_idents)]

pub mod error;
pub mod handler;
